// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Tunnel pool collaborator.
//!
//! The garlic engine and the tunnel endpoint only need two things from the
//! pool: the gateway of some live inbound tunnel (for reply paths) and a
//! handle to some live outbound tunnel (for forwarding). Selection is
//! round-robin; both return `None` when the pool is dry.

use crate::primitives::{RouterId, TunnelId};

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Gateway-side coordinates of one of our inbound tunnels.
///
/// The gateway is the *last* hop from our perspective; messages delivered
/// to it flow down the tunnel to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTunnelInfo {
    /// Gateway router.
    pub gateway: RouterId,

    /// Tunnel ID at the gateway.
    pub gateway_tunnel_id: TunnelId,
}

/// Handle to one of our outbound tunnels.
pub trait OutboundTunnel: Send + Sync {
    /// Send serialized I2NP `message` through the tunnel so that its
    /// endpoint forwards it to tunnel `tunnel_id` at `gateway`.
    fn send_to_tunnel(&self, gateway: &RouterId, tunnel_id: TunnelId, message: Vec<u8>);
}

/// Pool of the local router's client tunnels.
pub trait TunnelPoolHandle: Send + Sync {
    /// Select an inbound tunnel, round-robin.
    fn next_inbound_tunnel(&self) -> Option<InboundTunnelInfo>;

    /// Select an outbound tunnel, round-robin.
    fn next_outbound_tunnel(&self) -> Option<Arc<dyn OutboundTunnel>>;
}

/// [`TunnelPoolHandle`] over fixed tunnel sets with round-robin cursors.
pub struct RoundRobinPool {
    /// Inbound tunnels.
    inbound: Vec<InboundTunnelInfo>,

    /// Outbound tunnels.
    outbound: Vec<Arc<dyn OutboundTunnel>>,

    /// Inbound selection cursor.
    inbound_cursor: AtomicUsize,

    /// Outbound selection cursor.
    outbound_cursor: AtomicUsize,
}

impl RoundRobinPool {
    /// Create new [`RoundRobinPool`].
    pub fn new(inbound: Vec<InboundTunnelInfo>, outbound: Vec<Arc<dyn OutboundTunnel>>) -> Self {
        Self {
            inbound,
            outbound,
            inbound_cursor: AtomicUsize::new(0),
            outbound_cursor: AtomicUsize::new(0),
        }
    }
}

impl TunnelPoolHandle for RoundRobinPool {
    fn next_inbound_tunnel(&self) -> Option<InboundTunnelInfo> {
        if self.inbound.is_empty() {
            return None;
        }

        let index = self.inbound_cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.inbound[index % self.inbound.len()].clone())
    }

    fn next_outbound_tunnel(&self) -> Option<Arc<dyn OutboundTunnel>> {
        if self.outbound.is_empty() {
            return None;
        }

        let index = self.outbound_cursor.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&self.outbound[index % self.outbound.len()]))
    }
}
