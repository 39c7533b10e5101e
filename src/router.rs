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

//! Router context.
//!
//! One handle bundling everything the messaging core needs from the rest
//! of the router: the local identity, the ElGamal decryption key, the
//! current local lease-set and the transport/tunnel-pool collaborators.

use crate::{
    crypto::ElGamalPrivateKey,
    primitives::{LeaseSet, RouterId},
    runtime::Runtime,
    tunnel::pool::TunnelPoolHandle,
};

use parking_lot::Mutex;

use alloc::{sync::Arc, vec::Vec};
use core::marker::PhantomData;

/// Byte-oriented link to remote routers.
///
/// Best-effort and non-blocking: the message is dropped if there is no
/// session to the router and one cannot be established.
pub trait TransportService: Send + Sync {
    /// Send serialized I2NP `message` to `router`.
    fn send(&self, router: &RouterId, message: Vec<u8>);
}

/// Router context.
pub struct RouterContext<R: Runtime> {
    /// Local router's identity hash.
    local_router_id: RouterId,

    /// ElGamal key garlic messages to us are encrypted against.
    private_key: Arc<ElGamalPrivateKey>,

    /// Local destination's current lease-set, if published.
    local_lease_set: Arc<Mutex<Option<LeaseSet>>>,

    /// Transport collaborator.
    transport: Arc<dyn TransportService>,

    /// Tunnel pool collaborator.
    tunnel_pool: Arc<dyn TunnelPoolHandle>,

    /// Marker for `Runtime`.
    _runtime: PhantomData<R>,
}

impl<R: Runtime> Clone for RouterContext<R> {
    fn clone(&self) -> Self {
        Self {
            local_router_id: self.local_router_id,
            private_key: Arc::clone(&self.private_key),
            local_lease_set: Arc::clone(&self.local_lease_set),
            transport: Arc::clone(&self.transport),
            tunnel_pool: Arc::clone(&self.tunnel_pool),
            _runtime: PhantomData,
        }
    }
}

impl<R: Runtime> RouterContext<R> {
    /// Create new [`RouterContext`].
    pub fn new(
        local_router_id: RouterId,
        private_key: ElGamalPrivateKey,
        transport: Arc<dyn TransportService>,
        tunnel_pool: Arc<dyn TunnelPoolHandle>,
    ) -> Self {
        Self {
            local_router_id,
            private_key: Arc::new(private_key),
            local_lease_set: Arc::new(Mutex::new(None)),
            transport,
            tunnel_pool,
            _runtime: PhantomData,
        }
    }

    /// Get the local router's identity hash.
    pub fn router_id(&self) -> &RouterId {
        &self.local_router_id
    }

    /// Get the local ElGamal decryption key.
    pub fn private_key(&self) -> &ElGamalPrivateKey {
        &self.private_key
    }

    /// Get the transport collaborator.
    pub fn transport(&self) -> &Arc<dyn TransportService> {
        &self.transport
    }

    /// Get the tunnel pool collaborator.
    pub fn tunnel_pool(&self) -> &Arc<dyn TunnelPoolHandle> {
        &self.tunnel_pool
    }

    /// Get a copy of the current local lease-set, if any.
    pub fn local_lease_set(&self) -> Option<LeaseSet> {
        self.local_lease_set.lock().clone()
    }

    /// Replace the local lease-set.
    pub fn set_local_lease_set(&self, lease_set: LeaseSet) {
        *self.local_lease_set.lock() = Some(lease_set);
    }
}
