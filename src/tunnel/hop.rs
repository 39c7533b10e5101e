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

//! Hop chains for tunnels under construction.
//!
//! The chain is a flat vector; a hop's neighbours are `index - 1` and
//! `index + 1`, which keeps the two-directional traversal of build-reply
//! verification free of pointer juggling.

use crate::{
    crypto::{ElGamalPublicKey, SessionKey},
    primitives::{RouterId, TunnelId},
};

use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;
use core::fmt;

/// Everything the originator knows about one hop of a tunnel it is
/// building.
pub struct TunnelHopConfig {
    /// The hop's identity hash.
    pub router: RouterId,

    /// The hop's ElGamal encryption key.
    pub encryption_key: ElGamalPublicKey,

    /// Tunnel ID the hop receives messages on.
    pub tunnel_id: TunnelId,

    /// Router the hop forwards to.
    pub next_router: RouterId,

    /// Tunnel ID at the next router.
    pub next_tunnel_id: TunnelId,

    /// Layer encryption key.
    pub layer_key: SessionKey,

    /// IV encryption key.
    pub iv_key: SessionKey,

    /// Key the hop encrypts build replies with.
    pub reply_key: SessionKey,

    /// IV the hop encrypts build replies with.
    pub reply_iv: [u8; 16],

    /// The hop is the tunnel's gateway.
    pub is_gateway: bool,

    /// The hop is the tunnel's endpoint.
    pub is_endpoint: bool,

    /// Position of the hop's record in the build message,
    /// assigned when the request is created.
    pub record_index: usize,
}

impl fmt::Debug for TunnelHopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHopConfig")
            .field("router", &self.router)
            .field("tunnel_id", &self.tunnel_id)
            .field("next_router", &self.next_router)
            .field("next_tunnel_id", &self.next_tunnel_id)
            .field("is_gateway", &self.is_gateway)
            .field("is_endpoint", &self.is_endpoint)
            .finish_non_exhaustive()
    }
}

/// Ordered hop chain of a tunnel under construction.
#[derive(Debug)]
pub struct TunnelConfig {
    /// Hops, gateway first.
    pub hops: Vec<TunnelHopConfig>,
}

impl TunnelConfig {
    /// Assemble a chain from `peers`, drawing tunnel IDs and key material
    /// from `rng` and linking each hop to its successor.
    fn assemble(
        mut rng: impl RngCore + CryptoRng,
        peers: Vec<(RouterId, ElGamalPublicKey)>,
    ) -> Vec<TunnelHopConfig> {
        let tunnel_ids =
            peers.iter().map(|_| TunnelId::from(rng.next_u32())).collect::<Vec<_>>();

        let num_hops = peers.len();
        peers
            .into_iter()
            .enumerate()
            .map(|(i, (router, encryption_key))| {
                let mut reply_iv = [0u8; 16];
                rng.fill_bytes(&mut reply_iv);

                TunnelHopConfig {
                    router,
                    encryption_key,
                    tunnel_id: tunnel_ids[i],
                    // the last hop's successor is patched by the caller
                    next_router: RouterId::default(),
                    next_tunnel_id: tunnel_ids.get(i + 1).copied().unwrap_or_default(),
                    layer_key: SessionKey::random(&mut rng),
                    iv_key: SessionKey::random(&mut rng),
                    reply_key: SessionKey::random(&mut rng),
                    reply_iv,
                    is_gateway: i == 0,
                    is_endpoint: i == num_hops - 1,
                    record_index: 0,
                }
            })
            .collect()
    }

    /// Create the chain of an inbound tunnel: the first hop is the
    /// gateway, the last hop forwards to the local router.
    ///
    /// Panics if `peers` is empty.
    pub fn inbound(
        mut rng: impl RngCore + CryptoRng,
        peers: Vec<(RouterId, ElGamalPublicKey)>,
        local_router: RouterId,
    ) -> Self {
        assert!(!peers.is_empty(), "tunnel needs at least one hop");

        let mut hops = Self::assemble(&mut rng, peers);

        for i in 0..hops.len() - 1 {
            hops[i].next_router = hops[i + 1].router;
        }

        let last = hops.len() - 1;
        hops[last].next_router = local_router;
        hops[last].next_tunnel_id = TunnelId::from(rng.next_u32());

        Self { hops }
    }

    /// Create the chain of an outbound tunnel: we are the gateway, the
    /// last hop forwards replies into `reply_gateway`/`reply_tunnel_id`,
    /// the gateway side of one of our inbound tunnels.
    ///
    /// Panics if `peers` is empty.
    pub fn outbound(
        mut rng: impl RngCore + CryptoRng,
        peers: Vec<(RouterId, ElGamalPublicKey)>,
        reply_gateway: RouterId,
        reply_tunnel_id: TunnelId,
    ) -> Self {
        assert!(!peers.is_empty(), "tunnel needs at least one hop");

        let mut hops = Self::assemble(&mut rng, peers);

        for i in 0..hops.len() - 1 {
            hops[i].next_router = hops[i + 1].router;
        }

        let last = hops.len() - 1;
        hops[0].is_gateway = false;
        hops[last].next_router = reply_gateway;
        hops[last].next_tunnel_id = reply_tunnel_id;

        Self { hops }
    }

    /// Is this the chain of an inbound tunnel?
    ///
    /// Derived from the first hop's gateway role: an inbound tunnel's
    /// entry point is a remote gateway, an outbound tunnel's is us.
    pub fn is_inbound(&self) -> bool {
        self.hops.first().map(|hop| hop.is_gateway).unwrap_or(false)
    }

    /// Tunnel ID at the local router, the receive side of an inbound
    /// tunnel.
    pub fn receive_tunnel_id(&self) -> TunnelId {
        self.hops.last().map(|hop| hop.next_tunnel_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ElGamalPrivateKey;
    use rand_core::OsRng;

    fn peers(count: usize) -> Vec<(RouterId, ElGamalPublicKey)> {
        (0..count)
            .map(|i| {
                (
                    RouterId::from([i as u8 + 1; 32]),
                    ElGamalPrivateKey::random(OsRng).public(),
                )
            })
            .collect()
    }

    #[test]
    fn inbound_chain_roles_and_links() {
        let local = RouterId::from([0xee; 32]);
        let config = TunnelConfig::inbound(OsRng, peers(3), local);

        assert!(config.is_inbound());
        assert!(config.hops[0].is_gateway);
        assert!(!config.hops[1].is_gateway);
        assert!(config.hops[2].is_endpoint);

        assert_eq!(config.hops[0].next_router, config.hops[1].router);
        assert_eq!(config.hops[0].next_tunnel_id, config.hops[1].tunnel_id);
        assert_eq!(config.hops[2].next_router, local);
    }

    #[test]
    fn outbound_chain_reply_link() {
        let reply_gateway = RouterId::from([0xdd; 32]);
        let config =
            TunnelConfig::outbound(OsRng, peers(2), reply_gateway, TunnelId::from(777));

        assert!(!config.is_inbound());
        assert!(!config.hops[0].is_gateway);
        assert!(config.hops[1].is_endpoint);
        assert_eq!(config.hops[1].next_router, reply_gateway);
        assert_eq!(config.hops[1].next_tunnel_id, TunnelId::from(777));
    }
}
