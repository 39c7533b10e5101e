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

use crate::crypto::{base64_encode, ElGamalPublicKey};

use alloc::{sync::Arc, vec::Vec};
use core::{cmp::Ordering, fmt, ops::Deref, time::Duration};

/// 32-byte identity hash of a router or destination.
///
/// Ordered lexicographically; [`RouterId::xor_metric()`] gives the Kademlia
/// distance between two hashes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterId([u8; 32]);

impl RouterId {
    /// Length of the identity hash.
    pub const LEN: usize = 32;

    /// Create [`RouterId`] from `bytes`.
    ///
    /// Returns `None` if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    /// Element-wise XOR of two identity hashes.
    pub fn xor_metric(&self, other: &RouterId) -> [u8; 32] {
        let mut distance = [0u8; 32];

        for (i, byte) in distance.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        distance
    }

    /// First 16 bytes of the hash, used to address tunnel build records.
    pub fn truncated(&self) -> &[u8] {
        &self.0[..16]
    }
}

impl From<[u8; 32]> for RouterId {
    fn from(value: [u8; 32]) -> Self {
        RouterId(value)
    }
}

impl AsRef<[u8]> for RouterId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialOrd for RouterId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouterId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base64_encode(&self.0[..8]))
    }
}

/// Tunnel ID.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u32);

impl TunnelId {
    #[cfg(test)]
    pub fn random() -> TunnelId {
        use rand::RngCore;

        TunnelId::from(rand::thread_rng().next_u32())
    }
}

impl From<u32> for TunnelId {
    fn from(value: u32) -> Self {
        TunnelId(value)
    }
}

impl From<TunnelId> for u32 {
    fn from(value: TunnelId) -> Self {
        value.0
    }
}

impl Deref for TunnelId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message ID.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

impl MessageId {
    #[cfg(test)]
    pub fn random() -> MessageId {
        use rand::RngCore;

        MessageId::from(rand::thread_rng().next_u32())
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        MessageId(value)
    }
}

impl From<MessageId> for u32 {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

impl Deref for MessageId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound tunnel of a destination, as published in a lease-set.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Gateway router of the inbound tunnel.
    pub gateway: RouterId,

    /// Tunnel ID at the gateway.
    pub tunnel_id: TunnelId,

    /// Expiration, milliseconds since Unix epoch.
    pub expires: Duration,
}

impl Lease {
    /// Has the lease expired at wall-clock time `now`?
    pub fn is_expired(&self, now: Duration) -> bool {
        self.expires <= now
    }
}

/// Signed descriptor naming a destination's current inbound tunnels.
///
/// The core treats the signed byte representation as opaque; only the
/// destination hash and the lease expirations are interpreted.
#[derive(Debug, Clone)]
pub struct LeaseSet {
    /// Hash of the destination the lease-set belongs to.
    pub destination: RouterId,

    /// Leases.
    pub leases: Vec<Lease>,

    /// Raw signed lease-set bytes, as stored into the network database.
    pub serialized: Vec<u8>,
}

impl LeaseSet {
    /// Does the lease-set contain at least one lease that has
    /// not expired at wall-clock time `now`?
    pub fn has_unexpired_lease(&self, now: Duration) -> bool {
        self.leases.iter().any(|lease| !lease.is_expired(now))
    }
}

/// Remote party a garlic routing session encrypts to.
///
/// Either a leaf destination (eepsite, client) or a plain router; the
/// distinction selects the delivery type of the wrapped clove.
pub trait RoutingDestination: Send + Sync {
    /// Identity hash.
    fn ident_hash(&self) -> RouterId;

    /// ElGamal encryption key.
    fn encryption_key(&self) -> &ElGamalPublicKey;

    /// `true` for leaf destinations, `false` for routers.
    fn is_destination(&self) -> bool;
}

/// Plain [`RoutingDestination`] assembled from its parts.
pub struct StaticDestination {
    /// Identity hash.
    pub hash: RouterId,

    /// ElGamal encryption key.
    pub encryption_key: ElGamalPublicKey,

    /// `true` for leaf destinations.
    pub is_destination: bool,
}

impl RoutingDestination for StaticDestination {
    fn ident_hash(&self) -> RouterId {
        self.hash
    }

    fn encryption_key(&self) -> &ElGamalPublicKey {
        &self.encryption_key
    }

    fn is_destination(&self) -> bool {
        self.is_destination
    }
}

/// Shared handle to a [`RoutingDestination`].
pub type DestinationHandle = Arc<dyn RoutingDestination>;
