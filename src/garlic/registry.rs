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

//! Routing-session registry and the inbound garlic path.
//!
//! One [`SessionManager`] per local destination. Outbound it caches one
//! session per remote destination; inbound it owns the tag table that
//! selects the AES state for received garlic messages, falling back to an
//! ElGamal decryption when no tag matches.

use crate::{
    crypto::{aes::AesCbc, sha256::Sha256, SessionKey},
    error::SessionError,
    garlic::{
        session::{GarlicRoutingSession, WrapOutcome},
        DeliveryInstructions, ElGamalBlock, GarlicPayload, SessionTag, ELGAMAL_BLOCK_LEN,
        INCOMING_TAGS_EXPIRATION_TIMEOUT, LOG_TARGET, SESSION_TAG_LEN,
    },
    i2np::{delivery_status::DeliveryStatus, Message, MessageType},
    primitives::{DestinationHandle, RouterId, TunnelId},
    router::RouterContext,
    runtime::Runtime,
};

use hashbrown::HashMap;
use parking_lot::Mutex;

use alloc::{sync::Arc, vec::Vec};
use core::time::Duration;

/// Tags per batch when the session piggybacks our lease-set.
const NUM_TAGS_WITH_LEASESET: usize = 40;

/// Tags per batch for plain sessions.
const NUM_TAGS_DEFAULT: usize = 4;

/// Decryption state associated with an inbound tag.
struct TagContext {
    /// AES session key.
    key: SessionKey,

    /// When the tag was learned, wall clock.
    created: Duration,
}

/// Inbound tag table: `tag -> AES state`, shared by all sessions of a
/// destination.
///
/// A tag is removed the moment it is looked up, successful decryption or
/// not, so a replayed message can never decrypt twice.
pub struct InboundTagTable {
    /// Tags and their decryption state.
    tags: Mutex<HashMap<SessionTag, TagContext>>,
}

impl InboundTagTable {
    /// Create new [`InboundTagTable`].
    pub fn new() -> Self {
        Self {
            tags: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `tag` with decryption state `key`.
    pub fn insert(&self, tag: SessionTag, key: SessionKey, now: Duration) {
        self.tags.lock().insert(tag, TagContext { key, created: now });
    }

    /// Look up and consume `tag`.
    pub fn take(&self, tag: &SessionTag) -> Option<SessionKey> {
        self.tags.lock().remove(tag).map(|context| context.key)
    }

    /// Number of live tags.
    pub fn len(&self) -> usize {
        self.tags.lock().len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.tags.lock().is_empty()
    }

    /// Drop tags older than the incoming-tag expiration.
    pub fn sweep(&self, now: Duration) {
        self.tags.lock().retain(|_, context| {
            now.saturating_sub(context.created) < INCOMING_TAGS_EXPIRATION_TIMEOUT
        });
    }
}

/// Per-destination routing-session registry.
pub struct SessionManager<R: Runtime> {
    /// Router context.
    ctx: RouterContext<R>,

    /// Outbound sessions, one per remote destination.
    sessions: Mutex<HashMap<RouterId, Arc<GarlicRoutingSession<R>>>>,

    /// Inbound tag table.
    tag_table: InboundTagTable,

    /// Garlic message IDs awaiting a delivery status, mapped to the
    /// session that sent them.
    created_sessions: Mutex<HashMap<u32, RouterId>>,

    /// When the inbound tag table was last swept, wall clock.
    last_tag_sweep: Mutex<Duration>,
}

impl<R: Runtime> SessionManager<R> {
    /// Create new [`SessionManager`].
    pub fn new(ctx: RouterContext<R>) -> Self {
        Self {
            ctx,
            sessions: Mutex::new(HashMap::new()),
            tag_table: InboundTagTable::new(),
            created_sessions: Mutex::new(HashMap::new()),
            last_tag_sweep: Mutex::new(Duration::ZERO),
        }
    }

    /// Get the inbound tag table.
    pub fn tag_table(&self) -> &InboundTagTable {
        &self.tag_table
    }

    /// Number of cached outbound sessions.
    pub fn num_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Get the session for `destination`, if one exists.
    pub fn session(&self, destination: &RouterId) -> Option<Arc<GarlicRoutingSession<R>>> {
        self.sessions.lock().get(destination).cloned()
    }

    /// Wrap `message` for `destination`, creating a session on first use.
    pub fn wrap_message(
        &self,
        destination: DestinationHandle,
        message: &Message,
        attach_lease_set: bool,
    ) -> crate::Result<Message> {
        let hash = destination.ident_hash();

        let session = {
            let mut sessions = self.sessions.lock();

            Arc::clone(sessions.entry(hash).or_insert_with(|| {
                tracing::debug!(
                    target: LOG_TARGET,
                    destination = %hash,
                    ?attach_lease_set,
                    "creating routing session",
                );

                Arc::new(GarlicRoutingSession::new(
                    destination.clone(),
                    if attach_lease_set {
                        NUM_TAGS_WITH_LEASESET
                    } else {
                        NUM_TAGS_DEFAULT
                    },
                    attach_lease_set,
                ))
            }))
        };

        let WrapOutcome {
            message,
            ack_message_id,
        } = session.wrap_single_message(message, &self.ctx, Some(&self.tag_table))?;

        if let Some(ack_message_id) = ack_message_id {
            self.created_sessions.lock().insert(ack_message_id, hash);
        }

        Ok(message)
    }

    /// Arm every session for lease-set re-publication.
    pub fn set_lease_set_updated(&self) {
        for session in self.sessions.lock().values() {
            session.set_lease_set_updated();
        }
    }

    /// Handle a received garlic message.
    ///
    /// Returns the inner messages destined for local dispatch; tunnel
    /// cloves are forwarded through an outbound tunnel as a side effect
    /// and delivery-status cloves are consumed for session confirmation.
    pub fn handle_garlic_message(
        &self,
        message: &Message,
        from_inbound_tunnel: bool,
    ) -> crate::Result<Vec<Message>> {
        let now = R::time_since_epoch();
        self.maybe_sweep_tags(now);

        tracing::trace!(
            target: LOG_TARGET,
            message_id = ?message.message_id,
            ?from_inbound_tunnel,
            "handle garlic message",
        );

        let payload = &message.payload;
        if payload.len() < 4 {
            return Err(crate::Error::InvalidData);
        }

        let length = u32::from_be_bytes(payload[..4].try_into().expect("4 bytes")) as usize;
        if length + 4 > payload.len() {
            tracing::warn!(
                target: LOG_TARGET,
                ?length,
                actual = ?payload.len(),
                "garlic message length field exceeds buffer",
            );
            return Err(crate::Error::InvalidData);
        }
        let body = &payload[4..4 + length];

        // session-tag lookup first, ElGamal bootstrap as the fallback;
        // the tag is gone after the lookup no matter what happens next
        let (key, iv, encrypted_offset) = match body
            .get(..SESSION_TAG_LEN)
            .and_then(SessionTag::from_bytes)
            .and_then(|tag| self.tag_table.take(&tag).map(|key| (tag, key)))
        {
            Some((tag, key)) => {
                let iv: [u8; 16] =
                    Sha256::digest(tag.as_ref())[..16].try_into().expect("16 bytes");

                (key, iv, SESSION_TAG_LEN)
            }
            None => {
                if body.len() < ELGAMAL_BLOCK_LEN {
                    tracing::debug!(
                        target: LOG_TARGET,
                        len = ?body.len(),
                        "unknown tag and no room for an elgamal block",
                    );
                    return Err(SessionError::UnknownTag.into());
                }

                let block = self
                    .ctx
                    .private_key()
                    .decrypt(&body[..ELGAMAL_BLOCK_LEN], true)
                    .ok_or(crate::Error::Crypto(crate::error::CryptoError::ElGamal))?;
                let block = ElGamalBlock::parse(&block);

                let iv: [u8; 16] =
                    Sha256::digest(block.pre_iv)[..16].try_into().expect("16 bytes");

                (block.session_key, iv, ELGAMAL_BLOCK_LEN)
            }
        };

        let mut decrypted = body[encrypted_offset..].to_vec();
        if decrypted.is_empty() || decrypted.len() % 16 != 0 {
            return Err(SessionError::Malformed.into());
        }
        AesCbc::new(key.to_array(), iv).decrypt(&mut decrypted)?;

        let payload = self.parse_aes_block(&key, &decrypted, now)?;
        self.handle_cloves(&payload)
    }

    /// Parse the decrypted AES block, absorb the enclosed tags and verify
    /// the payload hash.
    fn parse_aes_block(
        &self,
        key: &SessionKey,
        decrypted: &[u8],
        now: Duration,
    ) -> crate::Result<GarlicPayload> {
        if decrypted.len() < 2 {
            return Err(SessionError::Malformed.into());
        }

        let tag_count = u16::from_be_bytes(decrypted[..2].try_into().expect("2 bytes")) as usize;
        let tags_end = 2 + tag_count * SESSION_TAG_LEN;
        if decrypted.len() < tags_end + 4 + 32 + 1 {
            return Err(SessionError::Malformed.into());
        }

        // every enclosed tag selects the decryption state just used
        for tag in decrypted[2..tags_end].chunks(SESSION_TAG_LEN) {
            self.tag_table.insert(
                SessionTag::from_bytes(tag).expect("32 bytes"),
                key.clone(),
                now,
            );
        }

        let payload_size = u32::from_be_bytes(
            decrypted[tags_end..tags_end + 4].try_into().expect("4 bytes"),
        ) as usize;
        let payload_hash = &decrypted[tags_end + 4..tags_end + 36];
        let flag = decrypted[tags_end + 36];

        let payload_start = match flag {
            0 => tags_end + 37,
            _ => tags_end + 37 + SESSION_TAG_LEN,
        };
        if decrypted.len() < payload_start + payload_size {
            return Err(SessionError::Malformed.into());
        }
        let payload = &decrypted[payload_start..payload_start + payload_size];

        if Sha256::digest(payload) != payload_hash[..] {
            tracing::warn!(
                target: LOG_TARGET,
                "garlic payload hash mismatch",
            );
            return Err(SessionError::PayloadHashMismatch.into());
        }

        GarlicPayload::parse(payload).ok_or(SessionError::Malformed.into())
    }

    /// Dispatch the cloves of a decrypted garlic payload.
    fn handle_cloves(&self, payload: &GarlicPayload) -> crate::Result<Vec<Message>> {
        let mut local = Vec::new();

        for clove in &payload.cloves {
            match &clove.delivery_instructions {
                DeliveryInstructions::Local | DeliveryInstructions::Destination { .. } => {
                    let Some(message) = Message::parse(&clove.message) else {
                        tracing::warn!(
                            target: LOG_TARGET,
                            clove_id = ?clove.clove_id,
                            "discarding malformed clove",
                        );
                        continue;
                    };

                    // delivery statuses close the confirmation loop here
                    if message.message_type == MessageType::DeliveryStatus {
                        self.handle_delivery_status_message(&message);
                    } else {
                        local.push(message);
                    }
                }
                DeliveryInstructions::Router { hash } => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        router = %RouterId::from(*hash),
                        "router delivery for garlic cloves not supported, dropping",
                    );
                }
                DeliveryInstructions::Tunnel { hash, tunnel_id } => {
                    match self.ctx.tunnel_pool().next_outbound_tunnel() {
                        Some(tunnel) => tunnel.send_to_tunnel(
                            &RouterId::from(*hash),
                            TunnelId::from(*tunnel_id),
                            clove.message.clone(),
                        ),
                        None => tracing::warn!(
                            target: LOG_TARGET,
                            "no outbound tunnel for tunnel clove, dropping",
                        ),
                    }
                }
            }
        }

        Ok(local)
    }

    /// Handle a received delivery-status message.
    ///
    /// A duplicate acknowledgement finds no bookkeeping entry and is
    /// silently dropped.
    pub fn handle_delivery_status_message(&self, message: &Message) {
        let Some(status) = DeliveryStatus::parse(&message.payload) else {
            tracing::warn!(
                target: LOG_TARGET,
                "malformed delivery status",
            );
            return;
        };

        let Some(destination) = self.created_sessions.lock().remove(&status.message_id) else {
            tracing::trace!(
                target: LOG_TARGET,
                message_id = ?status.message_id,
                "delivery status for unknown message",
            );
            return;
        };

        if let Some(session) = self.session(&destination) {
            tracing::debug!(
                target: LOG_TARGET,
                message_id = ?status.message_id,
                destination = %destination,
                "garlic message confirmed",
            );
            session.message_confirmed(status.message_id);
        }
    }

    /// Sweep sessions, dropping those with no live tags and nothing
    /// pending confirmation.
    pub fn cleanup_routing_sessions(&self) {
        let mut sessions = self.sessions.lock();
        let mut created = self.created_sessions.lock();

        sessions.retain(|destination, session| {
            let (alive, expired) = session.cleanup_expired_tags();

            for message_id in expired {
                created.remove(&message_id);
            }

            if !alive {
                tracing::debug!(
                    target: LOG_TARGET,
                    destination = %destination,
                    "dropping dead routing session",
                );
            }

            alive
        });
    }

    /// Sweep the inbound tag table, at most once per expiration interval.
    fn maybe_sweep_tags(&self, now: Duration) {
        let mut last_sweep = self.last_tag_sweep.lock();

        if now.saturating_sub(*last_sweep) >= INCOMING_TAGS_EXPIRATION_TIMEOUT {
            self.tag_table.sweep(now);
            *last_sweep = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::ElGamalPrivateKey,
        i2np::{database::store::DatabaseStore, MessageBuilder},
        primitives::{Lease, LeaseSet, StaticDestination},
        router::mocks::{MockOutboundTunnel, MockTransport, MockTunnelPool},
        runtime::mock::MockRuntime,
        tunnel::pool::InboundTunnelInfo,
    };
    use rand_core::OsRng;

    struct TestRouter {
        manager: SessionManager<MockRuntime>,
        outbound: Arc<MockOutboundTunnel>,
        private_key: ElGamalPrivateKey,
        hash: RouterId,
    }

    fn make_router(id: u8) -> TestRouter {
        let private_key = ElGamalPrivateKey::random(OsRng);
        let hash = RouterId::from([id; 32]);
        let outbound = Arc::new(MockOutboundTunnel::default());

        let pool = MockTunnelPool {
            inbound: alloc::vec![InboundTunnelInfo {
                gateway: RouterId::from([id.wrapping_add(1); 32]),
                gateway_tunnel_id: TunnelId::from(id as u32 + 1000),
            }],
            outbound: alloc::vec![Arc::clone(&outbound)],
        };

        let ctx = RouterContext::<MockRuntime>::new(
            hash,
            private_key.clone(),
            Arc::new(MockTransport::default()),
            Arc::new(pool),
        );

        ctx.set_local_lease_set(LeaseSet {
            destination: hash,
            leases: alloc::vec![Lease {
                gateway: RouterId::from([id.wrapping_add(1); 32]),
                tunnel_id: TunnelId::from(id as u32 + 1000),
                expires: MockRuntime::time_since_epoch() + Duration::from_secs(600),
            }],
            serialized: alloc::vec![id; 80],
        });

        TestRouter {
            manager: SessionManager::new(ctx),
            outbound,
            private_key,
            hash,
        }
    }

    fn destination_of(router: &TestRouter) -> DestinationHandle {
        Arc::new(StaticDestination {
            hash: router.hash,
            encryption_key: router.private_key.public(),
            is_destination: true,
        })
    }

    fn data_message(payload: Vec<u8>) -> Message {
        MessageBuilder::new(MessageType::Data).with_payload(payload).build::<MockRuntime>()
    }

    #[test]
    fn first_message_round_trip_with_confirmation() {
        let alice = make_router(1);
        let bob = make_router(2);

        let inner = data_message(alloc::vec![0xaa; 100]);
        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &inner, true)
            .unwrap();
        assert_eq!(garlic.message_type, MessageType::Garlic);

        // bob's tag table learns the 40-tag batch from the elgamal block
        let local = bob.manager.handle_garlic_message(&garlic, true).unwrap();
        assert_eq!(bob.manager.tag_table().len(), 40);

        // the lease-set store and the caller's message dispatch locally
        assert_eq!(local.len(), 2);
        assert_eq!(local[0].message_type, MessageType::DatabaseStore);
        assert!(DatabaseStore::<MockRuntime>::parse(&local[0].payload).is_some());
        assert_eq!(local[1].message_type, MessageType::Data);
        assert_eq!(local[1].payload, alloc::vec![0xaa; 100]);

        // the delivery-status clove went out through bob's outbound tunnel,
        // addressed to the gateway of alice's inbound tunnel
        let ack_garlic = {
            let sent = bob.outbound.sent.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, RouterId::from([2u8; 32]));
            assert_eq!(sent[0].1, TunnelId::from(1001));

            Message::parse(&sent[0].2).unwrap()
        };
        assert_eq!(ack_garlic.message_type, MessageType::Garlic);

        // the acknowledgement decrypts against alice's one-shot tag and
        // confirms the session: tags promoted, lease-set up to date
        let session = alice.manager.session(&bob.hash).unwrap();
        assert_eq!(session.num_pool_tags(), 0);

        assert!(alice.manager.handle_garlic_message(&ack_garlic, true).unwrap().is_empty());
        assert_eq!(session.num_pool_tags(), 40);
        assert_eq!(
            session.lease_set_status(),
            crate::garlic::LeaseSetUpdateStatus::UpToDate
        );
    }

    #[test]
    fn steady_state_uses_tag_framing() {
        let alice = make_router(1);
        let bob = make_router(2);

        // bootstrap and confirm
        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), true)
            .unwrap();
        bob.manager.handle_garlic_message(&garlic, true).unwrap();
        let ack = Message::parse(&bob.outbound.sent.lock()[0].2).unwrap();
        alice.manager.handle_garlic_message(&ack, true).unwrap();

        let session = alice.manager.session(&bob.hash).unwrap();
        assert_eq!(session.num_pool_tags(), 40);

        // steady state: tag framing, pool shrinks by one, no new batch
        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![2, 3]), true)
            .unwrap();
        assert_eq!(session.num_pool_tags(), 39);

        let length = u32::from_be_bytes(garlic.payload[..4].try_into().unwrap());
        assert!((length as usize) < ELGAMAL_BLOCK_LEN);

        let local = bob.manager.handle_garlic_message(&garlic, true).unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].payload, alloc::vec![2, 3]);

        // the consumed tag is gone from bob's table
        assert_eq!(bob.manager.tag_table().len(), 39);
    }

    #[test]
    fn replayed_tag_message_rejected() {
        let alice = make_router(1);
        let bob = make_router(2);

        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), true)
            .unwrap();
        bob.manager.handle_garlic_message(&garlic, true).unwrap();
        let ack = Message::parse(&bob.outbound.sent.lock()[0].2).unwrap();
        alice.manager.handle_garlic_message(&ack, true).unwrap();

        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![9]), true)
            .unwrap();

        assert!(bob.manager.handle_garlic_message(&garlic, true).is_ok());

        // the one-time tag was consumed by the first decryption
        assert!(core::matches!(
            bob.manager.handle_garlic_message(&garlic, true),
            Err(crate::Error::Session(SessionError::UnknownTag))
        ));
    }

    #[test]
    fn tampered_garlic_payload_dropped() {
        let alice = make_router(1);
        let bob = make_router(2);

        let mut garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), false)
            .unwrap();

        // flip a bit inside the aes block
        let index = garlic.payload.len() - 1;
        garlic.payload[index] ^= 0x01;

        assert!(bob.manager.handle_garlic_message(&garlic, true).is_err());
    }

    #[test]
    fn duplicate_ack_silently_dropped() {
        let alice = make_router(1);
        let bob = make_router(2);

        let garlic = alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), true)
            .unwrap();
        bob.manager.handle_garlic_message(&garlic, true).unwrap();
        let ack = Message::parse(&bob.outbound.sent.lock()[0].2).unwrap();

        alice.manager.handle_garlic_message(&ack, true).unwrap();
        let session = alice.manager.session(&bob.hash).unwrap();
        assert_eq!(session.num_pool_tags(), 40);

        // the second copy of the acknowledgement finds no bookkeeping:
        // its one-shot tag is consumed and the status silently dropped
        let _ = alice.manager.handle_garlic_message(&ack, true);
        assert_eq!(session.num_pool_tags(), 40);
    }

    #[test]
    fn session_reused_across_messages() {
        let alice = make_router(1);
        let bob = make_router(2);

        alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), false)
            .unwrap();
        alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![2]), false)
            .unwrap();

        assert_eq!(alice.manager.num_sessions(), 1);
    }

    #[test]
    fn dead_sessions_swept() {
        let alice = make_router(1);
        let bob = make_router(2);

        // session whose only state is an unconfirmed batch is alive;
        // one with nothing at all is dropped
        alice
            .manager
            .wrap_message(destination_of(&bob), &data_message(alloc::vec![1]), false)
            .unwrap();
        alice.manager.cleanup_routing_sessions();
        assert_eq!(alice.manager.num_sessions(), 1);
    }

    #[test]
    fn truncated_garlic_message_rejected() {
        let bob = make_router(2);

        let message = MessageBuilder::new(MessageType::Garlic)
            .with_payload(alloc::vec![0, 0, 10, 0, 1, 2, 3])
            .build::<MockRuntime>();

        assert!(core::matches!(
            bob.manager.handle_garlic_message(&message, false),
            Err(crate::Error::InvalidData)
        ));
    }
}
