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

//! Outbound garlic routing session.
//!
//! One session per remote destination. The session owns the AES session
//! key, the FIFO pool of outbound tags and the batches of freshly minted
//! tags that are riding inside unacknowledged garlic messages. A tag
//! batch only enters the pool once the delivery status that traveled with
//! it comes back.

use crate::{
    crypto::{aes::AesCbc, sha256::Sha256, SessionKey},
    error::SessionError,
    garlic::{
        registry::InboundTagTable, Clove, DeliveryInstructions, ElGamalBlock, GarlicPayload,
        SessionTag, LEASESET_CONFIRMATION_TIMEOUT, LOG_TARGET, OUTGOING_TAGS_EXPIRATION_TIMEOUT,
    },
    i2np::{
        database::store::{DatabaseStore, ReplyType},
        delivery_status::DeliveryStatus,
        Message, MessageBuilder, MessageType,
    },
    primitives::DestinationHandle,
    router::RouterContext,
    runtime::Runtime,
};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use rand_core::RngCore;

use alloc::{collections::VecDeque, vec::Vec};
use core::{marker::PhantomData, time::Duration};

/// Lifetime of a garlic message and its cloves.
const GARLIC_MESSAGE_EXPIRATION: Duration = Duration::from_secs(5);

/// Lease-set publication state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSetUpdateStatus {
    /// The session never piggybacks our lease-set.
    DoNotSend,

    /// The lease-set changed and rides along with the next message.
    Updated,

    /// The lease-set was embedded and awaits its delivery status.
    Submitted,

    /// The remote has confirmed the current lease-set.
    UpToDate,
}

/// Batch of tags riding inside an unacknowledged garlic message.
struct UnconfirmedTags {
    /// The tags.
    tags: Vec<SessionTag>,

    /// When the batch was generated, wall clock.
    created: Duration,
}

/// Mutable session state, serialized under one lock.
struct SessionState {
    /// Outbound tag pool, oldest first, each tag with its creation time.
    tags: VecDeque<(SessionTag, Duration)>,

    /// Tag batches keyed by the garlic message ID that carries them.
    unconfirmed: hashbrown::HashMap<u32, UnconfirmedTags>,

    /// Lease-set publication state.
    lease_set_status: LeaseSetUpdateStatus,

    /// Message ID of the garlic message carrying the submitted lease-set.
    lease_set_update_msg_id: u32,

    /// When the lease-set was last submitted, wall clock.
    lease_set_submission_time: Duration,
}

/// Result of wrapping a message.
pub struct WrapOutcome {
    /// The outer Garlic I2NP message.
    pub message: Message,

    /// Payload message ID awaiting a delivery-status acknowledgement,
    /// set when the message carries a delivery-status clove.
    pub ack_message_id: Option<u32>,
}

/// Outbound garlic routing session.
pub struct GarlicRoutingSession<R: Runtime> {
    /// Remote destination; `None` for one-shot reply sessions.
    destination: Option<DestinationHandle>,

    /// AES-256 session key, fixed for the session's lifetime.
    session_key: SessionKey,

    /// Tags to generate per replenishment batch.
    num_tags: usize,

    /// Mutable state.
    state: Mutex<SessionState>,

    /// Marker for `Runtime`.
    _runtime: PhantomData<R>,
}

impl<R: Runtime> GarlicRoutingSession<R> {
    /// Create new [`GarlicRoutingSession`] to `destination`.
    ///
    /// `attach_lease_set` arms the lease-set piggybacking state machine.
    pub fn new(destination: DestinationHandle, num_tags: usize, attach_lease_set: bool) -> Self {
        Self {
            destination: Some(destination),
            session_key: SessionKey::random(R::rng()),
            num_tags,
            state: Mutex::new(SessionState {
                tags: VecDeque::new(),
                unconfirmed: hashbrown::HashMap::new(),
                lease_set_status: if attach_lease_set {
                    LeaseSetUpdateStatus::Updated
                } else {
                    LeaseSetUpdateStatus::DoNotSend
                },
                lease_set_update_msg_id: 0u32,
                lease_set_submission_time: Duration::ZERO,
            }),
            _runtime: PhantomData,
        }
    }

    /// Create a one-shot session over an already shared `key`/`tag` pair.
    ///
    /// Used for the delivery-status reply: the receiving side learns the
    /// pair from our inbound tag table, not from an ElGamal block.
    pub fn new_one_shot(key: SessionKey, tag: SessionTag) -> Self {
        let mut tags = VecDeque::new();
        tags.push_back((tag, Duration::MAX));

        Self {
            destination: None,
            session_key: key,
            num_tags: 0usize,
            state: Mutex::new(SessionState {
                tags,
                unconfirmed: hashbrown::HashMap::new(),
                lease_set_status: LeaseSetUpdateStatus::DoNotSend,
                lease_set_update_msg_id: 0u32,
                lease_set_submission_time: Duration::ZERO,
            }),
            _runtime: PhantomData,
        }
    }

    /// Number of tags currently in the pool.
    pub fn num_pool_tags(&self) -> usize {
        self.state.lock().tags.len()
    }

    #[cfg(test)]
    fn insert_tag(&self, tag: SessionTag, created: Duration) {
        self.state.lock().tags.push_back((tag, created));
    }

    /// Current lease-set state.
    pub fn lease_set_status(&self) -> LeaseSetUpdateStatus {
        self.state.lock().lease_set_status
    }

    /// Arm the lease-set for re-publication.
    pub fn set_lease_set_updated(&self) {
        let mut state = self.state.lock();

        if state.lease_set_status != LeaseSetUpdateStatus::DoNotSend {
            state.lease_set_status = LeaseSetUpdateStatus::Updated;
        }
    }

    /// Wrap `message` into a Garlic I2NP message for the session's
    /// destination.
    ///
    /// `tag_table` is the owner's inbound tag table; `None` marks an
    /// ownerless (one-shot) session which neither replenishes tags nor
    /// piggybacks cloves.
    pub fn wrap_single_message(
        &self,
        message: &Message,
        ctx: &RouterContext<R>,
        tag_table: Option<&InboundTagTable>,
    ) -> crate::Result<WrapOutcome> {
        let mut rng = R::rng();
        let now = R::time_since_epoch();
        let mut state = self.state.lock();

        // a submitted lease-set that was never confirmed is retried
        if state.lease_set_status == LeaseSetUpdateStatus::Submitted
            && now > state.lease_set_submission_time + LEASESET_CONFIRMATION_TIMEOUT
        {
            state.lease_set_status = LeaseSetUpdateStatus::Updated;
        }

        // drop expired tags from the front so consumption stays FIFO over
        // live tags only
        while state
            .tags
            .front()
            .is_some_and(|(_, created)| now.saturating_sub(*created) >= OUTGOING_TAGS_EXPIRATION_TIMEOUT)
        {
            state.tags.pop_front();
        }

        // envelope selection: a live tag means existing-session framing,
        // otherwise fall back to an ElGamal block
        let consumed_tag = state.tags.pop_front().map(|(tag, _)| tag);
        if consumed_tag.is_none() && self.destination.is_none() {
            return Err(SessionError::NoDestination.into());
        }

        // replenish the tag pool through the next garlic message
        let new_tags = match tag_table.is_some()
            && self.num_tags > 0
            && state.tags.len() <= self.num_tags * 2 / 3
        {
            true => {
                let tags = (0..self.num_tags)
                    .map(|_| SessionTag::random(&mut rng))
                    .collect::<Vec<_>>();

                Some(tags)
            }
            false => None,
        };

        let payload_msg_id = rng.next_u32();
        let expiration = now + GARLIC_MESSAGE_EXPIRATION;
        let mut cloves = Vec::with_capacity(3);
        let mut ack_message_id = None;

        if let Some(tag_table) = tag_table {
            // an acknowledgement is needed when the message carries fresh
            // tags or our lease-set
            if new_tags.is_some() || state.lease_set_status == LeaseSetUpdateStatus::Updated {
                match self.create_delivery_status_clove(
                    ctx,
                    tag_table,
                    payload_msg_id,
                    expiration,
                ) {
                    Some(clove) => {
                        cloves.push(clove);
                        ack_message_id = Some(payload_msg_id);
                    }
                    None => tracing::warn!(
                        target: LOG_TARGET,
                        "no inbound tunnel for delivery status, sending unacknowledged",
                    ),
                }
            }

            if state.lease_set_status == LeaseSetUpdateStatus::Updated {
                match self.create_lease_set_clove(ctx, now, expiration, &mut rng) {
                    Some(clove) => {
                        cloves.push(clove);
                        state.lease_set_status = LeaseSetUpdateStatus::Submitted;
                        state.lease_set_update_msg_id = payload_msg_id;
                        state.lease_set_submission_time = now;
                    }
                    None => tracing::debug!(
                        target: LOG_TARGET,
                        "no local lease-set to attach",
                    ),
                }
            }
        }

        // the caller's message, addressed to the destination itself when
        // the remote is a leaf destination
        cloves.push(Clove {
            delivery_instructions: match &self.destination {
                Some(destination) if destination.is_destination() =>
                    DeliveryInstructions::Destination {
                        hash: destination
                            .ident_hash()
                            .as_ref()
                            .try_into()
                            .expect("32 bytes"),
                    },
                _ => DeliveryInstructions::Local,
            },
            message: message.serialize(),
            clove_id: rng.next_u32(),
            expiration,
        });

        if let Some(tags) = &new_tags {
            state.unconfirmed.insert(
                payload_msg_id,
                UnconfirmedTags {
                    tags: tags.clone(),
                    created: now,
                },
            );
        }

        let payload = GarlicPayload::serialize(&cloves, payload_msg_id, expiration);
        let aes_block = self.serialize_aes_block(new_tags.as_deref().unwrap_or(&[]), &payload);

        // existing-session framing is the consumed tag, new-session
        // framing an ElGamal block carrying the session key and pre-IV
        let (prefix, iv) = match consumed_tag {
            Some(tag) => {
                let iv: [u8; 16] =
                    Sha256::digest(tag.as_ref())[..16].try_into().expect("16 bytes");

                (tag.as_ref().to_vec(), iv)
            }
            None => {
                let mut pre_iv = [0u8; 32];
                rng.fill_bytes(&mut pre_iv);
                let iv: [u8; 16] =
                    Sha256::digest(pre_iv)[..16].try_into().expect("16 bytes");

                let block = ElGamalBlock {
                    session_key: self.session_key.clone(),
                    pre_iv,
                };
                let encrypted = self
                    .destination
                    .as_ref()
                    .expect("checked above")
                    .encryption_key()
                    .encrypt(&mut rng, &block.serialize(), true);

                (encrypted, iv)
            }
        };

        let mut garlic = BytesMut::with_capacity(4 + prefix.len() + aes_block.len());
        garlic.put_u32((prefix.len() + aes_block.len()) as u32);
        garlic.put_slice(&prefix);

        let mut aes_block = aes_block;
        AesCbc::new(self.session_key.to_array(), iv)
            .encrypt(&mut aes_block)
            .expect("block padded to a multiple of 16");
        garlic.put_slice(&aes_block);

        Ok(WrapOutcome {
            message: MessageBuilder::new(MessageType::Garlic)
                .with_expiration(expiration)
                .with_payload(garlic.freeze().to_vec())
                .build::<R>(),
            ack_message_id,
        })
    }

    /// Serialize the plaintext AES block:
    /// `tagCount (2) | tag (32)* | payloadSize (4) | payloadHash (32) |
    /// flag (1) | payload | zero padding to a multiple of 16`.
    fn serialize_aes_block(&self, tags: &[SessionTag], payload: &[u8]) -> Vec<u8> {
        let len = 2 + tags.len() * 32 + 4 + 32 + 1 + payload.len();
        let padded = (len + 15) & !15usize;

        let mut out = BytesMut::with_capacity(padded);
        out.put_u16(tags.len() as u16);
        for tag in tags {
            out.put_slice(tag.as_ref());
        }
        out.put_u32(payload.len() as u32);
        out.put_slice(&Sha256::digest(payload));
        out.put_u8(0u8);
        out.put_slice(payload);
        out.put_bytes(0u8, padded - len);

        out.freeze().to_vec()
    }

    /// Create the delivery-status clove.
    ///
    /// The status message is wrapped by a one-shot garlic session whose
    /// key and tag are registered with our own inbound tag table, then
    /// addressed to the gateway of one of our inbound tunnels so the
    /// acknowledgement comes back to us anonymously.
    fn create_delivery_status_clove(
        &self,
        ctx: &RouterContext<R>,
        tag_table: &InboundTagTable,
        message_id: u32,
        expiration: Duration,
    ) -> Option<Clove> {
        let tunnel = ctx.tunnel_pool().next_inbound_tunnel()?;
        let mut rng = R::rng();

        let status = MessageBuilder::new(MessageType::DeliveryStatus)
            .with_payload(DeliveryStatus::new::<R>(message_id).serialize().freeze().to_vec())
            .build::<R>();

        let reply_key = SessionKey::random(&mut rng);
        let reply_tag = SessionTag::random(&mut rng);
        tag_table.insert(reply_tag, reply_key.clone(), R::time_since_epoch());

        let one_shot = GarlicRoutingSession::<R>::new_one_shot(reply_key, reply_tag);
        let wrapped = one_shot.wrap_single_message(&status, ctx, None).ok()?;

        Some(Clove {
            delivery_instructions: DeliveryInstructions::Tunnel {
                hash: tunnel.gateway.as_ref().try_into().expect("32 bytes"),
                tunnel_id: tunnel.gateway_tunnel_id.into(),
            },
            message: wrapped.message.serialize(),
            clove_id: rng.next_u32(),
            expiration,
        })
    }

    /// Create the lease-set clove, a locally-delivered `DatabaseStore` of
    /// our current lease-set.
    fn create_lease_set_clove(
        &self,
        ctx: &RouterContext<R>,
        now: Duration,
        expiration: Duration,
        rng: &mut impl RngCore,
    ) -> Option<Clove> {
        let lease_set = ctx.local_lease_set()?;

        let store = DatabaseStore::<R>::serialize_lease_set(
            &lease_set.destination,
            &lease_set,
            ReplyType::None,
            now,
        );

        Some(Clove {
            delivery_instructions: DeliveryInstructions::Local,
            message: MessageBuilder::new(MessageType::DatabaseStore)
                .with_payload(store)
                .build::<R>()
                .serialize(),
            clove_id: rng.next_u32(),
            expiration,
        })
    }

    /// Handle the delivery-status acknowledgement for `message_id`.
    ///
    /// Promotes the tag batch that rode in the acknowledged message and,
    /// when the message also carried the lease-set, marks it confirmed.
    pub fn message_confirmed(&self, message_id: u32) {
        let now = R::time_since_epoch();
        let mut state = self.state.lock();

        if let Some(batch) = state.unconfirmed.remove(&message_id) {
            if now.saturating_sub(batch.created) < OUTGOING_TAGS_EXPIRATION_TIMEOUT {
                let created = batch.created;
                state.tags.extend(batch.tags.into_iter().map(|tag| (tag, created)));
            } else {
                tracing::debug!(
                    target: LOG_TARGET,
                    ?message_id,
                    "confirmed tag batch already expired",
                );
            }
        }

        if state.lease_set_update_msg_id == message_id
            && state.lease_set_status == LeaseSetUpdateStatus::Submitted
        {
            state.lease_set_status = LeaseSetUpdateStatus::UpToDate;
        }

        Self::sweep_tags(&mut state, now);
    }

    /// Drop expired pool tags and unconfirmed batches.
    ///
    /// Returns whether the session is still alive (live tags in the pool
    /// or batches pending confirmation) and the message IDs of expired
    /// batches, whose delivery-status bookkeeping the registry drops.
    pub fn cleanup_expired_tags(&self) -> (bool, Vec<u32>) {
        let now = R::time_since_epoch();
        let mut state = self.state.lock();

        let expired = Self::sweep_tags(&mut state, now);
        let alive = !state.tags.is_empty() || !state.unconfirmed.is_empty();

        (alive, expired)
    }

    fn sweep_tags(state: &mut SessionState, now: Duration) -> Vec<u32> {
        state
            .tags
            .retain(|(_, created)| now.saturating_sub(*created) < OUTGOING_TAGS_EXPIRATION_TIMEOUT);

        let mut expired = Vec::new();
        state.unconfirmed.retain(|message_id, batch| {
            if now.saturating_sub(batch.created) < OUTGOING_TAGS_EXPIRATION_TIMEOUT {
                return true;
            }

            expired.push(*message_id);
            false
        });

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::ElGamalPrivateKey,
        primitives::{RouterId, StaticDestination},
        router::mocks::{MockTransport, MockTunnelPool},
        runtime::mock::MockRuntime,
        tunnel::pool::InboundTunnelInfo,
    };
    use alloc::sync::Arc;
    use rand_core::OsRng;

    fn make_ctx(with_inbound_tunnel: bool) -> RouterContext<MockRuntime> {
        let mut pool = MockTunnelPool::default();
        if with_inbound_tunnel {
            pool.inbound.push(InboundTunnelInfo {
                gateway: RouterId::from([0x99; 32]),
                gateway_tunnel_id: crate::primitives::TunnelId::from(4242),
            });
        }

        RouterContext::new(
            RouterId::from([0x42; 32]),
            ElGamalPrivateKey::random(OsRng),
            Arc::new(MockTransport::default()),
            Arc::new(pool),
        )
    }

    fn make_destination(key: &ElGamalPrivateKey) -> DestinationHandle {
        Arc::new(StaticDestination {
            hash: RouterId::from([0x24; 32]),
            encryption_key: key.public(),
            is_destination: true,
        })
    }

    #[test]
    fn empty_pool_uses_elgamal_framing() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            false,
        );
        let ctx = make_ctx(false);
        let tag_table = InboundTagTable::new();

        let message = MessageBuilder::new(MessageType::Data)
            .with_payload(alloc::vec![1, 2, 3])
            .build::<MockRuntime>();

        let outcome = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();
        assert_eq!(outcome.message.message_type, MessageType::Garlic);

        // new-session framing: a 514-byte elgamal block after the length
        let length =
            u32::from_be_bytes(outcome.message.payload[..4].try_into().unwrap()) as usize;
        assert_eq!(length + 4, outcome.message.payload.len());
        assert!(length >= 514);

        let block = remote_key
            .decrypt(&outcome.message.payload[4..518], true)
            .expect("elgamal block");
        let block = ElGamalBlock::parse(&block);

        let mut aes = outcome.message.payload[518..].to_vec();
        let iv: [u8; 16] = Sha256::digest(block.pre_iv)[..16].try_into().unwrap();
        AesCbc::new(block.session_key.to_array(), iv).decrypt(&mut aes).unwrap();

        // tag batch rides in the block; 4-tag session generates 4
        let tag_count = u16::from_be_bytes(aes[..2].try_into().unwrap());
        assert_eq!(tag_count, 4);
    }

    #[test]
    fn one_shot_without_tag_fails() {
        let session = GarlicRoutingSession::<MockRuntime>::new_one_shot(
            SessionKey::from([1u8; 32]),
            SessionTag::from([2u8; 32]),
        );
        let ctx = make_ctx(false);

        let message = MessageBuilder::new(MessageType::Data).build::<MockRuntime>();

        // the single tag is consumed by the first wrap
        assert!(session.wrap_single_message(&message, &ctx, None).is_ok());
        assert!(core::matches!(
            session.wrap_single_message(&message, &ctx, None),
            Err(crate::Error::Session(SessionError::NoDestination))
        ));
    }

    #[test]
    fn lease_set_state_machine() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            true,
        );
        assert_eq!(session.lease_set_status(), LeaseSetUpdateStatus::Updated);

        let ctx = make_ctx(true);
        ctx.set_local_lease_set(crate::primitives::LeaseSet {
            destination: RouterId::from([0x24; 32]),
            leases: alloc::vec![crate::primitives::Lease {
                gateway: RouterId::from([0x99; 32]),
                tunnel_id: crate::primitives::TunnelId::from(4242),
                expires: MockRuntime::time_since_epoch() + Duration::from_secs(600),
            }],
            serialized: alloc::vec![0xab; 64],
        });
        let tag_table = InboundTagTable::new();

        let message = MessageBuilder::new(MessageType::Data).build::<MockRuntime>();
        let outcome = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();

        assert_eq!(session.lease_set_status(), LeaseSetUpdateStatus::Submitted);
        let ack_id = outcome.ack_message_id.unwrap();

        // matching confirmation flips the state and promotes the tags
        session.message_confirmed(ack_id);
        assert_eq!(session.lease_set_status(), LeaseSetUpdateStatus::UpToDate);
        assert_eq!(session.num_pool_tags(), 4);

        // a new update re-arms the machine
        session.set_lease_set_updated();
        assert_eq!(session.lease_set_status(), LeaseSetUpdateStatus::Updated);
    }

    #[test]
    fn tags_not_usable_before_confirmation() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            false,
        );
        let ctx = make_ctx(true);
        let tag_table = InboundTagTable::new();

        let message = MessageBuilder::new(MessageType::Data).build::<MockRuntime>();

        let first = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();
        assert!(first.ack_message_id.is_some());
        assert_eq!(session.num_pool_tags(), 0);

        // second message before the ack still uses elgamal framing
        let second = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();
        let length = u32::from_be_bytes(second.message.payload[..4].try_into().unwrap());
        assert!(length >= 514);

        // confirmation promotes the first batch to the pool
        session.message_confirmed(first.ack_message_id.unwrap());
        assert_eq!(session.num_pool_tags(), 4);

        // steady state: the pool head becomes the message prefix
        let third = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();
        assert_eq!(session.num_pool_tags(), 3);

        let length = u32::from_be_bytes(third.message.payload[..4].try_into().unwrap());
        assert_eq!(length as usize + 4, third.message.payload.len());
        assert!((length as usize) < 514);
    }

    #[test]
    fn duplicate_confirmation_is_idempotent() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            false,
        );
        let ctx = make_ctx(true);
        let tag_table = InboundTagTable::new();

        let message = MessageBuilder::new(MessageType::Data).build::<MockRuntime>();
        let outcome = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();
        let ack_id = outcome.ack_message_id.unwrap();

        session.message_confirmed(ack_id);
        assert_eq!(session.num_pool_tags(), 4);

        session.message_confirmed(ack_id);
        assert_eq!(session.num_pool_tags(), 4);
    }

    #[test]
    fn expired_tag_falls_back_to_elgamal() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            false,
        );
        let ctx = make_ctx(true);
        let tag_table = InboundTagTable::new();

        // a single tag, already past the outgoing expiration
        session.insert_tag(
            SessionTag::from([0x55; 32]),
            MockRuntime::time_since_epoch()
                .saturating_sub(OUTGOING_TAGS_EXPIRATION_TIMEOUT + Duration::from_secs(1)),
        );

        let message = MessageBuilder::new(MessageType::Data).build::<MockRuntime>();
        let outcome = session.wrap_single_message(&message, &ctx, Some(&tag_table)).unwrap();

        // the pool was effectively empty so framing is an elgamal block
        let length = u32::from_be_bytes(outcome.message.payload[..4].try_into().unwrap());
        assert!(length as usize >= 514);
        assert_eq!(session.num_pool_tags(), 0);
    }

    #[test]
    fn dead_session_reported_by_cleanup() {
        let remote_key = ElGamalPrivateKey::random(OsRng);
        let session = GarlicRoutingSession::<MockRuntime>::new(
            make_destination(&remote_key),
            4,
            false,
        );

        let (alive, expired) = session.cleanup_expired_tags();
        assert!(!alive);
        assert!(expired.is_empty());
    }
}
