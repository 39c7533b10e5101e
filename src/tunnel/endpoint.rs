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

//! Tunnel endpoint: defragmentation and dispatch.
//!
//! The endpoint sees the fully decrypted 1008-byte tunnel data region.
//! Complete messages dispatch immediately; fragmented messages accumulate
//! in `incomplete` strictly in fragment-number order, with at most one
//! out-of-order fragment buffered per message ID (a newer arrival replaces
//! the buffered one).

use crate::{
    error::TunnelError,
    i2np::{
        tunnel::data::{
            DeliveryInstructions, EncryptedTunnelData, FragmentKind, TunnelDataPayload,
        },
        tunnel::gateway::TunnelGateway,
        Message, MessageBuilder, MessageType, I2NP_MAX_MESSAGE_LEN,
    },
    primitives::TunnelId,
    router::RouterContext,
    runtime::{Instant, Runtime},
    tunnel::LOG_TARGET,
};

use hashbrown::HashMap;

use alloc::vec::Vec;
use core::time::Duration;

/// How long an incomplete message waits for its missing fragments.
const REASSEMBLY_EXPIRATION: Duration = Duration::from_secs(45);

/// Message being reassembled.
struct IncompleteMessage<R: Runtime> {
    /// Delivery instructions from the first fragment.
    delivery_instructions: DeliveryInstructions,

    /// Fragments received so far, in order.
    buffer: Vec<u8>,

    /// Fragment number the buffer extends with next.
    next_fragment_number: u8,

    /// When the first fragment arrived.
    created: R::Instant,
}

/// Out-of-order fragment waiting for its predecessors.
struct OutOfSequenceFragment {
    /// Fragment number.
    fragment_number: u8,

    /// Is this the last fragment of the message.
    last: bool,

    /// Fragment payload.
    payload: Vec<u8>,
}

/// Tunnel endpoint reassembly state.
///
/// One instance per tunnel the local router terminates: its own inbound
/// tunnels (`inbound = true`) and outbound transit tunnels it is the
/// endpoint of (`inbound = false`). Locally-delivered messages are
/// returned to the caller, everything else goes straight to transport.
pub struct TunnelEndpoint<R: Runtime> {
    /// Router context.
    ctx: RouterContext<R>,

    /// Does the tunnel terminate at the local router's own pool?
    ///
    /// Router-delivery through an inbound tunnel would let a remote peer
    /// bounce traffic off us anonymously, so it is only honored on
    /// outbound transit tunnels.
    inbound: bool,

    /// Messages being reassembled.
    incomplete: HashMap<u32, IncompleteMessage<R>>,

    /// At most one buffered out-of-order fragment per message.
    out_of_sequence: HashMap<u32, OutOfSequenceFragment>,
}

impl<R: Runtime> TunnelEndpoint<R> {
    /// Create new [`TunnelEndpoint`].
    pub fn new(ctx: RouterContext<R>, inbound: bool) -> Self {
        Self {
            ctx,
            inbound,
            incomplete: HashMap::new(),
            out_of_sequence: HashMap::new(),
        }
    }

    /// Handle the decrypted region of a tunnel data message.
    ///
    /// Returns the reassembled messages destined for the local router;
    /// tunnel- and router-delivered messages are sent to transport as a
    /// side effect.
    pub fn handle_decrypted(&mut self, decrypted: &[u8], iv: &[u8]) -> Vec<Message> {
        self.sweep_expired();

        let Some(fragments) = TunnelDataPayload::parse(decrypted, iv) else {
            tracing::warn!(
                target: LOG_TARGET,
                "malformed tunnel data message",
            );
            return Vec::new();
        };

        let mut local = Vec::new();

        for fragment in fragments {
            match fragment.kind {
                FragmentKind::Unfragmented {
                    delivery_instructions,
                } => self.dispatch(&delivery_instructions, fragment.payload.to_vec(), &mut local),
                FragmentKind::First {
                    message_id,
                    delivery_instructions,
                } => {
                    self.incomplete.insert(
                        message_id,
                        IncompleteMessage {
                            delivery_instructions,
                            buffer: fragment.payload.to_vec(),
                            next_fragment_number: 1,
                            created: R::now(),
                        },
                    );
                    self.drain_out_of_sequence(message_id, &mut local);
                }
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number,
                    last,
                } => self.handle_follow_on(
                    message_id,
                    fragment_number,
                    last,
                    fragment.payload.to_vec(),
                    &mut local,
                ),
            }
        }

        local
    }

    /// Handle an already-parsed [`EncryptedTunnelData`] whose region has
    /// been decrypted in place by the per-hop layer crypto.
    pub fn handle_tunnel_data(&mut self, decrypted: &EncryptedTunnelData<'_>) -> Vec<Message> {
        self.handle_decrypted(decrypted.ciphertext(), decrypted.iv())
    }

    /// Append or buffer a follow-on fragment.
    fn handle_follow_on(
        &mut self,
        message_id: u32,
        fragment_number: u8,
        last: bool,
        payload: Vec<u8>,
        local: &mut Vec<Message>,
    ) {
        match self.incomplete.get_mut(&message_id) {
            Some(message) if message.next_fragment_number == fragment_number => {
                if message.buffer.len() + payload.len() > I2NP_MAX_MESSAGE_LEN {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?message_id,
                        "reassembled message too large, dropping",
                    );
                    self.incomplete.remove(&message_id);
                    self.out_of_sequence.remove(&message_id);
                    return;
                }

                message.buffer.extend_from_slice(&payload);
                message.next_fragment_number += 1;

                if last {
                    self.complete(message_id, local);
                } else {
                    self.drain_out_of_sequence(message_id, local);
                }
            }
            // no first fragment yet or a gap in the sequence
            _ => {
                self.out_of_sequence.insert(
                    message_id,
                    OutOfSequenceFragment {
                        fragment_number,
                        last,
                        payload,
                    },
                );
            }
        }
    }

    /// Extend `incomplete[message_id]` with the buffered out-of-order
    /// fragment for as long as it is the one expected next.
    fn drain_out_of_sequence(&mut self, message_id: u32, local: &mut Vec<Message>) {
        loop {
            let Some(message) = self.incomplete.get_mut(&message_id) else {
                return;
            };

            match self.out_of_sequence.get(&message_id) {
                Some(fragment) if fragment.fragment_number == message.next_fragment_number => {
                    let fragment = self.out_of_sequence.remove(&message_id).expect("checked");

                    if message.buffer.len() + fragment.payload.len() > I2NP_MAX_MESSAGE_LEN {
                        tracing::warn!(
                            target: LOG_TARGET,
                            ?message_id,
                            "reassembled message too large, dropping",
                        );
                        self.incomplete.remove(&message_id);
                        return;
                    }

                    message.buffer.extend_from_slice(&fragment.payload);
                    message.next_fragment_number += 1;

                    if fragment.last {
                        self.complete(message_id, local);
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Dispatch a fully reassembled message.
    fn complete(&mut self, message_id: u32, local: &mut Vec<Message>) {
        let message = self.incomplete.remove(&message_id).expect("complete message");
        self.out_of_sequence.remove(&message_id);

        self.dispatch(&message.delivery_instructions, message.buffer, local);
    }

    /// Dispatch one reassembled I2NP message by its delivery type.
    fn dispatch(
        &mut self,
        delivery_instructions: &DeliveryInstructions,
        message: Vec<u8>,
        local: &mut Vec<Message>,
    ) {
        match delivery_instructions {
            DeliveryInstructions::Local => match Message::parse(&message) {
                Some(message) => local.push(message),
                None => tracing::warn!(
                    target: LOG_TARGET,
                    "discarding malformed local delivery",
                ),
            },
            DeliveryInstructions::Tunnel { tunnel_id, hash } => {
                let gateway = MessageBuilder::new(MessageType::TunnelGateway)
                    .with_payload(
                        TunnelGateway {
                            tunnel_id: TunnelId::from(*tunnel_id),
                            payload: &message,
                        }
                        .serialize(),
                    )
                    .build::<R>();

                self.ctx.transport().send(
                    &crate::primitives::RouterId::from(*hash),
                    gateway.serialize(),
                );
            }
            DeliveryInstructions::Router { hash } => {
                let router = crate::primitives::RouterId::from(*hash);

                if &router == self.ctx.router_id() {
                    match Message::parse(&message) {
                        Some(message) => local.push(message),
                        None => tracing::warn!(
                            target: LOG_TARGET,
                            "discarding malformed local delivery",
                        ),
                    }
                    return;
                }

                if self.inbound {
                    tracing::warn!(
                        target: LOG_TARGET,
                        router = %router,
                        error = %TunnelError::ForwardingDisabled,
                        "router delivery dropped",
                    );
                    return;
                }

                self.ctx.transport().send(&router, message);
            }
        }
    }

    /// Drop reassembly state whose missing fragments never arrived.
    fn sweep_expired(&mut self) {
        let out_of_sequence = &mut self.out_of_sequence;

        self.incomplete.retain(|message_id, message| {
            if message.created.elapsed() < REASSEMBLY_EXPIRATION {
                return true;
            }

            tracing::debug!(
                target: LOG_TARGET,
                ?message_id,
                "incomplete message expired",
            );
            out_of_sequence.remove(message_id);
            false
        });
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.incomplete.is_empty() && self.out_of_sequence.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::ElGamalPrivateKey,
        primitives::RouterId,
        router::mocks::{MockTransport, MockTunnelPool},
        runtime::mock::MockRuntime,
    };
    use alloc::sync::Arc;
    use rand_core::OsRng;

    const OUR_HASH: [u8; 32] = [0x42; 32];

    fn make_endpoint(inbound: bool) -> (TunnelEndpoint<MockRuntime>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let ctx = RouterContext::<MockRuntime>::new(
            RouterId::from(OUR_HASH),
            ElGamalPrivateKey::random(OsRng),
            Arc::clone(&transport) as Arc<dyn crate::router::TransportService>,
            Arc::new(MockTunnelPool::default()),
        );

        (TunnelEndpoint::new(ctx, inbound), transport)
    }

    fn test_message(message_id: u32, payload_len: usize) -> Vec<u8> {
        MessageBuilder::new(MessageType::Data)
            .with_message_id(crate::primitives::MessageId::from(message_id))
            .with_payload(alloc::vec![0xaa; payload_len])
            .build::<MockRuntime>()
            .serialize()
    }

    fn region(fragments: &[(FragmentKind, &[u8])]) -> [u8; 1008] {
        TunnelDataPayload::serialize(OsRng, fragments, &[0x11; 16]).unwrap()
    }

    #[test]
    fn unfragmented_local_dispatch() {
        let (mut endpoint, _) = make_endpoint(true);
        let message = test_message(1, 100);

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Local,
                },
                &message,
            )]),
            &[0x11; 16],
        );

        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].payload, alloc::vec![0xaa; 100]);
        assert!(endpoint.is_idle());
    }

    #[test]
    fn out_of_order_reassembly() {
        // spec scenario: fragments injected in order [1, 0, 2] with sizes
        // [100, 200, 50]; dispatch happens exactly once, after the last
        let (mut endpoint, _) = make_endpoint(true);
        let message_id = 0xcafe_babe;

        let full = test_message(77, 350 - crate::i2np::I2NP_HEADER_LEN);
        let (first, rest) = full.split_at(200);
        let (second, third) = rest.split_at(100);

        assert!(endpoint
            .handle_decrypted(
                &region(&[(
                    FragmentKind::FollowOn {
                        message_id,
                        fragment_number: 1,
                        last: false,
                    },
                    second,
                )]),
                &[0x11; 16],
            )
            .is_empty());

        assert!(endpoint
            .handle_decrypted(
                &region(&[(
                    FragmentKind::First {
                        message_id,
                        delivery_instructions: DeliveryInstructions::Local,
                    },
                    first,
                )]),
                &[0x11; 16],
            )
            .is_empty());

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number: 2,
                    last: true,
                },
                third,
            )]),
            &[0x11; 16],
        );

        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].serialize(), full);
        assert!(endpoint.is_idle());
    }

    #[test]
    fn in_order_reassembly_with_interleaved_traffic() {
        let (mut endpoint, _) = make_endpoint(true);

        let first_msg = test_message(1, 300);
        let second_msg = test_message(2, 120);

        let (a0, a1) = first_msg.split_at(200);
        let (b0, b1) = second_msg.split_at(100);

        assert!(endpoint
            .handle_decrypted(
                &region(&[
                    (
                        FragmentKind::First {
                            message_id: 111,
                            delivery_instructions: DeliveryInstructions::Local,
                        },
                        a0,
                    ),
                    (
                        FragmentKind::First {
                            message_id: 222,
                            delivery_instructions: DeliveryInstructions::Local,
                        },
                        b0,
                    ),
                ]),
                &[0x11; 16],
            )
            .is_empty());

        let dispatched = endpoint.handle_decrypted(
            &region(&[
                (
                    FragmentKind::FollowOn {
                        message_id: 222,
                        fragment_number: 1,
                        last: true,
                    },
                    b1,
                ),
                (
                    FragmentKind::FollowOn {
                        message_id: 111,
                        fragment_number: 1,
                        last: true,
                    },
                    a1,
                ),
            ]),
            &[0x11; 16],
        );

        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0].serialize(), second_msg);
        assert_eq!(dispatched[1].serialize(), first_msg);
        assert!(endpoint.is_idle());
    }

    #[test]
    fn tunnel_delivery_wrapped_in_gateway() {
        let (mut endpoint, transport) = make_endpoint(true);
        let message = test_message(3, 50);

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Tunnel {
                        tunnel_id: 1337,
                        hash: [0x55; 32],
                    },
                },
                &message,
            )]),
            &[0x11; 16],
        );

        assert!(dispatched.is_empty());

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, RouterId::from([0x55; 32]));

        let outer = Message::parse(&sent[0].1).unwrap();
        assert_eq!(outer.message_type, MessageType::TunnelGateway);

        let gateway = TunnelGateway::parse(&outer.payload).unwrap();
        assert_eq!(gateway.tunnel_id, TunnelId::from(1337));
        assert_eq!(gateway.payload, &message[..]);
    }

    #[test]
    fn router_delivery_forwarded_on_outbound_tunnel() {
        let (mut endpoint, transport) = make_endpoint(false);
        let message = test_message(4, 50);

        endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Router { hash: [0x66; 32] },
                },
                &message,
            )]),
            &[0x11; 16],
        );

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, RouterId::from([0x66; 32]));
        assert_eq!(sent[0].1, message);
    }

    #[test]
    fn router_delivery_dropped_on_inbound_tunnel() {
        let (mut endpoint, transport) = make_endpoint(true);
        let message = test_message(5, 50);

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Router { hash: [0x66; 32] },
                },
                &message,
            )]),
            &[0x11; 16],
        );

        assert!(dispatched.is_empty());
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn router_delivery_to_us_is_local() {
        let (mut endpoint, transport) = make_endpoint(true);
        let message = test_message(6, 50);

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Router { hash: OUR_HASH },
                },
                &message,
            )]),
            &[0x11; 16],
        );

        assert_eq!(dispatched.len(), 1);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn corrupted_region_drops_everything() {
        let (mut endpoint, transport) = make_endpoint(true);
        let message = test_message(7, 50);

        let mut corrupted = region(&[(
            FragmentKind::Unfragmented {
                delivery_instructions: DeliveryInstructions::Local,
            },
            &message,
        )]);
        corrupted[1007] ^= 0x01;

        assert!(endpoint.handle_decrypted(&corrupted, &[0x11; 16]).is_empty());
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn duplicate_after_completion_stays_buffered_only() {
        let (mut endpoint, _) = make_endpoint(true);
        let message_id = 999;

        let full = test_message(8, 100);
        let (first, second) = full.split_at(60);

        endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::First {
                    message_id,
                    delivery_instructions: DeliveryInstructions::Local,
                },
                first,
            )]),
            &[0x11; 16],
        );

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number: 1,
                    last: true,
                },
                second,
            )]),
            &[0x11; 16],
        );
        assert_eq!(dispatched.len(), 1);

        // a duplicate of the last fragment after completion has no first
        // fragment to attach to and must not dispatch anything
        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number: 1,
                    last: true,
                },
                second,
            )]),
            &[0x11; 16],
        );
        assert!(dispatched.is_empty());
    }

    #[test]
    fn newer_out_of_sequence_fragment_replaces_older() {
        let (mut endpoint, _) = make_endpoint(true);
        let message_id = 1000;

        let full = test_message(9, 200);
        let (first, rest) = full.split_at(80);
        let (second, third) = rest.split_at(70);

        // two out-of-order fragments before the first; only the newer one
        // survives, so the message can never complete
        endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number: 1,
                    last: false,
                },
                second,
            )]),
            &[0x11; 16],
        );
        endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number: 2,
                    last: true,
                },
                third,
            )]),
            &[0x11; 16],
        );

        let dispatched = endpoint.handle_decrypted(
            &region(&[(
                FragmentKind::First {
                    message_id,
                    delivery_instructions: DeliveryInstructions::Local,
                },
                first,
            )]),
            &[0x11; 16],
        );

        assert!(dispatched.is_empty());
        assert!(!endpoint.is_idle());
    }
}
