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

//! Transit side of the tunnel build exchange.
//!
//! A router scans a received build message for the record addressed to it,
//! peels it with its ElGamal key, applies admission control and replaces
//! the record with its response before re-encrypting the whole message
//! under its reply key and passing it on.

use crate::{
    config::TransitConfig,
    crypto::{aes::AesCbc, SessionKey},
    error::TunnelError,
    i2np::{
        tunnel::build::{
            BuildResponseRecord, TunnelBuild, TunnelBuildRecord, VariableTunnelBuild,
            BUILD_RECORD_TO_PEER_LEN, BUILD_REPLY_ACCEPT, BUILD_REPLY_REJECT_BANDWIDTH,
        },
        tunnel::gateway::TunnelGateway,
        Message, MessageBuilder, MessageType,
    },
    primitives::{MessageId, RouterId, TunnelId},
    router::RouterContext,
    runtime::{Instant, Runtime},
    tunnel::{LOG_TARGET, TUNNEL_EXPIRATION},
};

use hashbrown::HashMap;

use core::time::Duration;

/// Length of the bandwidth accounting window.
const BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);

/// Role of the local router in a transit tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitTunnelRole {
    /// Inbound gateway.
    Gateway,

    /// Intermediate participant.
    Participant,

    /// Outbound endpoint.
    Endpoint,
}

/// One tunnel the local router participates in on behalf of others.
pub struct TransitTunnel<R: Runtime> {
    /// Tunnel ID messages arrive on.
    pub tunnel_id: TunnelId,

    /// Router the tunnel continues to.
    pub next_router: RouterId,

    /// Tunnel ID at the next router.
    pub next_tunnel_id: TunnelId,

    /// Layer encryption key.
    pub layer_key: SessionKey,

    /// IV encryption key.
    pub iv_key: SessionKey,

    /// Role of the local router.
    pub role: TransitTunnelRole,

    /// When the tunnel was accepted.
    created: R::Instant,
}

/// Transit tunnel manager: admission control and the transit tunnel table.
pub struct TransitTunnelManager<R: Runtime> {
    /// Transit configuration.
    config: TransitConfig,

    /// Router context.
    ctx: RouterContext<R>,

    /// Active transit tunnels.
    tunnels: HashMap<TunnelId, TransitTunnel<R>>,

    /// Bytes relayed in the current accounting window.
    window_bytes: usize,

    /// When the current accounting window started.
    window_started: R::Instant,
}

impl<R: Runtime> TransitTunnelManager<R> {
    /// Create new [`TransitTunnelManager`].
    pub fn new(config: TransitConfig, ctx: RouterContext<R>) -> Self {
        Self {
            config,
            ctx,
            tunnels: HashMap::new(),
            window_bytes: 0usize,
            window_started: R::now(),
        }
    }

    /// Number of active transit tunnels.
    pub fn num_tunnels(&self) -> usize {
        self.tunnels.len()
    }

    /// Get a transit tunnel by its receive tunnel ID.
    pub fn tunnel(&self, tunnel_id: &TunnelId) -> Option<&TransitTunnel<R>> {
        self.tunnels.get(tunnel_id)
    }

    /// Record `bytes` of relayed transit traffic for bandwidth accounting.
    pub fn record_transit_bytes(&mut self, bytes: usize) {
        if self.window_started.elapsed() >= BANDWIDTH_WINDOW {
            self.window_bytes = 0;
            self.window_started = R::now();
        }

        self.window_bytes = self.window_bytes.saturating_add(bytes);
    }

    /// Is the bandwidth budget of the current window exhausted?
    fn bandwidth_exceeded(&self) -> bool {
        match self.config.max_bandwidth {
            None => false,
            Some(limit) =>
                self.window_started.elapsed() < BANDWIDTH_WINDOW && self.window_bytes >= limit,
        }
    }

    /// Should a new transit tunnel be admitted?
    fn admit(&self) -> bool {
        self.config.accept_transit_tunnels
            && self.tunnels.len() < self.config.max_tunnels
            && !self.bandwidth_exceeded()
    }

    /// Drop transit tunnels past their lifetime.
    pub fn sweep_expired(&mut self) {
        self.tunnels.retain(|tunnel_id, tunnel| {
            if tunnel.created.elapsed() < TUNNEL_EXPIRATION {
                return true;
            }

            tracing::debug!(
                target: LOG_TARGET,
                %tunnel_id,
                "transit tunnel expired",
            );
            false
        });
    }

    /// Handle a received tunnel build message.
    ///
    /// Finds the record addressed to us, peels and answers it, re-encrypts
    /// every record under our reply key and forwards the message: build
    /// messages continue to the next hop, the endpoint's reply enters the
    /// named reply tunnel through a gateway message.
    pub fn handle_build_request(&mut self, message: &Message) -> crate::Result<()> {
        self.sweep_expired();

        // the fixed-size message is the variable one without a count byte,
        // always eight records
        let fixed = message.message_type == MessageType::TunnelBuild;
        let mut records = match fixed {
            true =>
                TunnelBuild::parse(&message.payload)
                    .ok_or(crate::Error::InvalidData)?
                    .records
                    .to_vec(),
            false =>
                VariableTunnelBuild::parse(&message.payload)
                    .ok_or(crate::Error::InvalidData)?
                    .records,
        };

        let our_prefix = self.ctx.router_id().truncated();
        let index = records
            .iter()
            .position(|record| record[..BUILD_RECORD_TO_PEER_LEN] == *our_prefix)
            .ok_or_else(|| {
                tracing::trace!(
                    target: LOG_TARGET,
                    "no build record addressed to us",
                );
                crate::Error::Tunnel(TunnelError::RecordNotFound)
            })?;

        let record = self
            .ctx
            .private_key()
            .decrypt(&records[index][BUILD_RECORD_TO_PEER_LEN..], false)
            .and_then(|cleartext| TunnelBuildRecord::parse(&cleartext))
            .ok_or(crate::Error::InvalidData)?;

        let ret = if self.admit() {
            let role = match (record.is_gateway, record.is_endpoint) {
                (true, _) => TransitTunnelRole::Gateway,
                (_, true) => TransitTunnelRole::Endpoint,
                _ => TransitTunnelRole::Participant,
            };

            tracing::debug!(
                target: LOG_TARGET,
                tunnel_id = %record.receive_tunnel_id,
                next_router = %record.next_ident,
                ?role,
                "transit tunnel accepted",
            );

            self.tunnels.insert(
                record.receive_tunnel_id,
                TransitTunnel {
                    tunnel_id: record.receive_tunnel_id,
                    next_router: record.next_ident,
                    next_tunnel_id: record.next_tunnel_id,
                    layer_key: record.layer_key.clone(),
                    iv_key: record.iv_key.clone(),
                    role,
                    created: R::now(),
                },
            );

            BUILD_REPLY_ACCEPT
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                num_tunnels = ?self.tunnels.len(),
                "transit tunnel rejected",
            );

            BUILD_REPLY_REJECT_BANDWIDTH
        };

        records[index] = BuildResponseRecord::serialize(R::rng(), ret);

        let cipher = AesCbc::new(record.reply_key.to_array(), record.reply_iv);
        for record in records.iter_mut() {
            cipher.encrypt(record).expect("record size is a multiple of the block size");
        }

        let (payload, build_type, reply_type) = match fixed {
            true => (
                TunnelBuild {
                    records: records.try_into().expect("eight records"),
                }
                .serialize(),
                MessageType::TunnelBuild,
                MessageType::TunnelBuildReply,
            ),
            false => (
                VariableTunnelBuild { records }.serialize(),
                MessageType::VariableTunnelBuild,
                MessageType::VariableTunnelBuildReply,
            ),
        };

        match record.is_endpoint {
            // reply enters the reply tunnel through its gateway
            true => {
                let reply = MessageBuilder::new(reply_type)
                    .with_message_id(MessageId::from(record.send_message_id))
                    .with_payload(payload)
                    .build::<R>();

                let gateway = MessageBuilder::new(MessageType::TunnelGateway)
                    .with_payload(
                        TunnelGateway {
                            tunnel_id: record.next_tunnel_id,
                            payload: &reply.serialize(),
                        }
                        .serialize(),
                    )
                    .build::<R>();

                self.ctx.transport().send(&record.next_ident, gateway.serialize());
            }
            // build message continues to the next hop
            false => {
                let forwarded = MessageBuilder::new(build_type)
                    .with_message_id(MessageId::from(record.send_message_id))
                    .with_payload(payload)
                    .build::<R>();

                self.ctx.transport().send(&record.next_ident, forwarded.serialize());
            }
        }

        Ok(())
    }
}
