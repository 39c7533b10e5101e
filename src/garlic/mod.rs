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

//! Garlic messaging.
//!
//! A garlic message carries any number of independent inner I2NP messages
//! ("cloves") under one encryption: AES-256-CBC selected by a one-time
//! 32-byte session tag in the steady state, bootstrapped by a 514-byte
//! ElGamal block when no tag is available.

use crate::crypto::SessionKey;

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    error::{make_error, ErrorKind},
    number::complete::{be_u32, be_u64, be_u8},
    Err, IResult,
};
use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;
use core::{fmt, time::Duration};

pub mod registry;
pub mod session;

pub use registry::SessionManager;
pub use session::{GarlicRoutingSession, LeaseSetUpdateStatus};

/// Logging target for the file.
const LOG_TARGET: &str = "legate::garlic";

/// Session tag length.
pub const SESSION_TAG_LEN: usize = 32;

/// Length of the new-session ElGamal prefix.
pub const ELGAMAL_BLOCK_LEN: usize = 514;

/// Garlic certificate length, always a 3-byte null certificate.
const GARLIC_CERTIFICATE_LEN: usize = 3;

/// Expiration for outbound tag batches awaiting or past confirmation.
pub const OUTGOING_TAGS_EXPIRATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Expiration for tags in the inbound tag table.
pub const INCOMING_TAGS_EXPIRATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How long a submitted lease-set waits for its delivery status
/// before the submission is retried.
pub const LEASESET_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(4);

/// One-time 32-byte session tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTag([u8; SESSION_TAG_LEN]);

impl SessionTag {
    /// Generate new random [`SessionTag`].
    pub fn random(mut rng: impl RngCore + CryptoRng) -> Self {
        let mut tag = [0u8; SESSION_TAG_LEN];
        rng.fill_bytes(&mut tag);

        Self(tag)
    }

    /// Create [`SessionTag`] from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }
}

impl From<[u8; SESSION_TAG_LEN]> for SessionTag {
    fn from(value: [u8; SESSION_TAG_LEN]) -> Self {
        SessionTag(value)
    }
}

impl AsRef<[u8]> for SessionTag {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionTag").field(&&self.0[..4]).finish()
    }
}

/// Plaintext of the 514-byte new-session prefix.
///
/// ElGamal-encrypted to the destination; carries the AES session key and
/// the value the first IV is derived from.
pub struct ElGamalBlock {
    /// AES-256 session key.
    pub session_key: SessionKey,

    /// Pre-IV; the CBC IV is the first 16 bytes of its digest.
    pub pre_iv: [u8; 32],
}

impl ElGamalBlock {
    /// Serialize [`ElGamalBlock`] into the 222-byte ElGamal plaintext.
    ///
    /// The trailing 158 bytes are padding and stay zeroed.
    pub fn serialize(&self) -> [u8; 222] {
        let mut out = [0u8; 222];

        out[..32].copy_from_slice(self.session_key.as_ref());
        out[32..64].copy_from_slice(&self.pre_iv);

        out
    }

    /// Parse [`ElGamalBlock`] from a decrypted 222-byte plaintext.
    pub fn parse(plaintext: &[u8; 222]) -> Self {
        Self {
            session_key: SessionKey::from_bytes(&plaintext[..32]).expect("32 bytes"),
            pre_iv: plaintext[32..64].try_into().expect("32 bytes"),
        }
    }
}

/// Garlic clove delivery instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryInstructions {
    /// Clove meant for the local node.
    Local,

    /// Clove meant for a `Destination`.
    Destination {
        /// Hash of the destination.
        hash: [u8; 32],
    },

    /// Clove meant for a router.
    Router {
        /// Hash of the router.
        hash: [u8; 32],
    },

    /// Clove meant for a tunnel.
    Tunnel {
        /// Hash of the tunnel gateway.
        hash: [u8; 32],

        /// Tunnel ID at the gateway.
        tunnel_id: u32,
    },
}

impl DeliveryInstructions {
    /// Get serialized length of the delivery instructions.
    fn serialized_len(&self) -> usize {
        match self {
            // 1-byte flag
            Self::Local => 1usize,

            // 1-byte flag + 32-byte destination/router hash
            Self::Destination { .. } | Self::Router { .. } => 33usize,

            // 1-byte flag + 32-byte gateway hash + 4-byte tunnel id
            Self::Tunnel { .. } => 37usize,
        }
    }

    /// Serialize [`DeliveryInstructions`] into `out`.
    fn serialize(&self, out: &mut BytesMut) {
        match self {
            Self::Local => out.put_u8(0x00),
            Self::Destination { hash } => {
                out.put_u8(0x01 << 5);
                out.put_slice(hash);
            }
            Self::Router { hash } => {
                out.put_u8(0x02 << 5);
                out.put_slice(hash);
            }
            Self::Tunnel { hash, tunnel_id } => {
                out.put_u8(0x03 << 5);
                out.put_slice(hash);
                out.put_u32(*tunnel_id);
            }
        }
    }

    /// Attempt to parse [`DeliveryInstructions`] from `input`.
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, flag) = be_u8(input)?;

        if flag >> 7 & 1 != 0 {
            tracing::warn!(
                target: LOG_TARGET,
                "encrypted garlic cloves not supported",
            );
            return Err(Err::Error(make_error(input, ErrorKind::Fail)));
        }

        if flag >> 4 & 1 != 0 {
            tracing::warn!(
                target: LOG_TARGET,
                "delayed delivery not supported",
            );
            return Err(Err::Error(make_error(input, ErrorKind::Fail)));
        }

        match (flag >> 5) & 0x3 {
            0x00 => Ok((rest, DeliveryInstructions::Local)),
            0x01 => {
                let (rest, hash) = take(32usize)(rest)?;

                Ok((
                    rest,
                    DeliveryInstructions::Destination {
                        hash: hash.try_into().expect("32 bytes"),
                    },
                ))
            }
            0x02 => {
                let (rest, hash) = take(32usize)(rest)?;

                Ok((
                    rest,
                    DeliveryInstructions::Router {
                        hash: hash.try_into().expect("32 bytes"),
                    },
                ))
            }
            0x03 => {
                let (rest, hash) = take(32usize)(rest)?;
                let (rest, tunnel_id) = be_u32(rest)?;

                Ok((
                    rest,
                    DeliveryInstructions::Tunnel {
                        hash: hash.try_into().expect("32 bytes"),
                        tunnel_id,
                    },
                ))
            }
            _ => unreachable!(),
        }
    }
}

/// One delivery instruction plus payload inside a garlic payload.
pub struct Clove {
    /// Delivery instructions.
    pub delivery_instructions: DeliveryInstructions,

    /// Serialized inner I2NP message.
    pub message: Vec<u8>,

    /// Clove ID.
    pub clove_id: u32,

    /// Expiration, milliseconds since Unix epoch.
    pub expiration: Duration,
}

impl fmt::Debug for Clove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clove")
            .field("delivery_instructions", &self.delivery_instructions)
            .field("clove_id", &self.clove_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl Clove {
    /// Get serialized length of the clove.
    pub fn serialized_len(&self) -> usize {
        self.delivery_instructions.serialized_len()
            + self.message.len()
            + 4 // clove id
            + 8 // expiration
            + GARLIC_CERTIFICATE_LEN
    }

    /// Serialize [`Clove`] into `out`.
    pub fn serialize(&self, out: &mut BytesMut) {
        self.delivery_instructions.serialize(out);
        out.put_slice(&self.message);
        out.put_u32(self.clove_id);
        out.put_u64(self.expiration.as_millis() as u64);
        out.put_bytes(0u8, GARLIC_CERTIFICATE_LEN);
    }

    /// Attempt to parse [`Clove`] from `input`.
    ///
    /// The inner I2NP message is self-describing; its header's size field
    /// bounds the clove body.
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, delivery_instructions) = DeliveryInstructions::parse(input)?;

        let message_start = rest;
        let (rest, _message) = crate::i2np::Message::parse_frame(rest)?;
        let message_len = message_start.len() - rest.len();

        let (rest, clove_id) = be_u32(rest)?;
        let (rest, expiration) = be_u64(rest)?;
        let (rest, _certificate) = take(GARLIC_CERTIFICATE_LEN)(rest)?;

        Ok((
            rest,
            Clove {
                delivery_instructions,
                message: message_start[..message_len].to_vec(),
                clove_id,
                expiration: Duration::from_millis(expiration),
            },
        ))
    }
}

/// Decrypted garlic payload: the cloves plus the trailer identifying the
/// garlic message for delivery-status confirmation.
pub struct GarlicPayload {
    /// Cloves.
    pub cloves: Vec<Clove>,

    /// Message ID, referenced by the delivery-status acknowledgement.
    pub message_id: u32,

    /// Expiration, milliseconds since Unix epoch.
    pub expiration: Duration,
}

impl GarlicPayload {
    /// Attempt to parse [`GarlicPayload`] from `input`.
    pub fn parse(input: &[u8]) -> Option<Self> {
        let (mut rest, num_cloves) = be_u8::<_, nom::error::Error<&[u8]>>(input).ok()?;

        let mut cloves = Vec::with_capacity(num_cloves as usize);
        for _ in 0..num_cloves {
            let (next, clove) = Clove::parse(rest).ok()?;
            cloves.push(clove);
            rest = next;
        }

        let (rest, _certificate) =
            take::<_, _, nom::error::Error<&[u8]>>(GARLIC_CERTIFICATE_LEN)(rest).ok()?;
        let (rest, message_id) = be_u32::<_, nom::error::Error<&[u8]>>(rest).ok()?;
        let (_rest, expiration) = be_u64::<_, nom::error::Error<&[u8]>>(rest).ok()?;

        Some(Self {
            cloves,
            message_id,
            expiration: Duration::from_millis(expiration),
        })
    }

    /// Serialize cloves and the trailer into a payload byte vector.
    pub fn serialize(cloves: &[Clove], message_id: u32, expiration: Duration) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(
            1 + cloves.iter().map(Clove::serialized_len).sum::<usize>()
                + GARLIC_CERTIFICATE_LEN
                + 4
                + 8,
        );

        out.put_u8(cloves.len() as u8);
        for clove in cloves {
            clove.serialize(&mut out);
        }
        out.put_bytes(0u8, GARLIC_CERTIFICATE_LEN);
        out.put_u32(message_id);
        out.put_u64(expiration.as_millis() as u64);

        out.freeze().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        i2np::{MessageBuilder, MessageType},
        runtime::mock::MockRuntime,
    };
    use alloc::vec;

    #[test]
    fn payload_round_trip() {
        let inner = MessageBuilder::new(MessageType::Data)
            .with_payload(vec![1, 2, 3])
            .build::<MockRuntime>()
            .serialize();

        let cloves = vec![
            Clove {
                delivery_instructions: DeliveryInstructions::Local,
                message: inner.clone(),
                clove_id: 7,
                expiration: Duration::from_millis(1000),
            },
            Clove {
                delivery_instructions: DeliveryInstructions::Tunnel {
                    hash: [0xaa; 32],
                    tunnel_id: 1337,
                },
                message: inner.clone(),
                clove_id: 8,
                expiration: Duration::from_millis(2000),
            },
        ];

        let serialized = GarlicPayload::serialize(&cloves, 0xcafe_babe, Duration::from_millis(5000));
        let payload = GarlicPayload::parse(&serialized).unwrap();

        assert_eq!(payload.message_id, 0xcafe_babe);
        assert_eq!(payload.expiration, Duration::from_millis(5000));
        assert_eq!(payload.cloves.len(), 2);
        assert_eq!(payload.cloves[0].delivery_instructions, DeliveryInstructions::Local);
        assert_eq!(payload.cloves[0].message, inner);
        assert_eq!(
            payload.cloves[1].delivery_instructions,
            DeliveryInstructions::Tunnel {
                hash: [0xaa; 32],
                tunnel_id: 1337,
            }
        );
    }

    #[test]
    fn encrypted_clove_rejected() {
        let mut serialized = GarlicPayload::serialize(
            &[Clove {
                delivery_instructions: DeliveryInstructions::Local,
                message: MessageBuilder::new(MessageType::Data)
                    .build::<MockRuntime>()
                    .serialize(),
                clove_id: 1,
                expiration: Duration::from_millis(1),
            }],
            1,
            Duration::from_millis(1),
        );

        // set the encrypted bit of the first clove's flag
        serialized[1] |= 0x80;

        assert!(GarlicPayload::parse(&serialized).is_none());
    }

    #[test]
    fn elgamal_block_round_trip() {
        let block = ElGamalBlock {
            session_key: SessionKey::from([0x13; 32]),
            pre_iv: [0x37; 32],
        };

        let serialized = block.serialize();
        assert_eq!(&serialized[64..], &[0u8; 158]);

        let parsed = ElGamalBlock::parse(&serialized);
        assert_eq!(parsed.session_key, SessionKey::from([0x13; 32]));
        assert_eq!(parsed.pre_iv, [0x37; 32]);
    }
}
