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

//! I2NP message envelope.
//!
//! <https://geti2p.net/spec/i2np>

use crate::{
    crypto::sha256::Sha256,
    primitives::MessageId,
    runtime::Runtime,
};

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    error::{make_error, ErrorKind},
    number::complete::{be_u16, be_u64, be_u8},
    Err, IResult,
};
use rand_core::RngCore;

use alloc::vec::Vec;
use core::{fmt, time::Duration};

pub mod database;
pub mod delivery_status;
pub mod tunnel;

/// Logging target for the file.
pub(crate) const LOG_TARGET: &str = "legate::i2np";

/// I2NP message header length.
///
/// `type (1) | message id (4) | expiration (8) | size (2) | checksum (1)`
pub const I2NP_HEADER_LEN: usize = 16;

/// Offset of the size field within the header.
pub const I2NP_SIZE_OFFSET: usize = 13;

/// Offset of the checksum byte within the header.
pub const I2NP_CHECKSUM_OFFSET: usize = 15;

/// Maximum size of a serialized I2NP message, header included.
pub const I2NP_MAX_MESSAGE_LEN: usize = 16 * 1024;

/// Capacity of the short buffer class.
const SHORT_BUFFER_LEN: usize = 1024;

/// Default message expiration.
const I2NP_MESSAGE_EXPIRATION: Duration = Duration::from_secs(5);

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    DatabaseStore,
    DatabaseLookup,
    DatabaseSearchReply,
    DeliveryStatus,
    Garlic,
    TunnelData,
    TunnelGateway,
    Data,
    TunnelBuild,
    TunnelBuildReply,
    VariableTunnelBuild,
    VariableTunnelBuildReply,
}

impl MessageType {
    /// Serialize [`MessageType`].
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::DatabaseStore => 1,
            Self::DatabaseLookup => 2,
            Self::DatabaseSearchReply => 3,
            Self::DeliveryStatus => 10,
            Self::Garlic => 11,
            Self::TunnelData => 18,
            Self::TunnelGateway => 19,
            Self::Data => 20,
            Self::TunnelBuild => 21,
            Self::TunnelBuildReply => 22,
            Self::VariableTunnelBuild => 23,
            Self::VariableTunnelBuildReply => 24,
        }
    }

    /// Attempt to convert `message_type` into [`MessageType`].
    pub fn from_u8(message_type: u8) -> Option<MessageType> {
        match message_type {
            1 => Some(Self::DatabaseStore),
            2 => Some(Self::DatabaseLookup),
            3 => Some(Self::DatabaseSearchReply),
            10 => Some(Self::DeliveryStatus),
            11 => Some(Self::Garlic),
            18 => Some(Self::TunnelData),
            19 => Some(Self::TunnelGateway),
            20 => Some(Self::Data),
            21 => Some(Self::TunnelBuild),
            22 => Some(Self::TunnelBuildReply),
            23 => Some(Self::VariableTunnelBuild),
            24 => Some(Self::VariableTunnelBuildReply),
            message_type => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?message_type,
                    "invalid message type",
                );
                None
            }
        }
    }
}

/// Owned I2NP message.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub message_type: MessageType,

    /// Message ID.
    pub message_id: u32,

    /// Expiration, milliseconds since Unix epoch.
    pub expiration: Duration,

    /// Raw payload.
    pub payload: Vec<u8>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type)
            .field("message_id", &self.message_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl Message {
    /// Attempt to parse [`Message`] from `input`.
    ///
    /// The declared size must cover the payload exactly and the checksum
    /// byte must match the first byte of the payload digest.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Message> {
        let (rest, message_type) = be_u8(input)?;
        let (rest, message_id) = nom::number::complete::be_u32(rest)?;
        let (rest, expiration) = be_u64(rest)?;
        let (rest, size) = be_u16(rest)?;
        let (rest, checksum) = be_u8(rest)?;
        let (rest, payload) = take(size as usize)(rest)?;

        let message_type = MessageType::from_u8(message_type)
            .ok_or_else(|| Err::Error(make_error(input, ErrorKind::Fail)))?;

        if Sha256::digest(payload)[0] != checksum {
            tracing::warn!(
                target: LOG_TARGET,
                ?message_type,
                ?message_id,
                "checksum mismatch",
            );
            return Err(Err::Error(make_error(input, ErrorKind::Verify)));
        }

        Ok((
            rest,
            Message {
                message_type,
                message_id,
                expiration: Duration::from_millis(expiration),
                payload: payload.to_vec(),
            },
        ))
    }

    /// Attempt to parse `input` into [`Message`].
    pub fn parse(input: &[u8]) -> Option<Message> {
        Some(Self::parse_frame(input).ok()?.1)
    }

    /// Serialize [`Message`] into a byte vector.
    ///
    /// The backing buffer comes from one of two capacity classes so small
    /// control messages don't pay for a full-size allocation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(buffer_capacity(
            I2NP_HEADER_LEN + self.payload.len(),
        ));

        out.put_u8(self.message_type.as_u8());
        out.put_u32(self.message_id);
        out.put_u64(self.expiration.as_millis() as u64);
        out.put_u16(self.payload.len() as u16);
        out.put_u8(Sha256::digest(&self.payload)[0]);
        out.put_slice(&self.payload);

        out.freeze().to_vec()
    }

    /// Re-draw the message ID and expiration without touching the payload.
    ///
    /// Used when a payload is forwarded inside a new outer envelope.
    pub fn renew_header<R: Runtime>(&mut self) {
        self.message_id = R::rng().next_u32();
        self.expiration = R::time_since_epoch() + I2NP_MESSAGE_EXPIRATION;
    }

    /// Has the message expired at wall-clock time `now`?
    pub fn is_expired(&self, now: Duration) -> bool {
        self.expiration <= now
    }
}

/// Select backing buffer capacity for a message of `serialized_len` bytes.
///
/// Messages comfortably below the short-class capacity get the short
/// buffer, everything else the long one.
fn buffer_capacity(serialized_len: usize) -> usize {
    if serialized_len < SHORT_BUFFER_LEN / 2 {
        SHORT_BUFFER_LEN
    } else {
        I2NP_MAX_MESSAGE_LEN
    }
}

/// Builder for [`Message`].
pub struct MessageBuilder {
    /// Message type.
    message_type: MessageType,

    /// Message ID, drawn from the RNG if not set.
    message_id: Option<u32>,

    /// Expiration, `now + 5s` if not set.
    expiration: Option<Duration>,

    /// Payload.
    payload: Vec<u8>,
}

impl MessageBuilder {
    /// Create new [`MessageBuilder`] for `message_type`.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            message_id: None,
            expiration: None,
            payload: Vec::new(),
        }
    }

    /// Specify message ID.
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Specify expiration.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Specify payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Fill in the missing header fields and build the [`Message`].
    pub fn build<R: Runtime>(self) -> Message {
        Message {
            message_type: self.message_type,
            message_id: self.message_id.unwrap_or_else(|| R::rng().next_u32()),
            expiration: self
                .expiration
                .unwrap_or_else(|| R::time_since_epoch() + I2NP_MESSAGE_EXPIRATION),
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn serialize_parse_round_trip() {
        let message = MessageBuilder::new(MessageType::Data)
            .with_message_id(MessageId::from(1337u32))
            .with_expiration(Duration::from_millis(0xdead_beef))
            .with_payload(vec![1, 2, 3, 4, 5])
            .build::<MockRuntime>();

        let serialized = message.serialize();
        assert_eq!(serialized.len(), I2NP_HEADER_LEN + 5);
        assert_eq!(serialized[I2NP_SIZE_OFFSET..I2NP_SIZE_OFFSET + 2], [0, 5]);

        let parsed = Message::parse(&serialized).unwrap();
        assert_eq!(parsed.message_type, MessageType::Data);
        assert_eq!(parsed.message_id, 1337u32);
        assert_eq!(parsed.expiration, Duration::from_millis(0xdead_beef));
        assert_eq!(parsed.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn checksum_mismatch_rejected() {
        let message = MessageBuilder::new(MessageType::Data)
            .with_payload(vec![0xaa; 64])
            .build::<MockRuntime>();

        let mut serialized = message.serialize();
        serialized[I2NP_HEADER_LEN] ^= 0x01;

        assert!(Message::parse(&serialized).is_none());

        // flipping a bit of the checksum byte itself must also reject
        serialized[I2NP_HEADER_LEN] ^= 0x01;
        serialized[I2NP_CHECKSUM_OFFSET] ^= 0x01;
        assert!(Message::parse(&serialized).is_none());
    }

    #[test]
    fn truncated_message_rejected() {
        let serialized = MessageBuilder::new(MessageType::Data)
            .with_payload(vec![0xbb; 32])
            .build::<MockRuntime>()
            .serialize();

        assert!(Message::parse(&serialized[..serialized.len() - 1]).is_none());
    }

    #[test]
    fn header_renewal_keeps_payload() {
        let mut message = MessageBuilder::new(MessageType::Data)
            .with_message_id(MessageId::from(1u32))
            .with_expiration(Duration::from_millis(1))
            .with_payload(vec![9; 10])
            .build::<MockRuntime>();

        message.renew_header::<MockRuntime>();

        assert_ne!(message.expiration, Duration::from_millis(1));
        assert_eq!(message.payload, vec![9; 10]);
    }

    #[test]
    fn expiration_check() {
        let message = MessageBuilder::new(MessageType::Data)
            .with_expiration(Duration::from_millis(1000))
            .build::<MockRuntime>();

        assert!(!message.is_expired(Duration::from_millis(999)));
        assert!(message.is_expired(Duration::from_millis(1000)));
    }
}
