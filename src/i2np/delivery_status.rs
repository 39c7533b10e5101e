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

use crate::runtime::Runtime;

use bytes::{BufMut, BytesMut};
use nom::{
    number::complete::{be_u32, be_u64},
    IResult,
};
use rand_core::RngCore;

use core::time::Duration;

/// Network ID written into the timestamp field of an establishment probe.
const NET_ID: u64 = 2;

/// Delivery status.
pub struct DeliveryStatus {
    /// Message ID.
    pub message_id: u32,

    /// Timestamp as duration since Unix epoch.
    pub timestamp: Duration,
}

impl DeliveryStatus {
    /// Create [`DeliveryStatus`] acknowledging `message_id`.
    pub fn new<R: Runtime>(message_id: u32) -> Self {
        Self {
            message_id,
            timestamp: R::time_since_epoch(),
        }
    }

    /// Create a transport-establishment probe.
    ///
    /// The message ID is random and the timestamp field carries the
    /// network ID literal instead of a wall-clock value.
    pub fn probe<R: Runtime>() -> Self {
        Self {
            message_id: R::rng().next_u32(),
            timestamp: Duration::from_millis(NET_ID),
        }
    }

    /// Attempt to parse [`DeliveryStatus`] from `input`.
    ///
    /// Returns the parsed message and rest of `input` on success.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, message_id) = be_u32(input)?;
        let (rest, timestamp) = be_u64(rest)?;

        Ok((
            rest,
            Self {
                message_id,
                timestamp: Duration::from_millis(timestamp),
            },
        ))
    }

    /// Attempt to parse `input` into [`DeliveryStatus`].
    pub fn parse(input: &[u8]) -> Option<Self> {
        Self::parse_frame(input).ok().map(|(_, message)| message)
    }

    /// Serialize [`DeliveryStatus`] into a byte vector.
    pub fn serialize(self) -> BytesMut {
        let mut out = BytesMut::with_capacity(4 + 8);

        out.put_u32(self.message_id);
        out.put_u64(self.timestamp.as_millis() as u64);

        out
    }
}
