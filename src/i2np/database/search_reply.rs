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

use crate::primitives::RouterId;

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    number::complete::be_u8,
    IResult,
};

use alloc::vec::Vec;

/// Database search reply: the routers closest to a key the responder
/// didn't have.
#[derive(Debug)]
pub struct DatabaseSearchReply {
    /// Key that was looked up.
    pub key: RouterId,

    /// Closest router hashes known to the responder.
    pub routers: Vec<RouterId>,

    /// Router the reply was sent from.
    pub from: RouterId,
}

impl DatabaseSearchReply {
    /// Attempt to parse [`DatabaseSearchReply`] from `input`.
    ///
    /// Returns the parsed message and rest of `input` on success.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, key) = take(RouterId::LEN)(input)?;
        let (mut rest, count) = be_u8(rest)?;

        let mut routers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (next, hash) = take(RouterId::LEN)(rest)?;
            routers.push(RouterId::from_bytes(hash).expect("32 bytes"));
            rest = next;
        }

        let (rest, from) = take(RouterId::LEN)(rest)?;

        Ok((
            rest,
            Self {
                key: RouterId::from_bytes(key).expect("32 bytes"),
                routers,
                from: RouterId::from_bytes(from).expect("32 bytes"),
            },
        ))
    }

    /// Attempt to parse `input` into [`DatabaseSearchReply`].
    pub fn parse(input: &[u8]) -> Option<Self> {
        Self::parse_frame(input).ok().map(|(_, message)| message)
    }

    /// Serialize [`DatabaseSearchReply`] into a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out =
            BytesMut::with_capacity((2 + self.routers.len()) * RouterId::LEN + 1);

        out.put_slice(self.key.as_ref());
        out.put_u8(self.routers.len() as u8);
        for router in &self.routers {
            out.put_slice(router.as_ref());
        }
        out.put_slice(self.from.as_ref());

        out.freeze().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn serialize_deserialize() {
        let reply = DatabaseSearchReply {
            key: RouterId::from([1u8; 32]),
            routers: vec![RouterId::from([2u8; 32]), RouterId::from([3u8; 32])],
            from: RouterId::from([4u8; 32]),
        };

        let parsed = DatabaseSearchReply::parse(&reply.serialize()).unwrap();
        assert_eq!(parsed.key, reply.key);
        assert_eq!(parsed.routers, reply.routers);
        assert_eq!(parsed.from, reply.from);
    }

    #[test]
    fn empty_reply() {
        let reply = DatabaseSearchReply {
            key: RouterId::from([1u8; 32]),
            routers: vec![],
            from: RouterId::from([4u8; 32]),
        };

        let parsed = DatabaseSearchReply::parse(&reply.serialize()).unwrap();
        assert!(parsed.routers.is_empty());
    }
}
