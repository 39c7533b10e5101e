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

use crate::{
    crypto::SessionKey,
    garlic::SessionTag,
    primitives::{RouterId, TunnelId},
};

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    error::{make_error, ErrorKind},
    number::complete::{be_u16, be_u32, be_u8},
    Err, IResult,
};

use alloc::vec::Vec;

/// Reply is routed through a tunnel gateway instead of directly.
const FLAG_DELIVERY: u8 = 0x01;

/// Reply is encrypted to the included session key and tag.
const FLAG_ENCRYPTION: u8 = 0x02;

/// Lookup type field, bits 3..2 of the flag byte.
const LOOKUP_TYPE_MASK: u8 = 0x0c;

/// What is being looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupType {
    /// Router info.
    RouterInfo,

    /// Lease set.
    LeaseSet,

    /// Closest routers, for exploration.
    Exploratory,
}

impl LookupType {
    fn as_u8(&self) -> u8 {
        match self {
            Self::RouterInfo => 0x00,
            Self::LeaseSet => 0x04,
            Self::Exploratory => 0x08,
        }
    }

    fn from_flag(flag: u8) -> Option<Self> {
        match flag & LOOKUP_TYPE_MASK {
            0x00 => Some(Self::RouterInfo),
            0x04 => Some(Self::LeaseSet),
            0x08 => Some(Self::Exploratory),
            _ => None,
        }
    }
}

/// Encrypted reply path of a lease-set lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupReplyEncryption {
    /// AES key the reply is encrypted with.
    pub reply_key: SessionKey,

    /// One-time tag prefixed to the reply.
    pub reply_tag: SessionTag,
}

/// Database lookup message.
#[derive(Debug)]
pub struct DatabaseLookup {
    /// SHA-256 of the entity being looked up.
    pub key: RouterId,

    /// Who is asking, or the gateway the reply goes to.
    pub from: RouterId,

    /// Lookup type.
    pub lookup_type: LookupType,

    /// Reply tunnel at `from`, if the reply is tunnel-routed.
    pub reply_tunnel_id: Option<TunnelId>,

    /// Routers the responder should not include in the answer.
    pub excluded: Vec<RouterId>,

    /// Garlic-encrypted reply parameters.
    pub reply_encryption: Option<LookupReplyEncryption>,
}

impl DatabaseLookup {
    /// Attempt to parse [`DatabaseLookup`] from `input`.
    ///
    /// Returns the parsed message and rest of `input` on success.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, key) = take(RouterId::LEN)(input)?;
        let (rest, from) = take(RouterId::LEN)(rest)?;
        let (rest, flag) = be_u8(rest)?;

        let lookup_type = LookupType::from_flag(flag)
            .ok_or_else(|| Err::Error(make_error(input, ErrorKind::Fail)))?;

        let (rest, reply_tunnel_id) = match flag & FLAG_DELIVERY {
            0 => (rest, None),
            _ => {
                let (rest, tunnel_id) = be_u32(rest)?;
                (rest, Some(TunnelId::from(tunnel_id)))
            }
        };

        let (mut rest, excluded_count) = be_u16(rest)?;
        let mut excluded = Vec::with_capacity(excluded_count as usize);
        for _ in 0..excluded_count {
            let (next, hash) = take(RouterId::LEN)(rest)?;
            excluded.push(RouterId::from_bytes(hash).expect("32 bytes"));
            rest = next;
        }

        let (rest, reply_encryption) = match flag & FLAG_ENCRYPTION {
            0 => (rest, None),
            _ => {
                let (rest, reply_key) = take(32usize)(rest)?;
                let (rest, tag_count) = be_u8(rest)?;

                if tag_count != 1 {
                    return Err(Err::Error(make_error(input, ErrorKind::Fail)));
                }
                let (rest, reply_tag) = take(32usize)(rest)?;

                (
                    rest,
                    Some(LookupReplyEncryption {
                        reply_key: SessionKey::from_bytes(reply_key).expect("32 bytes"),
                        reply_tag: SessionTag::from_bytes(reply_tag).expect("32 bytes"),
                    }),
                )
            }
        };

        Ok((
            rest,
            Self {
                key: RouterId::from_bytes(key).expect("32 bytes"),
                from: RouterId::from_bytes(from).expect("32 bytes"),
                lookup_type,
                reply_tunnel_id,
                excluded,
                reply_encryption,
            },
        ))
    }

    /// Attempt to parse `input` into [`DatabaseLookup`].
    pub fn parse(input: &[u8]) -> Option<Self> {
        Self::parse_frame(input).ok().map(|(_, message)| message)
    }

    /// Serialize [`DatabaseLookup`] into a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(
            2 * RouterId::LEN + 1 + 4 + 2 + self.excluded.len() * RouterId::LEN + 65,
        );

        let mut flag = self.lookup_type.as_u8();
        if self.reply_tunnel_id.is_some() {
            flag |= FLAG_DELIVERY;
        }
        if self.reply_encryption.is_some() {
            flag |= FLAG_ENCRYPTION;
        }

        out.put_slice(self.key.as_ref());
        out.put_slice(self.from.as_ref());
        out.put_u8(flag);

        if let Some(tunnel_id) = self.reply_tunnel_id {
            out.put_u32(*tunnel_id);
        }

        out.put_u16(self.excluded.len() as u16);
        for hash in &self.excluded {
            out.put_slice(hash.as_ref());
        }

        if let Some(LookupReplyEncryption {
            reply_key,
            reply_tag,
        }) = &self.reply_encryption
        {
            out.put_slice(reply_key.as_ref());
            out.put_u8(1u8);
            out.put_slice(reply_tag.as_ref());
        }

        out.freeze().to_vec()
    }
}
