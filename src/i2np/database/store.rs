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
    i2np::LOG_TARGET,
    primitives::{LeaseSet, RouterId, TunnelId},
    runtime::Runtime,
};

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    error::{make_error, ErrorKind},
    number::complete::{be_u16, be_u32, be_u8},
    Err, IResult,
};

use alloc::vec::Vec;
use core::{fmt, marker::PhantomData, time::Duration};

/// "No reply" token/tunnel ID.
const NO_REPLY: u32 = 0u32;

/// Length of the store key.
const DATABASE_KEY_SIZE: usize = 32;

/// Database store kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreType {
    /// Router info, gzipped with a length prefix.
    RouterInfo,

    /// Lease set, stored as-is.
    LeaseSet,
}

impl StoreType {
    /// Try to convert `store_type` into `StoreType`.
    fn from_u8(store_type: u8) -> Option<Self> {
        match store_type {
            0 => Some(Self::RouterInfo),
            1 => Some(Self::LeaseSet),
            _ => None,
        }
    }

    /// Serialize [`StoreType`].
    fn as_u8(&self) -> u8 {
        match self {
            Self::RouterInfo => 0,
            Self::LeaseSet => 1,
        }
    }
}

/// Reply requested by the sender of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyType {
    /// No delivery status requested.
    None,

    /// Deliver the status through a tunnel gateway.
    Tunnel {
        /// Reply token.
        reply_token: u32,

        /// Tunnel ID of the reply gateway.
        tunnel_id: TunnelId,

        /// Gateway router.
        router_id: RouterId,
    },
}

/// Payload of a [`DatabaseStore`].
pub enum DatabaseStorePayload {
    /// Router info, already decompressed.
    RouterInfo {
        /// Raw router info bytes.
        data: Vec<u8>,
    },

    /// Lease set.
    LeaseSet {
        /// Raw signed lease-set bytes.
        data: Vec<u8>,
    },
}

impl fmt::Debug for DatabaseStorePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RouterInfo { data } => f
                .debug_struct("DatabaseStorePayload::RouterInfo")
                .field("len", &data.len())
                .finish(),
            Self::LeaseSet { data } => f
                .debug_struct("DatabaseStorePayload::LeaseSet")
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Database store message.
#[derive(Debug)]
pub struct DatabaseStore<R: Runtime> {
    /// Store key, SHA-256 of the stored entity's identity.
    pub key: RouterId,

    /// Payload.
    pub payload: DatabaseStorePayload,

    /// Reply requested by the sender.
    pub reply: ReplyType,

    /// Marker for `Runtime`.
    _runtime: PhantomData<R>,
}

impl<R: Runtime> DatabaseStore<R> {
    /// Attempt to parse [`DatabaseStore`] from `input`.
    ///
    /// Returns the parsed message and rest of `input` on success.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, key) = take(DATABASE_KEY_SIZE)(input)?;
        let (rest, store_type) = be_u8(rest)?;
        let (rest, reply_token) = be_u32(rest)?;
        let store_type = StoreType::from_u8(store_type)
            .ok_or_else(|| Err::Error(make_error(input, ErrorKind::Fail)))?;

        let (rest, reply) = match reply_token == NO_REPLY {
            true => (rest, ReplyType::None),
            false => {
                let (rest, gateway_tunnel) = be_u32(rest)?;
                let (rest, gateway_router) = take(RouterId::LEN)(rest)?;

                (
                    rest,
                    ReplyType::Tunnel {
                        reply_token,
                        tunnel_id: TunnelId::from(gateway_tunnel),
                        router_id: RouterId::from_bytes(gateway_router).expect("32 bytes"),
                    },
                )
            }
        };

        let key = RouterId::from_bytes(key).expect("32 bytes");

        match store_type {
            StoreType::RouterInfo => {
                let (rest, size) = be_u16(rest)?;
                let (rest, data) = take(size)(rest)?;

                let data = R::gzip_decompress(data).ok_or_else(|| {
                    tracing::warn!(
                        target: LOG_TARGET,
                        "failed to decompress gzipped router info",
                    );

                    Err::Error(make_error(input, ErrorKind::Fail))
                })?;

                Ok((
                    rest,
                    Self {
                        key,
                        payload: DatabaseStorePayload::RouterInfo { data },
                        reply,
                        _runtime: Default::default(),
                    },
                ))
            }
            StoreType::LeaseSet => {
                let (rest, data) = take(rest.len())(rest)?;

                Ok((
                    rest,
                    Self {
                        key,
                        payload: DatabaseStorePayload::LeaseSet {
                            data: data.to_vec(),
                        },
                        reply,
                        _runtime: Default::default(),
                    },
                ))
            }
        }
    }

    /// Attempt to parse `input` into [`DatabaseStore`].
    pub fn parse(input: &[u8]) -> Option<Self> {
        Self::parse_frame(input).ok().map(|(_, message)| message)
    }

    /// Serialize a router-info store.
    ///
    /// `router_info` is gzipped and written with a 2-byte length prefix;
    /// when a reply is requested the reply tunnel ID is always zero
    /// (direct delivery to the gateway router).
    ///
    /// Returns `None` if compression fails.
    pub fn serialize_router_info(
        key: &RouterId,
        router_info: &[u8],
        reply: ReplyType,
    ) -> Option<Vec<u8>> {
        let compressed = R::gzip_compress(router_info)?;

        let mut out = BytesMut::with_capacity(
            DATABASE_KEY_SIZE + 1 + 4 + 4 + RouterId::LEN + 2 + compressed.len(),
        );

        out.put_slice(key.as_ref());
        out.put_u8(StoreType::RouterInfo.as_u8());

        match reply {
            ReplyType::None => out.put_u32(NO_REPLY),
            ReplyType::Tunnel {
                reply_token,
                router_id,
                ..
            } => {
                out.put_u32(reply_token);
                out.put_u32(NO_REPLY);
                out.put_slice(router_id.as_ref());
            }
        }

        out.put_u16(compressed.len() as u16);
        out.put_slice(&compressed);

        Some(out.freeze().to_vec())
    }

    /// Serialize a lease-set store.
    ///
    /// A requested reply is honored only while the lease-set still has an
    /// unexpired lease; otherwise the token is cleared and the reply path
    /// omitted. Lossy, but a status that could never be routed back is
    /// worthless anyway.
    pub fn serialize_lease_set(
        key: &RouterId,
        lease_set: &LeaseSet,
        mut reply: ReplyType,
        now: Duration,
    ) -> Vec<u8> {
        if !core::matches!(reply, ReplyType::None) && !lease_set.has_unexpired_lease(now) {
            tracing::debug!(
                target: LOG_TARGET,
                key = %key,
                "no unexpired lease, clearing reply token",
            );
            reply = ReplyType::None;
        }

        let mut out = BytesMut::with_capacity(
            DATABASE_KEY_SIZE + 1 + 4 + 4 + RouterId::LEN + lease_set.serialized.len(),
        );

        out.put_slice(key.as_ref());
        out.put_u8(StoreType::LeaseSet.as_u8());

        match reply {
            ReplyType::None => out.put_u32(NO_REPLY),
            ReplyType::Tunnel {
                reply_token,
                tunnel_id,
                router_id,
            } => {
                out.put_u32(reply_token);
                out.put_u32(*tunnel_id);
                out.put_slice(router_id.as_ref());
            }
        }

        out.put_slice(&lease_set.serialized);

        out.freeze().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{primitives::Lease, runtime::mock::MockRuntime};
    use alloc::vec;

    fn lease_set(expires: Duration) -> LeaseSet {
        LeaseSet {
            destination: RouterId::from([1u8; 32]),
            leases: vec![Lease {
                gateway: RouterId::from([2u8; 32]),
                tunnel_id: TunnelId::from(99),
                expires,
            }],
            serialized: vec![0xab; 40],
        }
    }

    #[test]
    fn router_info_round_trip() {
        let key = RouterId::from([0x11; 32]);
        let serialized = DatabaseStore::<MockRuntime>::serialize_router_info(
            &key,
            &[0x42; 128],
            ReplyType::None,
        )
        .unwrap();

        let store = DatabaseStore::<MockRuntime>::parse(&serialized).unwrap();
        assert_eq!(store.key, key);
        assert_eq!(store.reply, ReplyType::None);

        match store.payload {
            DatabaseStorePayload::RouterInfo { data } => assert_eq!(data, vec![0x42; 128]),
            _ => panic!("invalid payload"),
        }
    }

    #[test]
    fn router_info_reply_tunnel_id_is_zero() {
        let serialized = DatabaseStore::<MockRuntime>::serialize_router_info(
            &RouterId::from([0x11; 32]),
            &[1, 2, 3],
            ReplyType::Tunnel {
                reply_token: 1337,
                tunnel_id: TunnelId::from(12345),
                router_id: RouterId::from([0x22; 32]),
            },
        )
        .unwrap();

        // reply tunnel id at offset 37 must be zeroed for router infos
        assert_eq!(&serialized[37..41], &[0, 0, 0, 0]);

        let store = DatabaseStore::<MockRuntime>::parse(&serialized).unwrap();
        match store.reply {
            ReplyType::Tunnel {
                reply_token,
                tunnel_id,
                router_id,
            } => {
                assert_eq!(reply_token, 1337);
                assert_eq!(tunnel_id, TunnelId::from(0));
                assert_eq!(router_id, RouterId::from([0x22; 32]));
            }
            _ => panic!("reply expected"),
        }
    }

    #[test]
    fn lease_set_round_trip_with_reply() {
        let key = RouterId::from([0x33; 32]);
        let serialized = DatabaseStore::<MockRuntime>::serialize_lease_set(
            &key,
            &lease_set(Duration::from_millis(100_000)),
            ReplyType::Tunnel {
                reply_token: 7,
                tunnel_id: TunnelId::from(42),
                router_id: RouterId::from([0x44; 32]),
            },
            Duration::from_millis(50_000),
        );

        let store = DatabaseStore::<MockRuntime>::parse(&serialized).unwrap();
        assert_eq!(store.key, key);
        assert!(core::matches!(store.reply, ReplyType::Tunnel { .. }));

        match store.payload {
            DatabaseStorePayload::LeaseSet { data } => assert_eq!(data, vec![0xab; 40]),
            _ => panic!("invalid payload"),
        }
    }

    #[test]
    fn expired_leases_clear_reply_token() {
        let serialized = DatabaseStore::<MockRuntime>::serialize_lease_set(
            &RouterId::from([0x33; 32]),
            &lease_set(Duration::from_millis(1_000)),
            ReplyType::Tunnel {
                reply_token: 7,
                tunnel_id: TunnelId::from(42),
                router_id: RouterId::from([0x44; 32]),
            },
            Duration::from_millis(50_000),
        );

        let store = DatabaseStore::<MockRuntime>::parse(&serialized).unwrap();
        assert_eq!(store.reply, ReplyType::None);
    }
}
