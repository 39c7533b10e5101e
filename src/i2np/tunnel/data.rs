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

//! Tunnel data message and its fragment framing.
//!
//! <https://geti2p.net/spec/tunnel-message>

use crate::{crypto::sha256::Sha256, i2np::LOG_TARGET, primitives::TunnelId};

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    error::{make_error, ErrorKind},
    number::complete::{be_u16, be_u32, be_u8},
    Err, IResult,
};
use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;
use core::fmt;

/// Serialized size of a tunnel data message payload.
pub const TUNNEL_DATA_MSG_SIZE: usize = 1028;

/// Size of the per-hop encrypted region.
pub const TUNNEL_DATA_ENCRYPTED_SIZE: usize = 1008;

/// Tunnel IV length.
pub const TUNNEL_IV_SIZE: usize = 16;

/// Length of the fragment checksum prefix.
const CHECKSUM_LEN: usize = 4;

/// Tunnel data message as it travels between hops.
pub struct EncryptedTunnelData<'a> {
    /// Tunnel ID.
    tunnel_id: TunnelId,

    /// AES IV for this hop.
    iv: &'a [u8],

    /// Encrypted payload, always 1008 bytes.
    ciphertext: &'a [u8],
}

impl<'a> EncryptedTunnelData<'a> {
    /// Attempt to parse [`EncryptedTunnelData`] from `input`.
    pub fn parse_frame(input: &'a [u8]) -> IResult<&'a [u8], EncryptedTunnelData<'a>> {
        let (rest, tunnel_id) = be_u32(input)?;
        let (rest, iv) = take(TUNNEL_IV_SIZE)(rest)?;
        let (rest, ciphertext) = take(TUNNEL_DATA_ENCRYPTED_SIZE)(rest)?;

        Ok((
            rest,
            EncryptedTunnelData {
                tunnel_id: TunnelId::from(tunnel_id),
                iv,
                ciphertext,
            },
        ))
    }

    /// Attempt to parse `input` into [`EncryptedTunnelData`].
    pub fn parse(input: &'a [u8]) -> Option<Self> {
        Some(Self::parse_frame(input).ok()?.1)
    }

    /// Get tunnel ID.
    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    /// Get reference to the IV.
    pub fn iv(&self) -> &'a [u8] {
        self.iv
    }

    /// Get reference to the ciphertext.
    pub fn ciphertext(&self) -> &'a [u8] {
        self.ciphertext
    }

    /// Serialize a tunnel data message from its parts.
    ///
    /// Panics if `ciphertext` isn't exactly the encrypted-region size.
    pub fn serialize(tunnel_id: TunnelId, iv: &[u8; TUNNEL_IV_SIZE], ciphertext: &[u8]) -> Vec<u8> {
        assert_eq!(ciphertext.len(), TUNNEL_DATA_ENCRYPTED_SIZE);

        let mut out = BytesMut::with_capacity(TUNNEL_DATA_MSG_SIZE);
        out.put_u32(*tunnel_id);
        out.put_slice(iv);
        out.put_slice(ciphertext);

        out.freeze().to_vec()
    }
}

/// Where a reassembled I2NP message is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryInstructions {
    /// Message meant for the local router.
    Local,

    /// Message meant for a router.
    Router {
        /// Hash of the router.
        hash: [u8; 32],
    },

    /// Message meant for a tunnel.
    Tunnel {
        /// Tunnel ID.
        tunnel_id: u32,

        /// Hash of the tunnel gateway.
        hash: [u8; 32],
    },
}

/// Fragment classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentKind {
    /// Complete I2NP message in a single fragment.
    Unfragmented {
        /// Delivery instructions.
        delivery_instructions: DeliveryInstructions,
    },

    /// First fragment of a fragmented message.
    First {
        /// Message ID shared by all fragments of the message.
        message_id: u32,

        /// Delivery instructions.
        delivery_instructions: DeliveryInstructions,
    },

    /// Follow-on fragment.
    FollowOn {
        /// Message ID shared by all fragments of the message.
        message_id: u32,

        /// Fragment number, 1..=63.
        fragment_number: u8,

        /// Is this the last fragment of the message.
        last: bool,
    },
}

/// One fragment of the decrypted tunnel data region.
pub struct TunnelDataFragment<'a> {
    /// Fragment classification.
    pub kind: FragmentKind,

    /// Fragment payload.
    pub payload: &'a [u8],
}

impl<'a> fmt::Debug for TunnelDataFragment<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDataFragment")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl DeliveryInstructions {
    /// Attempt to parse the first-fragment delivery fields from `input`.
    fn parse(flag: u8, input: &[u8]) -> IResult<&[u8], Self> {
        match (flag >> 5) & 0x03 {
            0x00 => Ok((input, DeliveryInstructions::Local)),
            0x01 => {
                let (rest, tunnel_id) = be_u32(input)?;
                let (rest, hash) = take(32usize)(rest)?;

                Ok((
                    rest,
                    DeliveryInstructions::Tunnel {
                        tunnel_id,
                        hash: hash.try_into().expect("32 bytes"),
                    },
                ))
            }
            0x02 => {
                let (rest, hash) = take(32usize)(input)?;

                Ok((
                    rest,
                    DeliveryInstructions::Router {
                        hash: hash.try_into().expect("32 bytes"),
                    },
                ))
            }
            kind => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?kind,
                    "invalid delivery kind",
                );
                Err(Err::Error(make_error(input, ErrorKind::Fail)))
            }
        }
    }

    /// Serialize the delivery fields (without the flag byte) into `out`.
    fn serialize_fields(&self, out: &mut BytesMut) {
        match self {
            Self::Local => {}
            Self::Tunnel { tunnel_id, hash } => {
                out.put_u32(*tunnel_id);
                out.put_slice(hash);
            }
            Self::Router { hash } => out.put_slice(hash),
        }
    }

    /// Delivery type bits of the flag byte.
    fn flag_bits(&self) -> u8 {
        match self {
            Self::Local => 0x00,
            Self::Tunnel { .. } => 0x01 << 5,
            Self::Router { .. } => 0x02 << 5,
        }
    }
}

/// Attempt to parse one fragment from `input`.
fn parse_fragment(input: &[u8]) -> IResult<&[u8], TunnelDataFragment<'_>> {
    let (rest, flag) = be_u8(input)?;

    // follow-on fragment
    if flag >> 7 == 0x01 {
        let fragment_number = (flag >> 1) & 0x3f;
        let last = flag & 0x01 == 0x01;
        let (rest, message_id) = be_u32(rest)?;
        let (rest, size) = be_u16(rest)?;
        let (rest, payload) = take(size as usize)(rest)?;

        return Ok((
            rest,
            TunnelDataFragment {
                kind: FragmentKind::FollowOn {
                    message_id,
                    fragment_number,
                    last,
                },
                payload,
            },
        ));
    }

    let (rest, delivery_instructions) = DeliveryInstructions::parse(flag, rest)?;

    let (rest, kind) = match (flag >> 3) & 0x01 {
        0x00 => (
            rest,
            FragmentKind::Unfragmented {
                delivery_instructions,
            },
        ),
        _ => {
            let (rest, message_id) = be_u32(rest)?;

            (
                rest,
                FragmentKind::First {
                    message_id,
                    delivery_instructions,
                },
            )
        }
    };

    let (rest, size) = be_u16(rest)?;
    let (rest, payload) = take(size as usize)(rest)?;

    Ok((rest, TunnelDataFragment { kind, payload }))
}

/// Decrypted tunnel data region.
///
/// `checksum (4) | random nonzero padding | 0x00 | fragment*`
pub struct TunnelDataPayload;

impl TunnelDataPayload {
    /// Parse the decrypted region into fragments.
    ///
    /// Locates the zero terminator, verifies the checksum over
    /// `fragments || iv` and walks the fragments until the end of the
    /// region. Any failure drops the whole message.
    pub fn parse<'a>(decrypted: &'a [u8], iv: &[u8]) -> Option<Vec<TunnelDataFragment<'a>>> {
        if decrypted.len() != TUNNEL_DATA_ENCRYPTED_SIZE {
            return None;
        }

        let zero = decrypted[CHECKSUM_LEN..].iter().position(|byte| byte == &0x00)?;
        let fragments = &decrypted[CHECKSUM_LEN + zero + 1..];

        let checksum = Sha256::new().update(fragments).update(iv).finalize();
        if checksum[..CHECKSUM_LEN] != decrypted[..CHECKSUM_LEN] {
            tracing::warn!(
                target: LOG_TARGET,
                "tunnel data checksum mismatch",
            );
            return None;
        }

        let mut input = fragments;
        let mut parsed = Vec::new();

        while !input.is_empty() {
            let (rest, fragment) = parse_fragment(input).ok()?;
            parsed.push(fragment);
            input = rest;
        }

        Some(parsed)
    }

    /// Serialize `fragments` into a full decrypted region.
    ///
    /// The gap between the checksum and the zero terminator is filled with
    /// random nonzero padding.
    pub fn serialize(
        mut rng: impl RngCore + CryptoRng,
        fragments: &[(FragmentKind, &[u8])],
        iv: &[u8],
    ) -> Option<[u8; TUNNEL_DATA_ENCRYPTED_SIZE]> {
        let mut body = BytesMut::with_capacity(TUNNEL_DATA_ENCRYPTED_SIZE);

        for (kind, payload) in fragments {
            match kind {
                FragmentKind::Unfragmented {
                    delivery_instructions,
                } => {
                    body.put_u8(delivery_instructions.flag_bits());
                    delivery_instructions.serialize_fields(&mut body);
                }
                FragmentKind::First {
                    message_id,
                    delivery_instructions,
                } => {
                    body.put_u8(delivery_instructions.flag_bits() | (0x01 << 3));
                    delivery_instructions.serialize_fields(&mut body);
                    body.put_u32(*message_id);
                }
                FragmentKind::FollowOn {
                    message_id,
                    fragment_number,
                    last,
                } => {
                    body.put_u8(0x80 | (fragment_number << 1) | u8::from(*last));
                    body.put_u32(*message_id);
                }
            }

            body.put_u16(payload.len() as u16);
            body.put_slice(payload);
        }

        let padding_len = TUNNEL_DATA_ENCRYPTED_SIZE.checked_sub(CHECKSUM_LEN + 1 + body.len())?;

        let mut out = [0u8; TUNNEL_DATA_ENCRYPTED_SIZE];
        let checksum = Sha256::new().update(&body).update(iv).finalize();
        out[..CHECKSUM_LEN].copy_from_slice(&checksum[..CHECKSUM_LEN]);

        for byte in out[CHECKSUM_LEN..CHECKSUM_LEN + padding_len].iter_mut() {
            *byte = loop {
                let candidate = (rng.next_u32() & 0xff) as u8;
                if candidate != 0 {
                    break candidate;
                }
            };
        }

        out[CHECKSUM_LEN + padding_len] = 0x00;
        out[CHECKSUM_LEN + padding_len + 1..].copy_from_slice(&body);

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn single_fragment_round_trip() {
        let region = TunnelDataPayload::serialize(
            OsRng,
            &[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Local,
                },
                &[1, 2, 3, 4],
            )],
            &[0xaa; 16],
        )
        .unwrap();

        let fragments = TunnelDataPayload::parse(&region, &[0xaa; 16]).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].payload, &[1, 2, 3, 4]);
        assert!(core::matches!(
            fragments[0].kind,
            FragmentKind::Unfragmented {
                delivery_instructions: DeliveryInstructions::Local
            }
        ));
    }

    #[test]
    fn multiple_fragments_round_trip() {
        let region = TunnelDataPayload::serialize(
            OsRng,
            &[
                (
                    FragmentKind::First {
                        message_id: 0xcafe_babe,
                        delivery_instructions: DeliveryInstructions::Tunnel {
                            tunnel_id: 17,
                            hash: [0xbb; 32],
                        },
                    },
                    &[7u8; 100],
                ),
                (
                    FragmentKind::FollowOn {
                        message_id: 0xcafe_babe,
                        fragment_number: 1,
                        last: true,
                    },
                    &[8u8; 50],
                ),
            ],
            &[0xcc; 16],
        )
        .unwrap();

        let fragments = TunnelDataPayload::parse(&region, &[0xcc; 16]).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            fragments[0].kind,
            FragmentKind::First {
                message_id: 0xcafe_babe,
                delivery_instructions: DeliveryInstructions::Tunnel {
                    tunnel_id: 17,
                    hash: [0xbb; 32],
                },
            }
        );
        assert_eq!(
            fragments[1].kind,
            FragmentKind::FollowOn {
                message_id: 0xcafe_babe,
                fragment_number: 1,
                last: true,
            }
        );
    }

    #[test]
    fn corrupted_region_rejected() {
        let mut region = TunnelDataPayload::serialize(
            OsRng,
            &[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Local,
                },
                &[1, 2, 3, 4],
            )],
            &[0xaa; 16],
        )
        .unwrap();

        *region.last_mut().unwrap() ^= 0x01;
        assert!(TunnelDataPayload::parse(&region, &[0xaa; 16]).is_none());
    }

    #[test]
    fn wrong_iv_rejected() {
        let region = TunnelDataPayload::serialize(
            OsRng,
            &[(
                FragmentKind::Unfragmented {
                    delivery_instructions: DeliveryInstructions::Local,
                },
                &[1, 2, 3, 4],
            )],
            &[0xaa; 16],
        )
        .unwrap();

        assert!(TunnelDataPayload::parse(&region, &[0xab; 16]).is_none());
    }

    #[test]
    fn encrypted_wire_round_trip() {
        let serialized =
            EncryptedTunnelData::serialize(TunnelId::from(1337), &[0x11; 16], &[0x22; 1008]);
        assert_eq!(serialized.len(), TUNNEL_DATA_MSG_SIZE);

        let parsed = EncryptedTunnelData::parse(&serialized).unwrap();
        assert_eq!(parsed.tunnel_id(), TunnelId::from(1337));
        assert_eq!(parsed.iv(), &[0x11; 16]);
        assert_eq!(parsed.ciphertext(), &[0x22; 1008][..]);
    }
}
