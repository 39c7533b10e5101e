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

//! Tunnel build records.
//!
//! A build message carries one 528-byte record per hop:
//! `toPeer (16) | ElGamal(cleartext) (512)` where `toPeer` is the first 16
//! bytes of the hop's identity hash. A processed record is replaced with
//! `padding (495) | SHA256(padding || ret) (32) | ret (1)`.

use crate::{
    crypto::{sha256::Sha256, SessionKey},
    primitives::{RouterId, TunnelId},
};

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::take,
    number::complete::{be_u32, be_u8},
    IResult,
};
use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;

/// Serialized build record length.
pub const BUILD_RECORD_LEN: usize = 528;

/// Length of the truncated identity hash addressing a record.
pub const BUILD_RECORD_TO_PEER_LEN: usize = 16;

/// Length of the ElGamal-encrypted part of a record.
pub const BUILD_RECORD_ENCRYPTED_LEN: usize = 512;

/// Length of the decrypted request record.
pub const BUILD_RECORD_CLEARTEXT_LEN: usize = 222;

/// Length of the padding inside a response record.
const RESPONSE_PADDING_LEN: usize = 495;

/// Record count of the fixed-size `TunnelBuild` message.
pub const NUM_TUNNEL_BUILD_RECORDS: usize = 8;

/// Reply byte of an accepted tunnel.
pub const BUILD_REPLY_ACCEPT: u8 = 0;

/// Reply byte of a tunnel rejected for resource reasons.
pub const BUILD_REPLY_REJECT_BANDWIDTH: u8 = 30;

/// Request record flag bit: the hop is the tunnel's gateway.
const FLAG_GATEWAY: u8 = 0x80;

/// Request record flag bit: the hop is the tunnel's endpoint.
const FLAG_ENDPOINT: u8 = 0x40;

/// Decrypted per-hop build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelBuildRecord {
    /// Tunnel ID the hop receives messages on.
    pub receive_tunnel_id: TunnelId,

    /// The hop's own identity hash.
    pub our_ident: RouterId,

    /// Tunnel ID at the next hop.
    pub next_tunnel_id: TunnelId,

    /// Identity hash of the next hop.
    pub next_ident: RouterId,

    /// Layer encryption key.
    pub layer_key: SessionKey,

    /// IV encryption key.
    pub iv_key: SessionKey,

    /// Key the hop encrypts build replies with.
    pub reply_key: SessionKey,

    /// IV the hop encrypts build replies with.
    pub reply_iv: [u8; 16],

    /// The hop is the tunnel's gateway.
    pub is_gateway: bool,

    /// The hop is the tunnel's endpoint.
    pub is_endpoint: bool,

    /// Request time, hours since Unix epoch.
    pub request_time: u32,

    /// Message ID the reply is sent with.
    pub send_message_id: u32,
}

impl TunnelBuildRecord {
    /// Serialize [`TunnelBuildRecord`] into the 222-byte cleartext.
    ///
    /// Trailing padding is drawn from `rng`.
    pub fn serialize(
        &self,
        mut rng: impl RngCore + CryptoRng,
    ) -> [u8; BUILD_RECORD_CLEARTEXT_LEN] {
        let mut out = BytesMut::with_capacity(BUILD_RECORD_CLEARTEXT_LEN);

        out.put_u32(*self.receive_tunnel_id);
        out.put_slice(self.our_ident.as_ref());
        out.put_u32(*self.next_tunnel_id);
        out.put_slice(self.next_ident.as_ref());
        out.put_slice(self.layer_key.as_ref());
        out.put_slice(self.iv_key.as_ref());
        out.put_slice(self.reply_key.as_ref());
        out.put_slice(&self.reply_iv);
        out.put_u8(
            if self.is_gateway { FLAG_GATEWAY } else { 0 }
                | if self.is_endpoint { FLAG_ENDPOINT } else { 0 },
        );
        out.put_u32(self.request_time);
        out.put_u32(self.send_message_id);

        let mut padding = [0u8; 29];
        rng.fill_bytes(&mut padding);
        out.put_slice(&padding);

        out.as_ref().try_into().expect("222 bytes")
    }

    /// Attempt to parse [`TunnelBuildRecord`] from a decrypted cleartext.
    pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, receive_tunnel_id) = be_u32(input)?;
        let (rest, our_ident) = take(RouterId::LEN)(rest)?;
        let (rest, next_tunnel_id) = be_u32(rest)?;
        let (rest, next_ident) = take(RouterId::LEN)(rest)?;
        let (rest, layer_key) = take(32usize)(rest)?;
        let (rest, iv_key) = take(32usize)(rest)?;
        let (rest, reply_key) = take(32usize)(rest)?;
        let (rest, reply_iv) = take(16usize)(rest)?;
        let (rest, flag) = be_u8(rest)?;
        let (rest, request_time) = be_u32(rest)?;
        let (rest, send_message_id) = be_u32(rest)?;
        let (rest, _padding) = take(29usize)(rest)?;

        Ok((
            rest,
            Self {
                receive_tunnel_id: TunnelId::from(receive_tunnel_id),
                our_ident: RouterId::from_bytes(our_ident).expect("32 bytes"),
                next_tunnel_id: TunnelId::from(next_tunnel_id),
                next_ident: RouterId::from_bytes(next_ident).expect("32 bytes"),
                layer_key: SessionKey::from_bytes(layer_key).expect("32 bytes"),
                iv_key: SessionKey::from_bytes(iv_key).expect("32 bytes"),
                reply_key: SessionKey::from_bytes(reply_key).expect("32 bytes"),
                reply_iv: reply_iv.try_into().expect("16 bytes"),
                is_gateway: flag & FLAG_GATEWAY != 0,
                is_endpoint: flag & FLAG_ENDPOINT != 0,
                request_time,
                send_message_id,
            },
        ))
    }

    /// Attempt to parse `input` into [`TunnelBuildRecord`].
    pub fn parse(input: &[u8]) -> Option<Self> {
        Some(Self::parse_frame(input).ok()?.1)
    }
}

/// Build a 528-byte encrypted request record.
pub fn encrypt_record(
    to_peer: &RouterId,
    encrypted: &[u8],
) -> [u8; BUILD_RECORD_LEN] {
    assert_eq!(encrypted.len(), BUILD_RECORD_ENCRYPTED_LEN);

    let mut out = [0u8; BUILD_RECORD_LEN];
    out[..BUILD_RECORD_TO_PEER_LEN].copy_from_slice(to_peer.truncated());
    out[BUILD_RECORD_TO_PEER_LEN..].copy_from_slice(encrypted);

    out
}

/// Build response record, written over the request record by the hop.
pub struct BuildResponseRecord;

impl BuildResponseRecord {
    /// Serialize a response record with reply byte `ret`.
    pub fn serialize(mut rng: impl RngCore + CryptoRng, ret: u8) -> [u8; BUILD_RECORD_LEN] {
        let mut out = [0u8; BUILD_RECORD_LEN];

        rng.fill_bytes(&mut out[..RESPONSE_PADDING_LEN]);
        out[BUILD_RECORD_LEN - 1] = ret;

        let hash = Sha256::new()
            .update(&out[..RESPONSE_PADDING_LEN])
            .update([ret])
            .finalize();
        out[RESPONSE_PADDING_LEN..RESPONSE_PADDING_LEN + 32].copy_from_slice(&hash);

        out
    }

    /// Verify a decrypted response record and return its reply byte.
    ///
    /// Returns `None` if the embedded hash doesn't cover `padding || ret`.
    pub fn verify(record: &[u8; BUILD_RECORD_LEN]) -> Option<u8> {
        let ret = record[BUILD_RECORD_LEN - 1];
        let hash = Sha256::new()
            .update(&record[..RESPONSE_PADDING_LEN])
            .update([ret])
            .finalize();

        (hash == record[RESPONSE_PADDING_LEN..RESPONSE_PADDING_LEN + 32]).then_some(ret)
    }
}

/// Variable tunnel build message, `recordCount (1) | record (528)*`.
///
/// Also covers the reply: a `VariableTunnelBuildReply` has the same frame,
/// every record holding a layered-encrypted response.
pub struct VariableTunnelBuild {
    /// Build records.
    pub records: Vec<[u8; BUILD_RECORD_LEN]>,
}

impl VariableTunnelBuild {
    /// Attempt to parse [`VariableTunnelBuild`] from `input`.
    pub fn parse(input: &[u8]) -> Option<Self> {
        let (mut rest, num_records) = be_u8::<_, nom::error::Error<&[u8]>>(input).ok()?;

        let mut records = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let (next, record) =
                take::<_, _, nom::error::Error<&[u8]>>(BUILD_RECORD_LEN)(rest).ok()?;
            records.push(record.try_into().expect("528 bytes"));
            rest = next;
        }

        Some(Self { records })
    }

    /// Serialize [`VariableTunnelBuild`] into a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(1 + self.records.len() * BUILD_RECORD_LEN);

        out.put_u8(self.records.len() as u8);
        for record in &self.records {
            out.put_slice(record);
        }

        out.freeze().to_vec()
    }
}

/// Fixed-size tunnel build message, always eight records and no count byte.
pub struct TunnelBuild {
    /// Build records.
    pub records: [[u8; BUILD_RECORD_LEN]; NUM_TUNNEL_BUILD_RECORDS],
}

impl TunnelBuild {
    /// Attempt to parse [`TunnelBuild`] from `input`.
    pub fn parse(input: &[u8]) -> Option<Self> {
        if input.len() < NUM_TUNNEL_BUILD_RECORDS * BUILD_RECORD_LEN {
            return None;
        }

        let mut records = [[0u8; BUILD_RECORD_LEN]; NUM_TUNNEL_BUILD_RECORDS];
        for (i, record) in records.iter_mut().enumerate() {
            record.copy_from_slice(&input[i * BUILD_RECORD_LEN..(i + 1) * BUILD_RECORD_LEN]);
        }

        Some(Self { records })
    }

    /// Serialize [`TunnelBuild`] into a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(NUM_TUNNEL_BUILD_RECORDS * BUILD_RECORD_LEN);

        for record in &self.records {
            out.put_slice(record);
        }

        out.freeze().to_vec()
    }
}
