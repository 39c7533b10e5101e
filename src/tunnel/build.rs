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

//! Originator side of the tunnel build exchange.
//!
//! Each hop's request record is ElGamal-encrypted to that hop. Because
//! every hop re-encrypts the whole message with its reply key after
//! processing, later hops' request records are pre-decrypted here so the
//! in-flight encryptions telescope away; the reply unrolls the same
//! layering in reverse.

use crate::{
    crypto::aes::AesCbc,
    error::TunnelError,
    i2np::tunnel::build::{
        encrypt_record, BuildResponseRecord, TunnelBuildRecord, VariableTunnelBuild,
        BUILD_REPLY_ACCEPT,
    },
    primitives::MessageId,
    runtime::Runtime,
    tunnel::{hop::TunnelConfig, LOG_TARGET},
};

use rand_core::RngCore;

use alloc::vec::Vec;

/// Draw a random permutation of `0..len` for record placement.
///
/// A record's position must not reveal its hop's position in the chain.
fn record_permutation(mut rng: impl RngCore, len: usize) -> Vec<usize> {
    let mut indices = (0..len).collect::<Vec<_>>();

    for i in (1..len).rev() {
        let j = (rng.next_u32() as usize) % (i + 1);
        indices.swap(i, j);
    }

    indices
}

/// Create the build request for `config`.
///
/// `reply_message_id` becomes the message ID of the
/// `VariableTunnelBuildReply` the endpoint sends back; intermediate hops
/// forward under throwaway IDs. Record indices are assigned to the hops
/// as a side effect.
pub fn create_build_request<R: Runtime>(
    config: &mut TunnelConfig,
    reply_message_id: MessageId,
) -> VariableTunnelBuild {
    let mut rng = R::rng();
    let num_hops = config.hops.len();
    let request_time = (R::time_since_epoch().as_secs() / 3600) as u32;

    for (hop, record_index) in
        config.hops.iter_mut().zip(record_permutation(&mut rng, num_hops))
    {
        hop.record_index = record_index;
    }

    let mut records = alloc::vec![[0u8; 528]; num_hops];

    for (i, hop) in config.hops.iter().enumerate() {
        let record = TunnelBuildRecord {
            receive_tunnel_id: hop.tunnel_id,
            our_ident: hop.router,
            next_tunnel_id: hop.next_tunnel_id,
            next_ident: hop.next_router,
            layer_key: hop.layer_key.clone(),
            iv_key: hop.iv_key.clone(),
            reply_key: hop.reply_key.clone(),
            reply_iv: hop.reply_iv,
            is_gateway: hop.is_gateway,
            is_endpoint: hop.is_endpoint,
            request_time,
            send_message_id: if i == num_hops - 1 {
                reply_message_id.into()
            } else {
                rng.next_u32()
            },
        };

        let cleartext = record.serialize(&mut rng);
        let encrypted = hop.encryption_key.encrypt(&mut rng, &cleartext, false);
        records[hop.record_index] = encrypt_record(&hop.router, &encrypted);
    }

    // pre-decrypt later hops' records under each earlier hop's reply key
    // so the per-hop reply encryptions cancel out in flight
    for i in (0..num_hops.saturating_sub(1)).rev() {
        let cipher = AesCbc::new(
            config.hops[i].reply_key.to_array(),
            config.hops[i].reply_iv,
        );

        for hop in &config.hops[i + 1..] {
            cipher
                .decrypt(&mut records[hop.record_index])
                .expect("record size is a multiple of the block size");
        }
    }

    VariableTunnelBuild { records }
}

/// Verify the build reply for `config`.
///
/// Unrolls the accumulated reply encryptions hop by hop, then checks
/// every record's embedded hash and reply byte. Any hash mismatch or
/// non-zero reply fails the tunnel.
pub fn handle_build_response(
    config: &TunnelConfig,
    reply: &mut VariableTunnelBuild,
) -> crate::Result<()> {
    if reply.records.len() != config.hops.len()
        || config.hops.iter().any(|hop| hop.record_index >= reply.records.len())
    {
        return Err(TunnelError::InvalidBuildReply.into());
    }

    for i in (0..config.hops.len()).rev() {
        let cipher = AesCbc::new(
            config.hops[i].reply_key.to_array(),
            config.hops[i].reply_iv,
        );

        for hop in &config.hops[..=i] {
            cipher
                .decrypt(&mut reply.records[hop.record_index])
                .expect("record size is a multiple of the block size");
        }
    }

    for hop in &config.hops {
        match BuildResponseRecord::verify(&reply.records[hop.record_index]) {
            None => {
                tracing::warn!(
                    target: LOG_TARGET,
                    router = %hop.router,
                    "build response failed hash verification",
                );
                return Err(TunnelError::InvalidBuildReply.into());
            }
            Some(BUILD_REPLY_ACCEPT) => {}
            Some(ret) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    router = %hop.router,
                    ?ret,
                    "hop rejected tunnel",
                );
                return Err(TunnelError::TunnelRejected.into());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::ElGamalPrivateKey,
        i2np::tunnel::build::{BUILD_RECORD_TO_PEER_LEN, BUILD_REPLY_REJECT_BANDWIDTH},
        primitives::{RouterId, TunnelId},
        runtime::mock::MockRuntime,
    };
    use rand_core::OsRng;

    /// Simulate the transit side: each hop finds its record, decrypts it,
    /// writes a response and re-encrypts every record with its reply key.
    fn run_hops(
        config: &TunnelConfig,
        keys: &[ElGamalPrivateKey],
        message: &mut VariableTunnelBuild,
        reject_at: Option<usize>,
    ) {
        for (i, hop) in config.hops.iter().enumerate() {
            let index = message
                .records
                .iter()
                .position(|record| {
                    record[..BUILD_RECORD_TO_PEER_LEN] == hop.router.as_ref()[..16]
                })
                .expect("record for hop");

            let cleartext = keys[i]
                .decrypt(&message.records[index][BUILD_RECORD_TO_PEER_LEN..], false)
                .expect("elgamal decrypt");
            let record = TunnelBuildRecord::parse(&cleartext).expect("valid record");

            assert_eq!(record.receive_tunnel_id, hop.tunnel_id);
            assert_eq!(record.next_ident, hop.next_router);

            let ret = match reject_at {
                Some(at) if at == i => BUILD_REPLY_REJECT_BANDWIDTH,
                _ => BUILD_REPLY_ACCEPT,
            };
            message.records[index] = BuildResponseRecord::serialize(OsRng, ret);

            let cipher = AesCbc::new(record.reply_key.to_array(), record.reply_iv);
            for record in message.records.iter_mut() {
                cipher.encrypt(record).unwrap();
            }
        }
    }

    fn build_config(num_hops: usize) -> (TunnelConfig, Vec<ElGamalPrivateKey>) {
        let keys =
            (0..num_hops).map(|_| ElGamalPrivateKey::random(OsRng)).collect::<Vec<_>>();
        let peers = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (RouterId::from([i as u8 + 10; 32]), key.public()))
            .collect();

        (
            TunnelConfig::inbound(OsRng, peers, RouterId::from([0xee; 32])),
            keys,
        )
    }

    #[test]
    fn three_hop_build_accepted() {
        let (mut config, keys) = build_config(3);
        let mut message =
            create_build_request::<MockRuntime>(&mut config, MessageId::from(1337));

        run_hops(&config, &keys, &mut message, None);

        assert!(handle_build_response(&config, &mut message).is_ok());
    }

    #[test]
    fn single_hop_build_accepted() {
        let (mut config, keys) = build_config(1);
        let mut message =
            create_build_request::<MockRuntime>(&mut config, MessageId::from(1));

        run_hops(&config, &keys, &mut message, None);

        assert!(handle_build_response(&config, &mut message).is_ok());
    }

    #[test]
    fn rejected_hop_fails_tunnel() {
        let (mut config, keys) = build_config(3);
        let mut message =
            create_build_request::<MockRuntime>(&mut config, MessageId::from(1337));

        run_hops(&config, &keys, &mut message, Some(1));

        assert_eq!(
            handle_build_response(&config, &mut message),
            Err(TunnelError::TunnelRejected.into())
        );
    }

    #[test]
    fn corrupted_reply_fails_verification() {
        let (mut config, keys) = build_config(2);
        let mut message =
            create_build_request::<MockRuntime>(&mut config, MessageId::from(1337));

        run_hops(&config, &keys, &mut message, None);
        message.records[0][17] ^= 0x01;

        assert_eq!(
            handle_build_response(&config, &mut message),
            Err(TunnelError::InvalidBuildReply.into())
        );
    }

    #[test]
    fn outbound_reply_routed_to_reply_tunnel() {
        let keys = (0..2).map(|_| ElGamalPrivateKey::random(OsRng)).collect::<Vec<_>>();
        let peers = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (RouterId::from([i as u8 + 10; 32]), key.public()))
            .collect::<Vec<_>>();

        let mut config = TunnelConfig::outbound(
            OsRng,
            peers,
            RouterId::from([0xcc; 32]),
            TunnelId::from(42),
        );
        let mut message =
            create_build_request::<MockRuntime>(&mut config, MessageId::from(7));

        // the endpoint's record names the reply tunnel as its successor
        let endpoint = &config.hops[1];
        let index = endpoint.record_index;
        let hop0 = &config.hops[0];

        // peel hop 0's pre-decryption off the endpoint record first
        let cipher = AesCbc::new(hop0.reply_key.to_array(), hop0.reply_iv);
        cipher.encrypt(&mut message.records[index]).unwrap();

        let cleartext = keys[1]
            .decrypt(&message.records[index][BUILD_RECORD_TO_PEER_LEN..], false)
            .expect("elgamal decrypt");
        let record = TunnelBuildRecord::parse(&cleartext).unwrap();

        assert!(record.is_endpoint);
        assert_eq!(record.next_ident, RouterId::from([0xcc; 32]));
        assert_eq!(record.next_tunnel_id, TunnelId::from(42));
        assert_eq!(record.send_message_id, 7);
    }
}
