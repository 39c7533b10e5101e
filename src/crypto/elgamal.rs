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

//! 2048-bit ElGamal.
//!
//! The 222-byte plaintext is wrapped into a 255-byte block
//! `0xFF | SHA256(data) | data` before exponentiation so decryption can
//! detect tampering without an outer MAC. Output is the two 256-byte
//! residues, each optionally prefixed with a zero byte (514- vs 512-byte
//! form; the garlic new-session block uses the former, tunnel build
//! records the latter).

use crate::crypto::{dsa::rectify, sha256::Sha256};

use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{Num, One};
use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;

/// ElGamal plaintext length.
pub const ELGAMAL_PLAINTEXT_LEN: usize = 222;

/// Encrypted length without zero padding.
pub const ELGAMAL_ENCRYPTED_LEN: usize = 512;

/// Encrypted length with both halves zero-padded to 257 bytes.
pub const ELGAMAL_ENCRYPTED_PADDED_LEN: usize = 514;

/// 2048-bit MODP prime, <https://geti2p.net/spec/cryptography#elgamal>.
const I2P_ELGAMAL_P: &str = "\
                             FFFFFFFF_FFFFFFFF_C90FDAA2_2168C234_C4C6628B_80DC1CD1\
                             29024E08_8A67CC74_020BBEA6_3B139B22_514A0879_8E3404DD\
                             EF9519B3_CD3A431B_302B0A6D_F25F1437_4FE1356D_6D51C245\
                             E485B576_625E7EC6_F44C42E9_A637ED6B_0BFF5CB6_F406B7ED\
                             EE386BFB_5A899FA5_AE9F2411_7C4B1FE6_49286651_ECE45B3D\
                             C2007CB8_A163BF05_98DA4836_1C55D39A_69163FA8_FD24CF5F\
                             83655D23_DCA3AD96_1C62F356_208552BB_9ED52907_7096966D\
                             670C354E_4ABC9804_F1746C08_CA18217C_32905E46_2E36CE3B\
                             E39E772C_180E8603_9B2783A2_EC07A28F_B5C55DF0_6F4C52C9\
                             DE2BCBF6_95581718_3995497C_EA956AE5_15D22618_98FA0510\
                             15728E5A_8AACAA68_FFFFFFFF_FFFFFFFF";

lazy_static! {
    static ref ELGAMAL_P: BigUint = BigUint::from_str_radix(I2P_ELGAMAL_P, 16).unwrap();
    static ref ELGAMAL_G: BigUint = BigUint::from(2u32);
    static ref ELGAMAL_PM2: BigUint = &*ELGAMAL_P - BigUint::from(2u32);
}

/// ElGamal public key, 256 bytes.
#[derive(Debug, Clone)]
pub struct ElGamalPublicKey {
    /// y = g^x mod p.
    y: BigUint,

    /// Serialized form.
    bytes: [u8; 256],
}

impl ElGamalPublicKey {
    /// Create [`ElGamalPublicKey`] from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 256] = bytes.try_into().ok()?;
        let y = BigUint::from_bytes_be(&bytes);

        (y > BigUint::one() && y < *ELGAMAL_P).then_some(Self { y, bytes })
    }

    /// Serialized public key.
    pub fn as_bytes(&self) -> &[u8; 256] {
        &self.bytes
    }

    /// Encrypt 222 bytes of `data`.
    ///
    /// Returns 514 bytes if `zero_pad` is set, 512 otherwise.
    pub fn encrypt(
        &self,
        mut rng: impl RngCore + CryptoRng,
        data: &[u8; ELGAMAL_PLAINTEXT_LEN],
        zero_pad: bool,
    ) -> Vec<u8> {
        // block = nonzero marker | integrity hash | data
        let mut block = [0u8; 255];
        block[0] = 0xff;
        block[1..33].copy_from_slice(&Sha256::digest(data));
        block[33..].copy_from_slice(data);

        let k = {
            let mut k = [0u8; 256];
            rng.fill_bytes(&mut k);

            BigUint::from_bytes_be(&k) % &*ELGAMAL_P
        };

        let a = ELGAMAL_G.modpow(&k, &ELGAMAL_P);
        let b = BigUint::from_bytes_be(&block) * self.y.modpow(&k, &ELGAMAL_P) % &*ELGAMAL_P;

        let mut out = Vec::with_capacity(if zero_pad {
            ELGAMAL_ENCRYPTED_PADDED_LEN
        } else {
            ELGAMAL_ENCRYPTED_LEN
        });

        if zero_pad {
            out.push(0u8);
        }
        out.extend_from_slice(&rectify(&a, 256));
        if zero_pad {
            out.push(0u8);
        }
        out.extend_from_slice(&rectify(&b, 256));

        out
    }
}

/// ElGamal private key.
#[derive(Clone)]
pub struct ElGamalPrivateKey {
    /// Private exponent.
    x: BigUint,
}

impl ElGamalPrivateKey {
    /// Generate new [`ElGamalPrivateKey`].
    pub fn random(mut rng: impl RngCore + CryptoRng) -> Self {
        let mut x = [0u8; 256];
        rng.fill_bytes(&mut x);

        Self {
            x: BigUint::from_bytes_be(&x) % &*ELGAMAL_P,
        }
    }

    /// Create [`ElGamalPrivateKey`] from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        (bytes.len() == 256).then(|| Self {
            x: BigUint::from_bytes_be(bytes),
        })
    }

    /// Get associated public key.
    pub fn public(&self) -> ElGamalPublicKey {
        let y = ELGAMAL_G.modpow(&self.x, &ELGAMAL_P);
        let bytes: [u8; 256] = rectify(&y, 256).try_into().expect("rectified to 256 bytes");

        ElGamalPublicKey { y, bytes }
    }

    /// Decrypt `encrypted` into the 222-byte plaintext.
    ///
    /// Returns `None` if the input length doesn't match `zero_pad` or the
    /// embedded integrity hash doesn't cover the recovered data.
    pub fn decrypt(
        &self,
        encrypted: &[u8],
        zero_pad: bool,
    ) -> Option<[u8; ELGAMAL_PLAINTEXT_LEN]> {
        let (a, b) = match (zero_pad, encrypted.len()) {
            (true, ELGAMAL_ENCRYPTED_PADDED_LEN) => (&encrypted[1..257], &encrypted[258..514]),
            (false, ELGAMAL_ENCRYPTED_LEN) => (&encrypted[..256], &encrypted[256..512]),
            _ => return None,
        };

        let a = BigUint::from_bytes_be(a);
        let b = BigUint::from_bytes_be(b);

        // b * (a^x)^-1 mod p, inverse via Fermat
        let shared = a.modpow(&self.x, &ELGAMAL_P);
        let block = b * shared.modpow(&ELGAMAL_PM2, &ELGAMAL_P) % &*ELGAMAL_P;
        let block = rectify(&block, 255);

        let data: [u8; ELGAMAL_PLAINTEXT_LEN] = block[33..].try_into().expect("255-byte block");

        (Sha256::digest(data) == block[1..33]).then_some(data)
    }
}
