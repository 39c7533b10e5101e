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
    crypto::dsa::{DsaPrivateKey, DsaPublicKey, DsaSignature},
    error::{CryptoError, Error},
};

use data_encoding::{Encoding, Specification};
use ed25519_dalek::Signer;
use lazy_static::lazy_static;
use p256::ecdsa::signature::Verifier as _;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use alloc::{string::String, vec::Vec};

pub mod aes;
pub mod dsa;
pub mod elgamal;
pub mod sha256;

pub use elgamal::{ElGamalPrivateKey, ElGamalPublicKey};

// Taken from `ire` which is licensed under MIT
//
// Credits to str4d
lazy_static! {
    pub static ref I2P_BASE64: Encoding = {
        let mut spec = Specification::new();
        spec.symbols
            .push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~");
        spec.padding = Some('=');
        spec.encoding().unwrap()
    };
}

/// Base64 encode `data`
pub fn base64_encode<T: AsRef<[u8]>>(data: T) -> String {
    I2P_BASE64.encode(data.as_ref())
}

/// Base64 decode `data`
pub fn base64_decode<T: AsRef<[u8]>>(data: T) -> Option<Vec<u8>> {
    I2P_BASE64.decode(data.as_ref()).ok()
}

/// 32-byte AES-256 session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Generate new random [`SessionKey`].
    pub fn random(mut rng: impl RngCore + CryptoRng) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);

        Self(key)
    }

    /// Create [`SessionKey`] from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }

    /// Key bytes.
    pub fn to_array(&self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for SessionKey {
    fn from(value: [u8; 32]) -> Self {
        SessionKey(value)
    }
}

impl AsRef<[u8]> for SessionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Zeroize for SessionKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Signing public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPublicKey {
    /// EdDSA.
    Ed25519(ed25519_dalek::VerifyingKey),

    /// ECDSA-SHA256-P256
    P256(p256::EncodedPoint, p256::ecdsa::VerifyingKey),

    /// DSA-SHA1.
    DsaSha1(DsaPublicKey),
}

impl SigningPublicKey {
    /// Attempt to construct `SigningPublicKey::Ed25519` from `key`.
    pub fn from_bytes(key: &[u8; 32]) -> Option<Self> {
        Some(SigningPublicKey::Ed25519(
            ed25519_dalek::VerifyingKey::from_bytes(key).ok()?,
        ))
    }

    /// Attempt to construct `SigningPublicKey::P256` from `data`.
    pub fn p256(data: &[u8]) -> Option<Self> {
        let encoded = p256::EncodedPoint::from_untagged_bytes(data.into());

        Some(Self::P256(
            encoded,
            p256::ecdsa::VerifyingKey::from_encoded_point(&encoded).ok()?,
        ))
    }

    /// Attempt to construct `SigningPublicKey::DsaSha1` from `data`.
    pub fn dsa_sha1(data: &[u8]) -> Option<Self> {
        DsaPublicKey::from_bytes(data).map(Self::DsaSha1)
    }

    /// Verify `signature` of `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> crate::Result<()> {
        match self {
            Self::Ed25519(key) => {
                let signature: [u8; 64] = signature
                    .try_into()
                    .map_err(|_| Error::Crypto(CryptoError::InvalidSignature))?;
                let signature = ed25519_dalek::Signature::from_bytes(&signature);

                key.verify_strict(message, &signature).map_err(From::from)
            }
            Self::P256(_, vk) => {
                let signature = p256::ecdsa::Signature::try_from(signature)
                    .map_err(|_| Error::Crypto(CryptoError::InvalidSignature))?;

                vk.verify(message, &signature)
                    .map_err(|_| Error::Crypto(CryptoError::InvalidSignature))
            }
            Self::DsaSha1(public_key) => {
                let signature = DsaSignature::from_bytes(signature)
                    .ok_or(Error::Crypto(CryptoError::InvalidSignature))?;

                match public_key.verify(message, &signature) {
                    true => Ok(()),
                    false => Err(Error::Crypto(CryptoError::InvalidSignature)),
                }
            }
        }
    }

    /// Get signature length.
    pub fn signature_len(&self) -> usize {
        match self {
            Self::Ed25519(_) => 64usize,
            Self::P256(_, _) => 64usize,
            Self::DsaSha1(_) => 40usize,
        }
    }
}

impl AsRef<[u8]> for SigningPublicKey {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ed25519(key) => key.as_bytes(),
            Self::P256(pk, _) => &pk.as_bytes()[1..],
            Self::DsaSha1(key) => key.as_bytes(),
        }
    }
}

/// Signing private key.
#[derive(Clone)]
pub enum SigningPrivateKey {
    /// EdDSA.
    Ed25519(ed25519_dalek::SigningKey),

    /// DSA-SHA1.
    DsaSha1(DsaPrivateKey),
}

impl SigningPrivateKey {
    /// Generate random Ed25519 [`SigningPrivateKey`].
    pub fn random(mut csprng: impl RngCore + CryptoRng) -> Self {
        Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Attempt to construct Ed25519 `SigningPrivateKey` from `key`.
    pub fn from_bytes(key: &[u8]) -> Option<Self> {
        let key: [u8; 32] = key.try_into().ok()?;

        Some(SigningPrivateKey::Ed25519(
            ed25519_dalek::SigningKey::from_bytes(&key),
        ))
    }

    /// Sign `message`.
    pub fn sign(&self, rng: impl RngCore + CryptoRng, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
            Self::DsaSha1(key) => key.sign(rng, message).to_bytes().to_vec(),
        }
    }

    /// Get verifying key.
    pub fn public(&self) -> SigningPublicKey {
        match self {
            Self::Ed25519(key) => SigningPublicKey::Ed25519(key.verifying_key()),
            Self::DsaSha1(key) => SigningPublicKey::DsaSha1(key.public()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn ed25519_sign_verify() {
        let private_key = SigningPrivateKey::random(OsRng);
        let public_key = private_key.public();

        let signature = private_key.sign(OsRng, b"i2np");

        assert!(public_key.verify(b"i2np", &signature).is_ok());
        assert!(public_key.verify(b"i2cp", &signature).is_err());
    }

    #[test]
    fn dsa_sha1_sign_verify() {
        let private_key = SigningPrivateKey::DsaSha1(DsaPrivateKey::random(OsRng));
        let public_key = private_key.public();

        let signature = private_key.sign(OsRng, b"tunnel build");
        assert_eq!(signature.len(), public_key.signature_len());

        assert!(public_key.verify(b"tunnel build", &signature).is_ok());
    }

    #[test]
    fn invalid_verifying_key_rejected() {
        // not a valid curve point
        assert!(SigningPublicKey::p256(&[0u8; 64]).is_none());
    }

    #[test]
    fn base64_alphabet() {
        assert_eq!(base64_encode([0xfb, 0xff]), "-~8=");
        assert_eq!(base64_decode("-~8=").unwrap(), alloc::vec![0xfb, 0xff]);
    }
}
