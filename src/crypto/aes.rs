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

use crate::error::CryptoError;

use aes::{
    cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes256,
};

/// AES-256-CBC over a fixed key and IV.
///
/// Both directions operate in place; input length must be a multiple of 16.
/// A fresh cipher state is built per call so one instance can be reused for
/// any number of independent messages with the same key/IV pair.
pub struct AesCbc {
    /// AES-256 key.
    key: [u8; 32],

    /// CBC initialization vector.
    iv: [u8; 16],
}

impl AesCbc {
    /// Create new [`AesCbc`].
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Encrypt `buffer` in place.
    pub fn encrypt(&self, buffer: &mut [u8]) -> crate::Result<()> {
        if buffer.len() % 16 != 0 {
            return Err(CryptoError::BlockSize.into());
        }
        let len = buffer.len();

        cbc::Encryptor::<Aes256>::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_mut::<NoPadding>(buffer, len)
            .map_err(|_| CryptoError::BlockSize)?;

        Ok(())
    }

    /// Decrypt `buffer` in place.
    pub fn decrypt(&self, buffer: &mut [u8]) -> crate::Result<()> {
        if buffer.len() % 16 != 0 {
            return Err(CryptoError::BlockSize.into());
        }

        cbc::Decryptor::<Aes256>::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_mut::<NoPadding>(buffer)
            .map_err(|_| CryptoError::BlockSize)?;

        Ok(())
    }
}
