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

use core::fmt;

/// Encryption/decryption error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// ElGamal decryption failed (integrity hash mismatch or malformed block).
    ElGamal,

    /// AES input length is not a multiple of the block size.
    BlockSize,

    /// Key material could not be parsed into a valid key.
    InvalidKey,

    /// Signature verification failed.
    InvalidSignature,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElGamal => write!(f, "elgamal decryption failed"),
            Self::BlockSize => write!(f, "input not a multiple of the aes block size"),
            Self::InvalidKey => write!(f, "invalid key material"),
            Self::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}

/// Garlic session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Session tag was not found and the message is too short
    /// to contain an ElGamal block.
    UnknownTag,

    /// Payload hash inside the AES block doesn't match the payload.
    PayloadHashMismatch,

    /// No unexpired session tag and no known destination.
    NoDestination,

    /// Message was malformed.
    Malformed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag => write!(f, "unknown session tag"),
            Self::PayloadHashMismatch => write!(f, "payload hash mismatch"),
            Self::NoDestination => write!(f, "no destination for session"),
            Self::Malformed => write!(f, "malformed garlic message"),
        }
    }
}

/// Tunnel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelError {
    /// Build record addressed to us was not found in the message.
    RecordNotFound,

    /// Build response failed layer verification.
    InvalidBuildReply,

    /// One or more hops rejected the tunnel.
    TunnelRejected,

    /// Reassembled message would exceed the maximum I2NP message size.
    MessageTooLarge,

    /// Router-delivery fragment arrived through an inbound tunnel.
    ForwardingDisabled,

    /// Local router has no tunnel that could carry the message.
    NoTunnelAvailable,
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordNotFound => write!(f, "no build record addressed to us"),
            Self::InvalidBuildReply => write!(f, "build reply failed verification"),
            Self::TunnelRejected => write!(f, "tunnel rejected by participant"),
            Self::MessageTooLarge => write!(f, "message exceeds maximum i2np size"),
            Self::ForwardingDisabled => write!(f, "router delivery on inbound tunnel"),
            Self::NoTunnelAvailable => write!(f, "no tunnel available"),
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Input failed to parse or violated a length bound.
    InvalidData,

    /// Message or tag has expired.
    Expired,

    /// Encryption/decryption error.
    Crypto(CryptoError),

    /// Garlic session error.
    Session(SessionError),

    /// Tunnel error.
    Tunnel(TunnelError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData => write!(f, "invalid data"),
            Self::Expired => write!(f, "message expired"),
            Self::Crypto(error) => write!(f, "crypto error: {error}"),
            Self::Session(error) => write!(f, "session error: {error}"),
            Self::Tunnel(error) => write!(f, "tunnel error: {error}"),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(value: CryptoError) -> Self {
        Error::Crypto(value)
    }
}

impl From<SessionError> for Error {
    fn from(value: SessionError) -> Self {
        Error::Session(value)
    }
}

impl From<TunnelError> for Error {
    fn from(value: TunnelError) -> Self {
        Error::Tunnel(value)
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::Crypto(CryptoError::InvalidSignature)
    }
}
