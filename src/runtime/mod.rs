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

//! Runtime abstraction.
//!
//! The messaging core never talks to the host environment directly: wall
//! clock, monotonic time, the cryptographically strong RNG and gzip all go
//! through [`Runtime`] so the core stays testable and host-agnostic.

use rand_core::{CryptoRng, RngCore};

use alloc::vec::Vec;
use core::{fmt, time::Duration};

#[cfg(test)]
pub mod mock;

/// Monotonic point in time.
pub trait Instant: fmt::Debug + Copy + Clone + Send + Unpin + Sync {
    /// Return how much time has passed since the `Instant` was created.
    fn elapsed(&self) -> Duration;
}

pub trait Runtime: Clone + Unpin + Send + 'static {
    type Instant: Instant;

    /// Return duration since Unix epoch.
    fn time_since_epoch() -> Duration;

    /// Get current time.
    fn now() -> Self::Instant;

    /// Return opaque type for generating random bytes.
    fn rng() -> impl RngCore + CryptoRng;

    /// GZIP-compress `bytes` and return the compressed byte vector.
    fn gzip_compress(bytes: impl AsRef<[u8]>) -> Option<Vec<u8>>;

    /// GZIP-decompress `bytes` and return the decompressed byte vector.
    fn gzip_decompress(bytes: impl AsRef<[u8]>) -> Option<Vec<u8>>;
}
