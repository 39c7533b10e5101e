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

//! Tunnel pipeline: hop chains, build record onion, transit admission and
//! endpoint reassembly.

use core::time::Duration;

pub mod build;
pub mod endpoint;
pub mod hop;
pub mod pool;
pub mod transit;

pub use endpoint::TunnelEndpoint;
pub use hop::{TunnelConfig, TunnelHopConfig};
pub use transit::TransitTunnelManager;

/// Logging target for the file.
const LOG_TARGET: &str = "legate::tunnel";

/// Tunnel expiration, 10 minutes.
pub const TUNNEL_EXPIRATION: Duration = Duration::from_secs(10 * 60);
