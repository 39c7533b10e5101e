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

/// Transit tunnel configuration.
#[derive(Debug, Clone)]
pub struct TransitConfig {
    /// Accept transit tunnels at all.
    pub accept_transit_tunnels: bool,

    /// Soft cap for concurrently active transit tunnels.
    pub max_tunnels: usize,

    /// Transit bandwidth budget, bytes per second.
    ///
    /// `None` means unlimited.
    pub max_bandwidth: Option<usize>,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            accept_transit_tunnels: true,
            max_tunnels: 2500,
            max_bandwidth: None,
        }
    }
}
