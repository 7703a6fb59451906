//! Upstream adapter contract
//!
//! Groups never speak a wire protocol themselves. Every upstream (SOCKS5,
//! Shadowsocks, direct, ...) is consumed through the [`Proxy`] trait, and the
//! liveness/latency facts a health check produces live on the adapter.

mod callback;
mod compatible;
mod state;

pub use callback::FirstWriteCallbackConn;
pub use compatible::{compatible, Compatible, COMPATIBLE_NAME};
pub use state::{DelayHistory, ProxyState, MAX_DELAY};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::models::{AdapterType, ExpectedStatus, Metadata};

/// Extra time granted to an adapter beyond its probe timeout before the
/// probe is abandoned by the caller
pub(crate) const PROBE_GRACE: Duration = Duration::from_secs(1);

/// Stream returned by a successful dial
pub trait ProxyConn: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ProxyConn for T {}

pub type BoxedConn = Box<dyn ProxyConn>;

/// Datagram socket returned by a successful `listen_packet`
#[async_trait]
pub trait PacketConn: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

pub type BoxedPacketConn = Box<dyn PacketConn>;

/// Capability every upstream proxy adapter provides
#[async_trait]
pub trait Proxy: Send + Sync {
    fn name(&self) -> &str;

    fn adapter_type(&self) -> AdapterType;

    fn support_udp(&self) -> bool;

    /// Open a stream to the destination through this upstream
    async fn dial(&self, metadata: &Metadata) -> io::Result<BoxedConn>;

    /// Open a datagram association through this upstream
    async fn listen_packet(&self, metadata: &Metadata) -> io::Result<BoxedPacketConn>;

    /// Whether the last probe against `url` succeeded
    fn alive_for_url(&self, url: &str) -> bool;

    /// Last measured delay against `url` in milliseconds, [`MAX_DELAY`] if unknown
    fn last_delay_for_url(&self, url: &str) -> u16;

    /// Probe `url` through this upstream, record the outcome and return the delay in ms.
    ///
    /// Implementations must give up after `timeout` and record the probe as failed.
    async fn url_test(&self, url: &str, expected: &ExpectedStatus, timeout: Duration)
        -> Result<u16>;
}

/// Shared reference to an upstream; owned by providers, borrowed by groups
pub type ProxyHandle = Arc<dyn Proxy>;
