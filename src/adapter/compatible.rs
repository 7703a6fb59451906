use std::io;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{BoxedConn, BoxedPacketConn, Proxy, ProxyHandle};
use crate::error::{GroupError, Result};
use crate::models::{AdapterType, ExpectedStatus, Metadata};

/// Name of the reserved placeholder proxy
pub const COMPATIBLE_NAME: &str = "COMPATIBLE";

static COMPATIBLE: LazyLock<ProxyHandle> = LazyLock::new(|| Arc::new(Compatible));

/// Placeholder that stands in for an empty group; every operation fails.
#[derive(Debug, Default)]
pub struct Compatible;

/// Shared placeholder handle
pub fn compatible() -> ProxyHandle {
    COMPATIBLE.clone()
}

fn unreachable_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "no proxy available in group (COMPATIBLE placeholder)",
    )
}

#[async_trait]
impl Proxy for Compatible {
    fn name(&self) -> &str {
        COMPATIBLE_NAME
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Compatible
    }

    fn support_udp(&self) -> bool {
        false
    }

    async fn dial(&self, _metadata: &Metadata) -> io::Result<BoxedConn> {
        Err(unreachable_error())
    }

    async fn listen_packet(&self, _metadata: &Metadata) -> io::Result<BoxedPacketConn> {
        Err(unreachable_error())
    }

    fn alive_for_url(&self, _url: &str) -> bool {
        false
    }

    fn last_delay_for_url(&self, _url: &str) -> u16 {
        super::MAX_DELAY
    }

    async fn url_test(
        &self,
        _url: &str,
        _expected: &ExpectedStatus,
        _timeout: Duration,
    ) -> Result<u16> {
        Err(GroupError::ProbeFailed(unreachable_error().to_string()))
    }
}
