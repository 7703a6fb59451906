//! Scriptable in-memory proxies for unit tests

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;

use crate::adapter::{BoxedConn, BoxedPacketConn, Proxy, ProxyHandle, ProxyState};
use crate::error::{GroupError, Result};
use crate::models::{AdapterType, ExpectedStatus, Metadata};
use crate::provider::{HealthCheckOption, StaticProvider};

pub const TEST_URL: &str = "https://www.gstatic.com/generate_204";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialBehavior {
    Ok,
    Refused,
    Fail,
}

pub struct MockProxy {
    name: String,
    adapter_type: AdapterType,
    state: ProxyState,
    dial: Mutex<DialBehavior>,
    probe: Mutex<Option<u16>>,
    probe_sleep: Mutex<Duration>,
    peers: Mutex<Vec<DuplexStream>>,
    url_tests: AtomicUsize,
    dials: AtomicUsize,
}

impl MockProxy {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_type(name, AdapterType::Socks5)
    }

    pub fn with_type(name: &str, adapter_type: AdapterType) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            adapter_type,
            state: ProxyState::new(),
            dial: Mutex::new(DialBehavior::Ok),
            probe: Mutex::new(Some(100)),
            probe_sleep: Mutex::new(Duration::ZERO),
            peers: Mutex::new(Vec::new()),
            url_tests: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
        })
    }

    /// Record a probe result directly, as if a health check had run
    pub fn set_delay(&self, url: &str, delay: Option<u16>) {
        self.state.record(url, delay);
    }

    pub fn set_alive(&self, url: &str, alive: bool) {
        self.state.record(url, alive.then_some(100));
    }

    pub fn set_dial(&self, behavior: DialBehavior) {
        *self.dial.lock() = behavior;
    }

    /// Outcome of future probes; `None` makes them fail
    pub fn set_probe(&self, delay: Option<u16>) {
        *self.probe.lock() = delay;
    }

    pub fn set_probe_sleep(&self, sleep: Duration) {
        *self.probe_sleep.lock() = sleep;
    }

    pub fn url_tests(&self) -> usize {
        self.url_tests.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Proxy for MockProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> AdapterType {
        self.adapter_type
    }

    fn support_udp(&self) -> bool {
        true
    }

    async fn dial(&self, _metadata: &Metadata) -> io::Result<BoxedConn> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.dial.lock();
        match behavior {
            DialBehavior::Ok => {
                let (client, server) = tokio::io::duplex(1024);
                self.peers.lock().push(server);
                Ok(Box::new(client))
            }
            DialBehavior::Refused => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
            DialBehavior::Fail => Err(io::Error::other("handshake failed")),
        }
    }

    async fn listen_packet(&self, _metadata: &Metadata) -> io::Result<BoxedPacketConn> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mock proxy has no packet transport",
        ))
    }

    fn alive_for_url(&self, url: &str) -> bool {
        self.state.alive_for_url(url)
    }

    fn last_delay_for_url(&self, url: &str) -> u16 {
        self.state.last_delay_for_url(url)
    }

    async fn url_test(
        &self,
        url: &str,
        _expected: &ExpectedStatus,
        timeout: Duration,
    ) -> Result<u16> {
        self.url_tests.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock();
        let sleep = *self.probe_sleep.lock();

        let outcome = tokio::time::timeout(timeout, async move {
            if !sleep.is_zero() {
                tokio::time::sleep(sleep).await;
            }
            probe
        })
        .await;

        match outcome {
            Ok(Some(delay)) => {
                self.state.record(url, Some(delay));
                Ok(delay)
            }
            Ok(None) => {
                self.state.record(url, None);
                Err(GroupError::ProbeFailed(format!("{} unreachable", self.name)))
            }
            Err(_) => {
                self.state.record(url, None);
                Err(GroupError::Timeout)
            }
        }
    }
}

pub fn mocks(names: &[&str]) -> Vec<Arc<MockProxy>> {
    names.iter().map(|n| MockProxy::new(n)).collect()
}

pub fn handles(mocks: &[Arc<MockProxy>]) -> Vec<ProxyHandle> {
    mocks.iter().map(|m| m.clone() as ProxyHandle).collect()
}

pub fn names(proxies: &[ProxyHandle]) -> Vec<String> {
    proxies.iter().map(|p| p.name().to_string()).collect()
}

/// Provider over `mocks` with periodic checking disabled and lazy passes off
pub fn static_provider(name: &str, mocks: &[Arc<MockProxy>]) -> Arc<StaticProvider> {
    StaticProvider::new(
        name,
        handles(mocks),
        HealthCheckOption::new(TEST_URL, Duration::ZERO).with_lazy(false),
    )
}
