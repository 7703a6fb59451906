use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    proxy_names, AliveCache, GroupBase, GroupBaseOption, GroupDisplay, GroupStatus, GroupType,
    HintWatcher, ProxyGroup,
};
use crate::adapter::{compatible, BoxedConn, BoxedPacketConn, ProxyHandle, PROBE_GRACE};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result};
use crate::models::{ExpectedStatus, Metadata};
use crate::provider::ProviderHandle;

/// Bound on the probe run when pinning a proxy that is not alive
const SET_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Group that uses the first alive proxy and sticks with it while it stays alive
pub struct Fallback {
    inner: Arc<FallbackInner>,
}

struct FallbackInner {
    base: GroupBase,
    display: GroupDisplay,
    expected: ExpectedStatus,
    expected_raw: String,
    alive: AliveCache,
    selected: Mutex<String>,
    cached: RwLock<Option<ProxyHandle>>,
    watcher: HintWatcher,
}

impl Fallback {
    pub fn new(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Result<Self> {
        let expected = config.expected_status()?;
        let base = GroupBase::new(GroupBaseOption::from_config(config, providers))?;

        Ok(Self {
            inner: Arc::new(FallbackInner {
                base,
                display: GroupDisplay::from_config(config),
                expected,
                expected_raw: config.expected_status.clone(),
                alive: AliveCache::new(config.test_url.clone()),
                selected: Mutex::new(String::new()),
                cached: RwLock::new(None),
                watcher: HintWatcher::new(),
            }),
        })
    }

    /// Remembered proxy name, empty until one is chosen
    pub fn selected(&self) -> String {
        self.inner.selected.lock().clone()
    }

    pub async fn resolve(&self) -> ProxyHandle {
        let cached = self.inner.cached.read().clone();
        if let Some(proxy) = cached {
            return proxy;
        }
        self.start_watcher();
        self.inner.refresh().await
    }

    fn start_watcher(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.watcher.start_with(
            self.inner.base.name(),
            self.inner.base.hints(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh().await;
                    }
                }
            },
        );
    }
}

impl FallbackInner {
    async fn refresh(&self) -> ProxyHandle {
        let all = self.base.get_proxies().await;
        let alive = self.alive.refresh(&all);

        let proxy = {
            let mut selected = self.selected.lock();
            match alive.iter().find(|p| p.name() == *selected) {
                Some(proxy) => proxy.clone(),
                None => match alive.first() {
                    Some(proxy) => {
                        debug!(group = %self.base.name(), from = %selected, to = proxy.name(), "Falling back");
                        *selected = proxy.name().to_string();
                        proxy.clone()
                    }
                    // Nothing is alive; leave the remembered name for when it recovers
                    None => all.first().cloned().unwrap_or_else(compatible),
                },
            }
        };

        *self.cached.write() = Some(proxy.clone());
        proxy
    }
}

impl Drop for FallbackInner {
    fn drop(&mut self) {
        self.watcher.stop();
        self.base.close();
    }
}

#[async_trait]
impl ProxyGroup for Fallback {
    fn base(&self) -> &GroupBase {
        &self.inner.base
    }

    fn group_type(&self) -> GroupType {
        GroupType::Fallback
    }

    async fn unwrap(&self, _metadata: &Metadata) -> ProxyHandle {
        self.resolve().await
    }

    async fn dial(&self, metadata: &Metadata) -> Result<BoxedConn> {
        let proxy = self.resolve().await;
        self.inner.base.dial_tracked(&proxy, metadata).await
    }

    async fn listen_packet(&self, metadata: &Metadata) -> Result<BoxedPacketConn> {
        let proxy = self.resolve().await;
        self.inner.base.listen_packet(&proxy, metadata).await
    }

    async fn support_udp(&self) -> bool {
        if self.inner.display.disable_udp {
            return false;
        }
        self.resolve().await.support_udp()
    }

    async fn status(&self) -> GroupStatus {
        let now = self.resolve().await.name().to_string();
        let all = proxy_names(&self.inner.base.get_proxies().await);
        let selected = self.selected();
        GroupStatus {
            group_type: GroupType::Fallback,
            now: Some(now),
            fixed: (!selected.is_empty()).then_some(selected),
            all,
            test_url: Some(self.inner.alive.url().to_string()),
            expected_status: Some(self.inner.expected_raw.clone()),
            hidden: self.inner.display.hidden,
            icon: self.inner.display.icon.clone(),
        }
    }

    async fn set(&self, name: &str) -> Result<()> {
        let proxies = self.inner.base.get_proxies().await;
        let Some(proxy) = proxies.iter().find(|p| p.name() == name).cloned() else {
            return Err(GroupError::NotFound(name.to_string()));
        };

        *self.inner.selected.lock() = proxy.name().to_string();
        *self.inner.cached.write() = Some(proxy.clone());
        self.start_watcher();

        let url = self.inner.alive.url();
        if !proxy.alive_for_url(url) {
            // Refresh its liveness before the watcher looks at it again
            let probe = proxy.url_test(url, &self.inner.expected, SET_PROBE_TIMEOUT);
            match tokio::time::timeout(SET_PROBE_TIMEOUT + PROBE_GRACE, probe).await {
                Ok(Ok(delay)) => debug!(group = %self.name(), proxy = name, delay, "Pinned proxy is alive"),
                Ok(Err(e)) => debug!(group = %self.name(), proxy = name, "Pinned proxy is unhealthy: {}", e),
                Err(_) => debug!(group = %self.name(), proxy = name, "Pinned proxy probe abandoned"),
            }
        }

        self.inner.base.emit_hint();
        Ok(())
    }

    fn force_set(&self, name: &str) {
        *self.inner.selected.lock() = name.to_string();
        *self.inner.cached.write() = None;
    }

    fn close(&self) {
        self.inner.watcher.stop();
        self.inner.base.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mocks, static_provider, DialBehavior, MockProxy, TEST_URL};

    fn fallback(names: &[&str]) -> (Fallback, Vec<Arc<MockProxy>>) {
        let mocks = mocks(names);
        let provider: ProviderHandle = static_provider("sub", &mocks);
        let mut config = GroupConfig::new("fb", "fallback");
        config.test_url = TEST_URL.to_string();
        (Fallback::new(&config, vec![provider]).unwrap(), mocks)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_first_alive_wins() {
        let (fb, mocks) = fallback(&["A", "B", "C"]);
        mocks[0].set_alive(TEST_URL, false);

        assert_eq!(fb.resolve().await.name(), "B");
        assert_eq!(fb.selected(), "B");
    }

    #[tokio::test]
    async fn test_sticky_while_alive() {
        let (fb, _mocks) = fallback(&["A", "B", "C"]);
        assert_eq!(fb.resolve().await.name(), "A");

        fb.set("B").await.unwrap();
        settle().await;

        // A is alive and earlier, but B stays
        assert_eq!(fb.resolve().await.name(), "B");
        fb.base().emit_hint();
        settle().await;
        assert_eq!(fb.resolve().await.name(), "B");
    }

    #[tokio::test]
    async fn test_fails_over_when_selected_dies() {
        let (fb, mocks) = fallback(&["A", "B", "C"]);
        fb.set("B").await.unwrap();
        assert_eq!(fb.resolve().await.name(), "B");

        mocks[1].set_alive(TEST_URL, false);
        fb.base().emit_hint();
        settle().await;

        assert_eq!(fb.resolve().await.name(), "A");
        assert_eq!(fb.selected(), "A");
    }

    #[tokio::test]
    async fn test_none_alive_keeps_selection() {
        let (fb, mocks) = fallback(&["A", "B"]);
        fb.set("B").await.unwrap();
        for mock in &mocks {
            mock.set_alive(TEST_URL, false);
        }
        fb.base().emit_hint();
        settle().await;

        assert_eq!(fb.resolve().await.name(), "A");
        assert_eq!(fb.selected(), "B");
    }

    #[tokio::test]
    async fn test_set_probes_dead_proxy() {
        let (fb, mocks) = fallback(&["A", "B"]);
        mocks[1].set_alive(TEST_URL, false);
        mocks[1].set_probe(Some(80));

        fb.set("B").await.unwrap();

        assert_eq!(mocks[1].url_tests(), 1);
        assert_eq!(fb.selected(), "B");
        settle().await;
        assert_eq!(fb.resolve().await.name(), "B");
    }

    #[tokio::test]
    async fn test_set_unknown() {
        let (fb, _mocks) = fallback(&["A", "B"]);
        fb.resolve().await;

        assert!(matches!(fb.set("ghost").await, Err(GroupError::NotFound(_))));
        assert_eq!(fb.selected(), "A");
    }

    #[tokio::test]
    async fn test_dial_failure_feeds_tracker() {
        let (fb, mocks) = fallback(&["A"]);
        mocks[0].set_dial(DialBehavior::Fail);

        assert!(fb.dial(&Metadata::tcp("example.com", 443)).await.is_err());
        assert_eq!(fb.base().failed_times(), 1);
    }
}
