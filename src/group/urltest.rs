use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    proxy_names, GroupBase, GroupBaseOption, GroupDisplay, GroupStatus, GroupType, HintWatcher,
    ProxyGroup,
};
use crate::adapter::{compatible, BoxedConn, BoxedPacketConn, ProxyHandle};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result};
use crate::models::Metadata;
use crate::provider::ProviderHandle;
use crate::util::Single;

/// Recomputations requested within this window share the previous result
const FAST_COALESCE_WINDOW: Duration = Duration::from_secs(10);

/// Choose the fast node among `proxies`.
///
/// The candidate is the alive proxy with the lowest last delay, or the first
/// proxy when none is alive. `current` is kept unless it left the snapshot,
/// died, or the candidate beats it by more than `tolerance` milliseconds.
pub fn pick_fast(
    proxies: &[ProxyHandle],
    current: Option<&ProxyHandle>,
    url: &str,
    tolerance: u16,
) -> ProxyHandle {
    let Some(first) = proxies.first() else {
        return current.cloned().unwrap_or_else(compatible);
    };

    let candidate = proxies
        .iter()
        .filter(|p| p.alive_for_url(url))
        .min_by_key(|p| p.last_delay_for_url(url))
        .unwrap_or(first);

    if let Some(current) = current {
        let present = proxies.iter().any(|p| p.name() == current.name());
        if present && current.alive_for_url(url) {
            let current_delay = u32::from(current.last_delay_for_url(url));
            let candidate_delay = u32::from(candidate.last_delay_for_url(url));
            if current_delay <= candidate_delay + u32::from(tolerance) {
                return current.clone();
            }
        }
    }

    candidate.clone()
}

/// Group that follows the proxy with the lowest measured delay
pub struct UrlTest {
    inner: Arc<UrlTestInner>,
}

struct UrlTestInner {
    base: GroupBase,
    display: GroupDisplay,
    test_url: String,
    expected_raw: String,
    tolerance: u16,
    selected: Mutex<String>,
    fast: RwLock<Option<ProxyHandle>>,
    single: Single<ProxyHandle>,
    watcher: HintWatcher,
}

impl UrlTest {
    pub fn new(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Result<Self> {
        let base = GroupBase::new(GroupBaseOption::from_config(config, providers))?;

        Ok(Self {
            inner: Arc::new(UrlTestInner {
                base,
                display: GroupDisplay::from_config(config),
                test_url: config.test_url.clone(),
                expected_raw: config.expected_status.clone(),
                tolerance: config.tolerance,
                selected: Mutex::new(String::new()),
                fast: RwLock::new(None),
                single: Single::new(FAST_COALESCE_WINDOW),
                watcher: HintWatcher::new(),
            }),
        })
    }

    /// Manual pin, empty when the fastest proxy is followed
    pub fn selected(&self) -> String {
        self.inner.selected.lock().clone()
    }

    pub fn tolerance(&self) -> u16 {
        self.inner.tolerance
    }

    pub async fn fast(&self) -> ProxyHandle {
        let cached = self.inner.fast.read().clone();
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

impl UrlTestInner {
    async fn refresh(&self) -> ProxyHandle {
        let proxies = self.base.get_proxies().await;

        let selected = self.selected.lock().clone();
        if !selected.is_empty() {
            let pinned = proxies
                .iter()
                .find(|p| p.name() == selected && p.alive_for_url(&self.test_url));
            if let Some(proxy) = pinned {
                *self.fast.write() = Some(proxy.clone());
                return proxy.clone();
            }
        }

        let (fast, _) = self
            .single
            .run(|| async {
                let current = self.fast.read().clone();
                let fast = pick_fast(&proxies, current.as_ref(), &self.test_url, self.tolerance);
                if current.as_ref().map(|p| p.name()) != Some(fast.name()) {
                    debug!(
                        group = %self.base.name(),
                        from = current.as_ref().map(|p| p.name()).unwrap_or_default(),
                        to = fast.name(),
                        delay = fast.last_delay_for_url(&self.test_url),
                        "Fast node changed"
                    );
                }
                *self.fast.write() = Some(fast.clone());
                fast
            })
            .await;
        fast
    }
}

impl Drop for UrlTestInner {
    fn drop(&mut self) {
        self.watcher.stop();
        self.base.close();
    }
}

#[async_trait]
impl ProxyGroup for UrlTest {
    fn base(&self) -> &GroupBase {
        &self.inner.base
    }

    fn group_type(&self) -> GroupType {
        GroupType::UrlTest
    }

    async fn unwrap(&self, _metadata: &Metadata) -> ProxyHandle {
        self.fast().await
    }

    async fn dial(&self, metadata: &Metadata) -> Result<BoxedConn> {
        let proxy = self.fast().await;
        self.inner.base.dial_tracked(&proxy, metadata).await
    }

    async fn listen_packet(&self, metadata: &Metadata) -> Result<BoxedPacketConn> {
        let proxy = self.fast().await;
        self.inner.base.listen_packet(&proxy, metadata).await
    }

    async fn support_udp(&self) -> bool {
        if self.inner.display.disable_udp {
            return false;
        }
        self.fast().await.support_udp()
    }

    async fn status(&self) -> GroupStatus {
        let now = self.fast().await.name().to_string();
        let all = proxy_names(&self.inner.base.get_proxies().await);
        let selected = self.selected();
        GroupStatus {
            group_type: GroupType::UrlTest,
            now: Some(now),
            fixed: (!selected.is_empty()).then_some(selected),
            all,
            test_url: Some(self.inner.test_url.clone()),
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

        *self.inner.fast.write() = Some(proxy);
        *self.inner.selected.lock() = name.to_string();
        self.inner.single.reset();
        self.start_watcher();
        self.inner.base.emit_hint();
        Ok(())
    }

    fn force_set(&self, name: &str) {
        *self.inner.selected.lock() = name.to_string();
        *self.inner.fast.write() = None;
        self.inner.single.reset();
    }

    fn close(&self) {
        self.inner.watcher.stop();
        self.inner.base.close();
    }
}
