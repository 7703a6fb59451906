use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    proxy_names, GroupBase, GroupBaseOption, GroupDisplay, GroupStatus, GroupType, HintWatcher,
    ProxyGroup,
};
use crate::adapter::{compatible, BoxedConn, BoxedPacketConn, ProxyHandle, COMPATIBLE_NAME};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result};
use crate::models::Metadata;
use crate::provider::ProviderHandle;

/// Group whose proxy is chosen by hand
pub struct Selector {
    inner: Arc<SelectorInner>,
}

struct SelectorInner {
    base: GroupBase,
    display: GroupDisplay,
    selected: Mutex<String>,
    cached: RwLock<Option<ProxyHandle>>,
    watcher: HintWatcher,
}

impl Selector {
    pub fn new(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Result<Self> {
        let base = GroupBase::new(GroupBaseOption::from_config(config, providers))?;
        Ok(Self::with_base(base, GroupDisplay::from_config(config)))
    }

    pub fn with_base(base: GroupBase, display: GroupDisplay) -> Self {
        Self {
            inner: Arc::new(SelectorInner {
                base,
                display,
                selected: Mutex::new(COMPATIBLE_NAME.to_string()),
                cached: RwLock::new(None),
                watcher: HintWatcher::new(),
            }),
        }
    }

    /// Currently pinned name
    pub fn selected(&self) -> String {
        self.inner.selected.lock().clone()
    }

    /// Proxy for the current pin
    pub async fn resolve(&self) -> ProxyHandle {
        let cached = self.inner.cached.read().clone();
        if let Some(proxy) = cached {
            return proxy;
        }
        self.start_watcher();
        self.inner.rescan().await
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
                        inner.rescan().await;
                    }
                }
            },
        );
    }
}

impl SelectorInner {
    /// Find the pinned proxy; adopt the first proxy when the pin is gone
    async fn rescan(&self) -> ProxyHandle {
        let proxies = self.base.get_proxies().await;
        let selected = self.selected.lock().clone();

        let proxy = match proxies.iter().find(|p| p.name() == selected) {
            Some(proxy) => proxy.clone(),
            None => {
                let proxy = proxies.first().cloned().unwrap_or_else(compatible);
                debug!(group = %self.base.name(), from = %selected, to = proxy.name(), "Pinned proxy not found");
                *self.selected.lock() = proxy.name().to_string();
                proxy
            }
        };

        *self.cached.write() = Some(proxy.clone());
        proxy
    }
}

impl Drop for SelectorInner {
    fn drop(&mut self) {
        self.watcher.stop();
        self.base.close();
    }
}

#[async_trait]
impl ProxyGroup for Selector {
    fn base(&self) -> &GroupBase {
        &self.inner.base
    }

    fn group_type(&self) -> GroupType {
        GroupType::Selector
    }

    async fn unwrap(&self, _metadata: &Metadata) -> ProxyHandle {
        self.resolve().await
    }

    async fn dial(&self, metadata: &Metadata) -> Result<BoxedConn> {
        let proxy = self.resolve().await;
        self.inner.base.dial_untracked(&proxy, metadata).await
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
        GroupStatus {
            group_type: GroupType::Selector,
            now: Some(now),
            fixed: None,
            all,
            test_url: None,
            expected_status: None,
            hidden: self.inner.display.hidden,
            icon: self.inner.display.icon.clone(),
        }
    }

    async fn set(&self, name: &str) -> Result<()> {
        let proxies = self.inner.base.get_proxies().await;
        let Some(proxy) = proxies.iter().find(|p| p.name() == name) else {
            return Err(GroupError::NotFound(name.to_string()));
        };

        *self.inner.selected.lock() = proxy.name().to_string();
        *self.inner.cached.write() = None;
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
