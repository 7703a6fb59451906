//! Load balancing group and its strategies

pub mod consistent_hash;
pub mod jump_hash;
pub mod key;
pub mod round_robin;
pub mod sticky;

pub use consistent_hash::ConsistentHashing;
pub use jump_hash::jump_hash;
pub use round_robin::RoundRobin;
pub use sticky::StickySessions;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{
    proxy_names, AliveCache, GroupBase, GroupBaseOption, GroupDisplay, GroupStatus, GroupType,
    HintWatcher, ProxyGroup,
};
use crate::adapter::{BoxedConn, BoxedPacketConn, ProxyHandle};
use crate::config::GroupConfig;
use crate::error::{GroupError, Result};
use crate::models::Metadata;
use crate::provider::ProviderHandle;

/// Strategy types for load balancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceStrategy {
    #[default]
    ConsistentHashing,
    RoundRobin,
    StickySessions,
}

impl BalanceStrategy {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "consistent-hashing" | "consistent_hashing" | "consistenthashing" => {
                Ok(Self::ConsistentHashing)
            }
            "round-robin" | "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            "sticky-sessions" | "sticky_sessions" | "stickysessions" => Ok(Self::StickySessions),
            _ => Err(GroupError::UnsupportedStrategy(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsistentHashing => "consistent-hashing",
            Self::RoundRobin => "round-robin",
            Self::StickySessions => "sticky-sessions",
        }
    }
}

/// Inputs to a single pick
pub struct PickContext<'a> {
    /// Every proxy of the group, in order
    pub all: &'a [ProxyHandle],
    /// Proxies alive for the test URL, or all of them when none are
    pub alive: &'a [ProxyHandle],
    pub metadata: &'a Metadata,
    pub test_url: &'a str,
}

/// Trait for load balancing strategies
///
/// `ctx.all` is never empty.
pub trait Balancer: Send + Sync {
    fn pick(&self, ctx: &PickContext<'_>) -> ProxyHandle;

    fn strategy(&self) -> BalanceStrategy;
}

pub fn create_balancer(strategy: BalanceStrategy) -> Box<dyn Balancer> {
    match strategy {
        BalanceStrategy::ConsistentHashing => Box::new(ConsistentHashing::new()),
        BalanceStrategy::RoundRobin => Box::new(RoundRobin::new()),
        BalanceStrategy::StickySessions => Box::new(StickySessions::new()),
    }
}

/// Spreads connections over the group's proxies
pub struct LoadBalance {
    inner: Arc<LoadBalanceInner>,
}

struct LoadBalanceInner {
    base: GroupBase,
    display: GroupDisplay,
    balancer: Box<dyn Balancer>,
    expected_status: String,
    alive: AliveCache,
    watcher: HintWatcher,
}

impl LoadBalance {
    pub fn new(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Result<Self> {
        let strategy = match config.strategy.as_deref() {
            None | Some("") => BalanceStrategy::default(),
            Some(s) => BalanceStrategy::from_str(s)?,
        };
        let base = GroupBase::new(GroupBaseOption::from_config(config, providers))?;

        Ok(Self {
            inner: Arc::new(LoadBalanceInner {
                base,
                display: GroupDisplay::from_config(config),
                balancer: create_balancer(strategy),
                expected_status: config.expected_status.clone(),
                alive: AliveCache::new(config.test_url.clone()),
                watcher: HintWatcher::new(),
            }),
        })
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.inner.balancer.strategy()
    }

    /// Pick the proxy for `metadata`
    pub async fn pick(&self, metadata: &Metadata) -> ProxyHandle {
        let all = self.inner.base.get_proxies().await;
        self.start_watcher();
        let mut alive = self
            .inner
            .alive
            .current()
            .unwrap_or_else(|| self.inner.alive.refresh(&all));
        if alive.is_empty() {
            alive = all.clone();
        }

        let ctx = PickContext {
            all: &all,
            alive: &alive,
            metadata,
            test_url: self.inner.alive.url(),
        };
        self.inner.balancer.pick(&ctx)
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
                        let all = inner.base.get_proxies().await;
                        let alive = inner.alive.refresh(&all);
                        debug!(group = %inner.base.name(), alive = alive.len(), total = all.len(), "Alive subset refreshed");
                    }
                }
            },
        );
    }
}

impl Drop for LoadBalanceInner {
    fn drop(&mut self) {
        self.watcher.stop();
        self.base.close();
    }
}

#[async_trait]
impl ProxyGroup for LoadBalance {
    fn base(&self) -> &GroupBase {
        &self.inner.base
    }

    fn group_type(&self) -> GroupType {
        GroupType::LoadBalance
    }

    async fn unwrap(&self, metadata: &Metadata) -> ProxyHandle {
        self.pick(metadata).await
    }

    async fn dial(&self, metadata: &Metadata) -> Result<BoxedConn> {
        let proxy = self.pick(metadata).await;
        self.inner.base.dial_tracked(&proxy, metadata).await
    }

    async fn listen_packet(&self, metadata: &Metadata) -> Result<BoxedPacketConn> {
        let proxy = self.pick(metadata).await;
        self.inner.base.listen_packet(&proxy, metadata).await
    }

    async fn support_udp(&self) -> bool {
        !self.inner.display.disable_udp
    }

    async fn status(&self) -> GroupStatus {
        let all = proxy_names(&self.inner.base.get_proxies().await);
        GroupStatus {
            group_type: GroupType::LoadBalance,
            now: None,
            fixed: None,
            all,
            test_url: Some(self.inner.alive.url().to_string()),
            expected_status: Some(self.inner.expected_status.clone()),
            hidden: self.inner.display.hidden,
            icon: self.inner.display.icon.clone(),
        }
    }

    fn close(&self) {
        self.inner.watcher.stop();
        self.inner.base.close();
    }
}
