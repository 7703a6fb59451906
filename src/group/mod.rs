//! Proxy groups
//!
//! A group resolves every new connection to one concrete upstream proxy from
//! the proxies its providers supply:
//!
//! - [`Selector`]: manual pin
//! - [`Fallback`]: first alive proxy, sticky once chosen
//! - [`LoadBalance`]: round-robin, consistent hashing or sticky sessions
//! - [`UrlTest`]: lowest measured delay with hysteresis

pub mod base;
pub mod fallback;
pub mod filter;
pub mod loadbalance;
pub mod selector;
pub mod urltest;
pub mod watcher;

pub use base::{GroupBase, GroupBaseOption};
pub use fallback::Fallback;
pub use filter::ProxyFilter;
pub use loadbalance::{BalanceStrategy, LoadBalance};
pub use selector::Selector;
pub use urltest::UrlTest;
pub use watcher::{AliveCache, HintWatcher};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapter::{BoxedConn, BoxedPacketConn, ProxyHandle};
use crate::config::{GroupConfig, GroupKind};
use crate::error::{GroupError, Result};
use crate::models::{ExpectedStatus, Metadata};
use crate::provider::ProviderHandle;

/// Kind of group as reported in status output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Selector,
    Fallback,
    LoadBalance,
    UrlTest,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::Selector => "Selector",
            GroupType::Fallback => "Fallback",
            GroupType::LoadBalance => "LoadBalance",
            GroupType::UrlTest => "URLTest",
        }
    }
}

impl Serialize for GroupType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Snapshot of a group for the control plane
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    #[serde(rename = "type")]
    pub group_type: GroupType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub now: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
    pub all: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<String>,
    pub hidden: bool,
    pub icon: String,
}

/// Presentation options carried by every group
#[derive(Debug, Clone, Default)]
pub struct GroupDisplay {
    pub disable_udp: bool,
    pub hidden: bool,
    pub icon: String,
}

impl GroupDisplay {
    pub fn from_config(config: &GroupConfig) -> Self {
        Self {
            disable_udp: config.disable_udp,
            hidden: config.hidden,
            icon: config.icon.clone(),
        }
    }
}

/// Common interface of every group type
#[async_trait]
pub trait ProxyGroup: Send + Sync {
    fn base(&self) -> &GroupBase;

    fn group_type(&self) -> GroupType;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// The proxy the next connection for `metadata` would use
    async fn unwrap(&self, metadata: &Metadata) -> ProxyHandle;

    async fn dial(&self, metadata: &Metadata) -> Result<BoxedConn>;

    async fn listen_packet(&self, metadata: &Metadata) -> Result<BoxedPacketConn>;

    async fn support_udp(&self) -> bool;

    async fn status(&self) -> GroupStatus;

    /// Pin a proxy by name
    async fn set(&self, name: &str) -> Result<()> {
        Err(GroupError::Unsupported(format!("set {} on {}", name, self.name())))
    }

    /// Pin a proxy by name without checking that it exists
    fn force_set(&self, _name: &str) {}

    async fn url_test(
        &self,
        url: &str,
        expected: &ExpectedStatus,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, u16>> {
        self.base().url_test(url, expected, cancel).await
    }

    fn touch(&self) {
        self.base().touch();
    }

    fn close(&self);
}

pub type GroupHandle = Arc<dyn ProxyGroup>;

/// Names of `proxies` in order
pub(crate) fn proxy_names(proxies: &[ProxyHandle]) -> Vec<String> {
    proxies.iter().map(|p| p.name().to_string()).collect()
}

/// Validate `config` and build the group over `providers`.
///
/// Groups that probe liveness register their test URL with every provider so
/// the providers' health checks cover it.
pub fn build_group(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Result<GroupHandle> {
    config.validate()?;
    let kind = config.kind()?;
    let expected = config.expected_status()?;

    let group: GroupHandle = match kind {
        GroupKind::Select => Arc::new(Selector::new(config, providers.clone())?),
        GroupKind::Fallback => Arc::new(Fallback::new(config, providers.clone())?),
        GroupKind::LoadBalance => Arc::new(LoadBalance::new(config, providers.clone())?),
        GroupKind::UrlTest => Arc::new(UrlTest::new(config, providers.clone())?),
    };

    if kind != GroupKind::Select {
        for provider in &providers {
            provider.register_health_check_task(
                &config.test_url,
                expected.clone(),
                config.interval(),
            );
        }
    }

    info!(
        group = %config.name,
        kind = group.group_type().as_str(),
        providers = providers.len(),
        "Proxy group created"
    );
    Ok(group)
}
