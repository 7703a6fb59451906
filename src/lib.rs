//! Outbound proxy groups
//!
//! The selection layer of a rule-based proxy gateway. A group turns every new
//! connection into a choice of one upstream proxy, drawn from the proxies its
//! providers supply.
//!
//! ## Features
//!
//! - Selector, fallback, load-balance and latency-based (url-test) groups
//! - Load balancing by round-robin, consistent hashing or sticky sessions
//! - Regex and adapter-type filtering of provider proxies
//! - Provider health checking with lazy passes and shared probe URLs
//! - Dial failure tracking that triggers early health checks

pub mod adapter;
pub mod config;
pub mod error;
pub mod group;
pub mod models;
pub mod observability;
pub mod provider;
pub mod util;

#[cfg(test)]
mod testutil;

pub use adapter::{Proxy, ProxyHandle};
pub use config::{Config, GroupConfig};
pub use error::{GroupError, Result};
pub use group::{build_group, GroupHandle, GroupStatus, GroupType, ProxyGroup};
pub use provider::{HealthCheckOption, HealthChecker, ProviderHandle, ProxyProvider, StaticProvider};
