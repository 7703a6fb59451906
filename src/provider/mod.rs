//! Proxy providers
//!
//! A provider owns an ordered, versioned list of upstream proxies and the
//! health checker that probes them. Groups consume providers through
//! [`ProxyProvider`] and subscribe to their change notifications.

pub mod healthcheck;
pub mod static_provider;

pub use healthcheck::{HealthCheckOption, HealthChecker};
pub use static_provider::StaticProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::adapter::ProxyHandle;
use crate::models::ExpectedStatus;

/// How a provider's proxy list came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleType {
    /// Fetched or loaded list; subject to group filters
    #[default]
    Normal,
    /// Proxies listed inline in a group; never filtered
    Compatible,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Normal => "Normal",
            VehicleType::Compatible => "Compatible",
        }
    }
}

/// Versioned source of proxies consumed by groups
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Current proxies in provider order
    fn proxies(&self) -> Vec<ProxyHandle>;

    /// Incremented whenever the proxy list changes
    fn version(&self) -> u32;

    fn vehicle_type(&self) -> VehicleType;

    /// Mark the provider as recently used
    fn touch(&self);

    /// Subscribe to change notifications; a full channel coalesces signals
    fn add_change_listener(&self, tx: mpsc::Sender<()>);

    /// Probe every proxy against every registered URL
    async fn health_check(&self);

    /// Add a URL that groups sharing this provider want probed
    fn register_health_check_task(&self, url: &str, expected: ExpectedStatus, interval: Duration);
}

pub type ProviderHandle = Arc<dyn ProxyProvider>;

/// Fan-out of change signals to subscribed groups
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    listeners: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, tx: mpsc::Sender<()>) {
        self.listeners.lock().push(tx);
    }

    /// Signal every listener; closed listeners are dropped
    pub fn notify(&self) {
        self.listeners.lock().retain(|tx| match tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
