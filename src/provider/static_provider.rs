use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChangeNotifier, HealthCheckOption, HealthChecker, ProxyProvider, VehicleType};
use crate::adapter::ProxyHandle;
use crate::models::ExpectedStatus;

/// In-memory provider holding a list of proxies.
///
/// The list can be replaced at runtime; every replacement bumps the version
/// and signals change listeners.
pub struct StaticProvider {
    name: String,
    vehicle: VehicleType,
    proxies: ArcSwap<Vec<ProxyHandle>>,
    version: AtomicU32,
    health: Arc<HealthChecker>,
    notifier: ChangeNotifier,
}

impl StaticProvider {
    pub fn new(
        name: impl Into<String>,
        proxies: Vec<ProxyHandle>,
        option: HealthCheckOption,
    ) -> Arc<Self> {
        Self::with_vehicle(name, proxies, option, VehicleType::Normal)
    }

    /// Provider for proxies listed inline in a group
    pub fn compatible(
        name: impl Into<String>,
        proxies: Vec<ProxyHandle>,
        option: HealthCheckOption,
    ) -> Arc<Self> {
        Self::with_vehicle(name, proxies, option, VehicleType::Compatible)
    }

    fn with_vehicle(
        name: impl Into<String>,
        proxies: Vec<ProxyHandle>,
        option: HealthCheckOption,
        vehicle: VehicleType,
    ) -> Arc<Self> {
        let name = name.into();
        let notifier = ChangeNotifier::new();
        let health = HealthChecker::new(name.clone(), proxies.clone(), option, notifier.clone());

        Arc::new(Self {
            name,
            vehicle,
            proxies: ArcSwap::from_pointee(proxies),
            version: AtomicU32::new(1),
            health,
            notifier,
        })
    }

    /// Start periodic health checking
    pub fn initial(&self) {
        self.health.start();
    }

    /// Replace the proxy list
    pub fn set_proxies(&self, proxies: Vec<ProxyHandle>) {
        self.health.set_proxies(proxies.clone());
        self.proxies.store(Arc::new(proxies));
        let version = self.version.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        debug!(provider = %self.name, version, "Provider proxies updated");
        self.notifier.notify();
    }

    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn close(&self) {
        self.health.close();
    }
}

#[async_trait]
impl ProxyProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxies(&self) -> Vec<ProxyHandle> {
        self.proxies.load().as_ref().clone()
    }

    fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    fn vehicle_type(&self) -> VehicleType {
        self.vehicle
    }

    fn touch(&self) {
        self.health.touch();
    }

    fn add_change_listener(&self, tx: mpsc::Sender<()>) {
        self.notifier.subscribe(tx);
    }

    async fn health_check(&self) {
        self.health.check().await;
    }

    fn register_health_check_task(&self, url: &str, expected: ExpectedStatus, interval: Duration) {
        self.health.register_health_check_task(url, expected, interval);
    }
}
