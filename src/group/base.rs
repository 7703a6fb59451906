//! Machinery shared by every group type
//!
//! [`GroupBase`] aggregates the member providers into one filtered proxy
//! list, keeps it fresh through a background cache actor, and escalates
//! repeated dial failures into provider health checks.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filter::ProxyFilter;
use crate::adapter::{
    compatible, BoxedConn, BoxedPacketConn, FirstWriteCallbackConn, ProxyHandle, PROBE_GRACE,
};
use crate::config::GroupConfig;
use crate::error::{is_refused, GroupError, Result};
use crate::models::{AdapterType, ExpectedStatus, Metadata};
use crate::provider::{ProviderHandle, VehicleType};

/// Provider version never observed by this group
const UNOBSERVED: u64 = u64::MAX;

/// One pass plus up to two retries
const RECOMPUTE_ATTEMPTS: usize = 3;

/// Options shared by every group type
pub struct GroupBaseOption {
    pub name: String,
    pub filter: String,
    pub exclude_filter: String,
    pub exclude_type: String,
    /// Probe timeout and failure-counting window
    pub test_timeout: Duration,
    pub max_failed_times: u32,
    pub providers: Vec<ProviderHandle>,
}

impl GroupBaseOption {
    pub fn from_config(config: &GroupConfig, providers: Vec<ProviderHandle>) -> Self {
        Self {
            name: config.name.clone(),
            filter: config.filter.clone(),
            exclude_filter: config.exclude_filter.clone(),
            exclude_type: config.exclude_type.clone(),
            test_timeout: config.test_timeout(),
            max_failed_times: config.max_failed_times(),
            providers,
        }
    }
}

#[derive(Debug, Default)]
struct FailureTracker {
    count: u32,
    first_failure: Option<Instant>,
}

struct GroupCore {
    name: String,
    filter: ProxyFilter,
    providers: Vec<ProviderHandle>,
    versions: Vec<AtomicU64>,
    subsets: Vec<Mutex<Arc<Vec<ProxyHandle>>>>,
    snapshot: ArcSwapOption<Vec<ProxyHandle>>,
    start_lock: tokio::sync::Mutex<()>,
    actor: Mutex<Option<watch::Sender<bool>>>,
    closed: AtomicBool,
    hints: Arc<Notify>,
    failures: Mutex<FailureTracker>,
    health_checking: AtomicBool,
    test_timeout: Duration,
    max_failed_times: u32,
}

/// Cheaply cloneable handle to a group's shared state
#[derive(Clone)]
pub struct GroupBase {
    core: Arc<GroupCore>,
}

impl GroupBase {
    pub fn new(option: GroupBaseOption) -> Result<Self> {
        let filter = ProxyFilter::new(&option.filter, &option.exclude_filter, &option.exclude_type)?;
        let count = option.providers.len();

        let test_timeout = if option.test_timeout.is_zero() {
            Duration::from_millis(crate::config::DEFAULT_TEST_TIMEOUT_MS)
        } else {
            option.test_timeout
        };
        let max_failed_times = if option.max_failed_times == 0 {
            crate::config::DEFAULT_MAX_FAILED_TIMES
        } else {
            option.max_failed_times
        };

        Ok(Self {
            core: Arc::new(GroupCore {
                name: option.name,
                filter,
                providers: option.providers,
                versions: (0..count).map(|_| AtomicU64::new(UNOBSERVED)).collect(),
                subsets: (0..count).map(|_| Mutex::new(Arc::new(Vec::new()))).collect(),
                snapshot: ArcSwapOption::empty(),
                start_lock: tokio::sync::Mutex::new(()),
                actor: Mutex::new(None),
                closed: AtomicBool::new(false),
                hints: Arc::new(Notify::new()),
                failures: Mutex::new(FailureTracker::default()),
                health_checking: AtomicBool::new(false),
                test_timeout,
                max_failed_times,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn providers(&self) -> &[ProviderHandle] {
        &self.core.providers
    }

    pub fn test_timeout(&self) -> Duration {
        self.core.test_timeout
    }

    /// Change hints for the group's strategy watcher
    pub fn hints(&self) -> Arc<Notify> {
        self.core.hints.clone()
    }

    pub fn emit_hint(&self) {
        self.core.hints.notify_one();
    }

    /// Current filtered proxy list; never empty.
    ///
    /// The first call starts the cache actor and computes the list under the
    /// start lock; later calls read the published snapshot.
    pub async fn get_proxies(&self) -> Arc<Vec<ProxyHandle>> {
        let core = &self.core;
        if core.closed.load(Ordering::Acquire) {
            return Arc::new(core.recompute().await);
        }
        if let Some(snapshot) = core.snapshot.load_full() {
            return snapshot;
        }

        let _started = core.start_lock.lock().await;
        if core.closed.load(Ordering::Acquire) {
            return Arc::new(core.recompute().await);
        }
        if let Some(snapshot) = core.snapshot.load_full() {
            return snapshot;
        }

        let (dirty_tx, dirty_rx) = mpsc::channel(1);
        for provider in &core.providers {
            provider.add_change_listener(dirty_tx.clone());
        }
        drop(dirty_tx);

        let snapshot = Arc::new(core.recompute().await);
        core.snapshot.store(Some(snapshot.clone()));
        self.spawn_actor(dirty_rx);

        // Lost a race with close()
        if core.closed.load(Ordering::Acquire) {
            core.stop_actor();
        }

        snapshot
    }

    fn spawn_actor(&self, mut dirty_rx: mpsc::Receiver<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.core.actor.lock() = Some(shutdown_tx);

        let weak = Arc::downgrade(&self.core);
        let name = self.core.name.clone();
        debug!(group = %name, "Starting cache actor");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    dirty = dirty_rx.recv() => {
                        if dirty.is_none() {
                            break;
                        }
                        let Some(core) = weak.upgrade() else {
                            break;
                        };
                        let proxies = core.recompute().await;
                        if core.closed.load(Ordering::Acquire) {
                            break;
                        }
                        debug!(group = %core.name, count = proxies.len(), "Group proxies refreshed");
                        core.snapshot.store(Some(Arc::new(proxies)));
                        core.hints.notify_one();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(group = %name, "Cache actor stopped");
        });
    }

    /// Forward a usage hint to every member provider
    pub fn touch(&self) {
        for provider in &self.core.providers {
            provider.touch();
        }
    }

    /// Probe every member concurrently and collect the successful delays.
    ///
    /// Cancelling `cancel` stops waiting for stragglers; results collected so
    /// far are kept.
    pub async fn url_test(
        &self,
        url: &str,
        expected: &ExpectedStatus,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, u16>> {
        let proxies = self.get_proxies().await;
        let probe_timeout = self.core.test_timeout;

        let mut probes: FuturesUnordered<_> = proxies
            .iter()
            .cloned()
            .map(|proxy| async move {
                let outcome = tokio::time::timeout(
                    probe_timeout + PROBE_GRACE,
                    proxy.url_test(url, expected, probe_timeout),
                )
                .await;
                (proxy, outcome)
            })
            .collect();

        let mut delays = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(group = %self.core.name, "URL test cancelled");
                    break;
                }
                next = probes.next() => match next {
                    Some((proxy, Ok(Ok(delay)))) => {
                        delays.insert(proxy.name().to_string(), delay);
                    }
                    Some((proxy, Ok(Err(e)))) => {
                        debug!(group = %self.core.name, proxy = proxy.name(), "URL test failed: {}", e);
                    }
                    Some((proxy, Err(_))) => {
                        debug!(group = %self.core.name, proxy = proxy.name(), "URL test abandoned");
                    }
                    None => break,
                }
            }
        }

        self.emit_hint();

        if delays.is_empty() {
            return Err(GroupError::AllProxiesTimedOut);
        }
        Ok(delays)
    }

    /// Dial through `proxy`, feeding the outcome into the failure tracker
    pub async fn dial_tracked(&self, proxy: &ProxyHandle, metadata: &Metadata) -> Result<BoxedConn> {
        let kind = proxy.adapter_type();
        match proxy.dial(metadata).await {
            Ok(conn) => {
                let base = self.clone();
                Ok(Box::new(FirstWriteCallbackConn::new(
                    conn,
                    move |result| match result {
                        Ok(()) => base.on_dial_success(),
                        Err(e) => base.on_dial_failed(kind, e),
                    },
                )))
            }
            Err(e) => {
                self.on_dial_failed(kind, &e);
                Err(GroupError::DialFailed {
                    proxy: proxy.name().to_string(),
                    source: e,
                })
            }
        }
    }

    /// Dial through `proxy` without touching the failure tracker
    pub async fn dial_untracked(
        &self,
        proxy: &ProxyHandle,
        metadata: &Metadata,
    ) -> Result<BoxedConn> {
        proxy
            .dial(metadata)
            .await
            .map_err(|source| GroupError::DialFailed {
                proxy: proxy.name().to_string(),
                source,
            })
    }

    pub async fn listen_packet(
        &self,
        proxy: &ProxyHandle,
        metadata: &Metadata,
    ) -> Result<BoxedPacketConn> {
        proxy
            .listen_packet(metadata)
            .await
            .map_err(|source| GroupError::DialFailed {
                proxy: proxy.name().to_string(),
                source,
            })
    }

    /// Record a dial failure through an upstream of type `kind`
    pub fn on_dial_failed(&self, kind: AdapterType, err: &io::Error) {
        if kind.is_passthrough() {
            return;
        }

        if is_refused(err) {
            debug!(group = %self.core.name, "Connection refused, active health check");
            self.spawn_health_check();
            return;
        }

        let window = self.core.test_timeout;
        let trigger = {
            let mut failures = self.core.failures.lock();
            failures.count += 1;
            match failures.first_failure {
                Some(first) if failures.count > 1 => {
                    if first.elapsed() > window {
                        failures.count = 0;
                        false
                    } else {
                        debug!(group = %self.core.name, count = failures.count, "Group failed count");
                        failures.count >= self.core.max_failed_times
                    }
                }
                _ => {
                    debug!(group = %self.core.name, "Group first failed");
                    failures.first_failure = Some(Instant::now());
                    failures.count >= self.core.max_failed_times
                }
            }
        };

        if trigger {
            warn!(
                group = %self.core.name,
                "Group failed multiple times, active health check"
            );
            self.spawn_health_check();
        }
    }

    pub fn on_dial_success(&self) {
        if !self.core.health_checking.load(Ordering::Acquire) {
            self.core.failures.lock().count = 0;
        }
    }

    pub fn failed_times(&self) -> u32 {
        self.core.failures.lock().count
    }

    pub fn is_health_checking(&self) -> bool {
        self.core.health_checking.load(Ordering::Acquire)
    }

    fn spawn_health_check(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(group = %self.core.name, "No runtime available for health check");
            return;
        };
        let base = self.clone();
        runtime.spawn(async move {
            base.health_check().await;
        });
    }

    /// Health check every member provider; concurrent calls are dropped
    pub async fn health_check(&self) {
        let core = &self.core;
        if core.health_checking.swap(true, Ordering::AcqRel) {
            return;
        }

        futures::future::join_all(core.providers.iter().map(|p| p.health_check())).await;

        core.health_checking.store(false, Ordering::Release);
        *core.failures.lock() = FailureTracker::default();
        core.hints.notify_one();
    }

    /// Stop the cache actor; later `get_proxies` calls compute inline
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(group = %self.core.name, "Closing group");
        self.core.stop_actor();
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }
}

impl GroupCore {
    fn stop_actor(&self) {
        if let Some(tx) = self.actor.lock().take() {
            let _ = tx.send(true);
        }
        self.snapshot.store(None);
    }

    async fn recompute(&self) -> Vec<ProxyHandle> {
        let mut proxies = Vec::new();
        for attempt in 0..RECOMPUTE_ATTEMPTS {
            if attempt > 0 {
                tokio::task::yield_now().await;
            }
            let (computed, raced) = self.compute_once();
            proxies = computed;
            if !proxies.is_empty() && !raced {
                break;
            }
        }

        if proxies.is_empty() {
            debug!(group = %self.name, "No proxies left after filtering, using placeholder");
            return vec![compatible()];
        }
        proxies
    }

    /// One filtering pass; also reports whether a provider changed mid-pass
    fn compute_once(&self) -> (Vec<ProxyHandle>, bool) {
        let mut raced = false;
        let mut proxies = Vec::new();

        if !self.filter.has_filters() {
            for provider in &self.providers {
                proxies.extend(provider.proxies());
            }
        } else {
            for (i, provider) in self.providers.iter().enumerate() {
                if provider.vehicle_type() == VehicleType::Compatible {
                    self.versions[i].store(u64::from(provider.version()), Ordering::Release);
                    *self.subsets[i].lock() = Arc::new(provider.proxies());
                    continue;
                }

                let seen = self.versions[i].load(Ordering::Acquire);
                let version = u64::from(provider.version());
                if seen == version {
                    continue;
                }
                if self.versions[i]
                    .compare_exchange(seen, version, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    raced = true;
                    continue;
                }

                let selected = self.filter.select(&provider.proxies());
                *self.subsets[i].lock() = Arc::new(selected);
                if u64::from(provider.version()) != version {
                    raced = true;
                }
            }

            for subset in &self.subsets {
                proxies.extend(subset.lock().iter().cloned());
            }
        }

        if self.providers.len() > 1 && self.filter.filter_count() > 1 {
            proxies = self.filter.rerank(proxies);
        }

        (self.filter.exclude(proxies), raced)
    }
}

impl Drop for GroupCore {
    fn drop(&mut self) {
        if let Some(tx) = self.actor.get_mut().take() {
            let _ = tx.send(true);
        }
    }
}
