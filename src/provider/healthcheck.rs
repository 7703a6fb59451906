//! Health checking for a provider's proxies
//!
//! Periodically probes every proxy against the provider's URL and any URLs
//! registered by groups, and notifies change listeners after each round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ChangeNotifier;
use crate::adapter::{ProxyHandle, PROBE_GRACE};
use crate::config::{GroupConfig, GroupKind, HealthCheckConfig, DEFAULT_TEST_TIMEOUT_MS};
use crate::error::Result;
use crate::models::ExpectedStatus;
use crate::util::Single;

/// Rounds requested within this window share the previous result
const CHECK_COALESCE_WINDOW: Duration = Duration::from_secs(5);

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckOption {
    /// Mandatory probe URL; empty disables periodic checking
    pub url: String,
    pub expected_status: ExpectedStatus,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Interval between periodic rounds; zero disables the periodic loop
    pub interval: Duration,
    /// Skip proxies already alive on alternate ticks
    pub lazy: bool,
    /// Maximum simultaneous probes per round
    pub concurrency: usize,
}

impl HealthCheckOption {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self {
            url: url.into(),
            expected_status: ExpectedStatus::any(),
            timeout: Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS),
            interval,
            lazy: true,
            concurrency: 10,
        }
    }

    /// Build options from the runtime configuration defaults
    pub fn from_config(url: impl Into<String>, config: &HealthCheckConfig) -> Self {
        let timeout_ms = if config.timeout_ms == 0 {
            DEFAULT_TEST_TIMEOUT_MS
        } else {
            config.timeout_ms
        };
        Self {
            timeout: Duration::from_millis(timeout_ms),
            concurrency: config.concurrency.max(1),
            ..Self::new(url, Duration::from_secs(config.interval_secs))
        }
    }

    pub fn with_expected_status(mut self, expected: ExpectedStatus) -> Self {
        self.expected_status = expected;
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Options for the provider holding a group's inline proxies.
    ///
    /// Select groups never probe periodically.
    pub fn from_group(config: &GroupConfig) -> Result<Self> {
        let interval = match config.kind()? {
            GroupKind::Select => Duration::ZERO,
            _ => config.interval(),
        };
        Ok(Self::new(config.test_url.trim(), interval)
            .with_expected_status(config.expected_status()?)
            .with_lazy(config.lazy)
            .with_timeout(config.test_timeout()))
    }
}

/// Periodic and on-demand prober for one provider
pub struct HealthChecker {
    provider: String,
    proxies: ArcSwap<Vec<ProxyHandle>>,
    url: String,
    expected: ExpectedStatus,
    extra: Mutex<HashMap<String, ExpectedStatus>>,
    interval: Mutex<Duration>,
    /// Toggled on every periodic tick; when set, alive proxies are skipped
    lazy_pass: AtomicBool,
    timeout: Duration,
    concurrency: usize,
    running: Mutex<Option<watch::Sender<bool>>>,
    single: Single<()>,
    last_touch: Mutex<Option<Instant>>,
    notifier: ChangeNotifier,
}

impl HealthChecker {
    pub fn new(
        provider: impl Into<String>,
        proxies: Vec<ProxyHandle>,
        option: HealthCheckOption,
        notifier: ChangeNotifier,
    ) -> Arc<Self> {
        let url = option.url.trim().to_string();
        // Without a URL there is nothing to probe periodically
        let (expected, interval) = if url.is_empty() {
            (ExpectedStatus::any(), Duration::ZERO)
        } else {
            (option.expected_status, option.interval)
        };
        let timeout = if option.timeout.is_zero() {
            Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS)
        } else {
            option.timeout
        };

        Arc::new(Self {
            provider: provider.into(),
            proxies: ArcSwap::from_pointee(proxies),
            url,
            expected,
            extra: Mutex::new(HashMap::new()),
            interval: Mutex::new(interval),
            lazy_pass: AtomicBool::new(option.lazy),
            timeout,
            concurrency: option.concurrency.max(1),
            running: Mutex::new(None),
            single: Single::new(CHECK_COALESCE_WINDOW),
            last_touch: Mutex::new(None),
            notifier,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Whether the periodic loop is configured to run
    pub fn auto(&self) -> bool {
        !self.interval().is_zero()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn set_proxies(&self, proxies: Vec<ProxyHandle>) {
        self.proxies.store(Arc::new(proxies));
    }

    pub fn touch(&self) {
        *self.last_touch.lock() = Some(Instant::now());
    }

    pub fn last_touch(&self) -> Option<Instant> {
        *self.last_touch.lock()
    }

    /// URLs probed each round, mandatory URL first
    pub fn urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if !self.url.is_empty() {
            urls.push(self.url.clone());
        }
        let mut extra: Vec<String> = self.extra.lock().keys().cloned().collect();
        extra.sort();
        urls.extend(extra);
        urls
    }

    /// Start the periodic loop; the first round runs one interval from now
    pub fn start(self: &Arc<Self>) {
        let period = self.interval();
        if period.is_zero() {
            debug!(provider = %self.provider, "Health check interval is zero, not starting");
            return;
        }

        let mut running = self.running.lock();
        if running.is_some() {
            warn!(provider = %self.provider, "Skip start health check timer, already started");
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *running = Some(shutdown_tx);
        drop(running);

        info!(
            provider = %self.provider,
            "Starting health checker with {}s interval",
            period.as_secs()
        );

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(checker) = weak.upgrade() else {
                            break;
                        };
                        checker.lazy_pass.fetch_xor(true, Ordering::AcqRel);
                        checker.check().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Health checker loop exited");
        });
    }

    /// Stop the periodic loop
    pub fn close(&self) {
        if let Some(tx) = self.running.lock().take() {
            info!(provider = %self.provider, "Health checker shutting down");
            let _ = tx.send(true);
        }
    }

    /// Add a URL to probe on behalf of a group.
    ///
    /// The first registration of a URL wins. The caller's interval is
    /// adopted when the provider has none of its own.
    pub fn register_health_check_task(
        self: &Arc<Self>,
        url: &str,
        expected: ExpectedStatus,
        interval: Duration,
    ) {
        let url = url.trim();
        if url.is_empty() || url == self.url {
            debug!(provider = %self.provider, url, "Ignore health check url");
            return;
        }

        {
            let mut extra = self.extra.lock();
            if extra.contains_key(url) {
                return;
            }
            extra.insert(url.to_string(), expected);
        }

        {
            let mut current = self.interval.lock();
            if current.is_zero() {
                *current = interval;
            }
        }

        if self.auto() && !self.is_running() {
            self.start();
        }
    }

    /// Run one health-check round, sharing a recent or in-flight round
    pub async fn check(&self) {
        let proxies = self.proxies.load_full();
        if proxies.is_empty() {
            return;
        }

        let (_, shared) = self.single.run(|| self.run_round(proxies)).await;
        if shared {
            debug!(provider = %self.provider, "Health check shared with recent round");
        }
    }

    #[instrument(
        skip(self, proxies),
        fields(provider = %self.provider, round = tracing::field::Empty)
    )]
    async fn run_round(&self, proxies: Arc<Vec<ProxyHandle>>) {
        let round = Uuid::new_v4();
        tracing::Span::current().record("round", tracing::field::display(round));
        debug!("Start health check round");

        let lazy = self.lazy_pass.load(Ordering::Acquire);
        let mut targets = Vec::new();
        if !self.url.is_empty() {
            targets.push((self.url.clone(), self.expected.clone()));
        }
        targets.extend(
            self.extra
                .lock()
                .iter()
                .map(|(url, expected)| (url.clone(), expected.clone())),
        );

        let mut jobs = Vec::new();
        for (url, expected) in &targets {
            for proxy in proxies.iter() {
                if lazy && proxy.alive_for_url(url) {
                    continue;
                }
                jobs.push((proxy.clone(), url.clone(), expected.clone()));
            }
        }

        let probe_timeout = self.timeout;
        let probes: Vec<_> = jobs
            .into_iter()
            .map(|(proxy, url, expected)| async move {
                debug!(proxy = proxy.name(), url = %url, "Health checking");
                let outcome = timeout(
                    probe_timeout + PROBE_GRACE,
                    proxy.url_test(&url, &expected, probe_timeout),
                )
                .await;

                match outcome {
                    Ok(Ok(delay)) => {
                        debug!(proxy = proxy.name(), url = %url, delay, "Proxy is healthy");
                        true
                    }
                    Ok(Err(e)) => {
                        debug!(proxy = proxy.name(), url = %url, "Proxy is unhealthy: {}", e);
                        false
                    }
                    Err(_) => {
                        debug!(proxy = proxy.name(), url = %url, "Proxy probe abandoned");
                        false
                    }
                }
            })
            .collect();

        let results = futures::stream::iter(probes)
            .buffer_unordered(self.concurrency)
            .collect::<Vec<bool>>()
            .await;

        let healthy = results.iter().filter(|&&v| v).count();
        info!(
            "Health check complete: {} probed, {} healthy, {} unhealthy",
            results.len(),
            healthy,
            results.len().saturating_sub(healthy)
        );

        self.notifier.notify();
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        if let Some(tx) = self.running.get_mut().take() {
            let _ = tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Proxy;
    use crate::testutil::{handles, mocks, TEST_URL};
    use tokio::sync::mpsc;

    const EXTRA_URL: &str = "https://cp.cloudflare.com/";

    fn checker(proxies: Vec<ProxyHandle>, lazy: bool, interval: Duration) -> Arc<HealthChecker> {
        HealthChecker::new(
            "subscription",
            proxies,
            HealthCheckOption::new(TEST_URL, interval).with_lazy(lazy),
            ChangeNotifier::new(),
        )
    }

    #[tokio::test]
    async fn test_check_probes_every_url() {
        let proxies = mocks(&["a", "b"]);
        let hc = checker(handles(&proxies), false, Duration::ZERO);
        hc.register_health_check_task(EXTRA_URL, ExpectedStatus::any(), Duration::ZERO);

        hc.check().await;

        for proxy in &proxies {
            assert_eq!(proxy.url_tests(), 2);
            assert!(proxy.alive_for_url(EXTRA_URL));
        }
    }

    #[tokio::test]
    async fn test_check_runs_on_spawned_task() {
        let proxies = mocks(&["a", "b", "c"]);
        let hc = checker(handles(&proxies), false, Duration::ZERO);
        hc.register_health_check_task(EXTRA_URL, ExpectedStatus::any(), Duration::ZERO);

        let task = tokio::spawn({
            let hc = hc.clone();
            async move { hc.check().await }
        });
        tokio_test::assert_ok!(task.await);

        for proxy in &proxies {
            assert_eq!(proxy.url_tests(), 2);
        }
    }

    #[tokio::test]
    async fn test_lazy_pass_skips_alive_proxies() {
        let proxies = mocks(&["alive", "dead"]);
        proxies[0].set_alive(TEST_URL, true);
        proxies[1].set_alive(TEST_URL, false);
        let hc = checker(handles(&proxies), true, Duration::ZERO);

        hc.check().await;

        assert_eq!(proxies[0].url_tests(), 0);
        assert_eq!(proxies[1].url_tests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_is_coalesced() {
        let proxies = mocks(&["a"]);
        let hc = checker(handles(&proxies), false, Duration::ZERO);

        hc.check().await;
        hc.check().await;
        assert_eq!(proxies[0].url_tests(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        hc.check().await;
        assert_eq!(proxies[0].url_tests(), 2);
    }

    #[tokio::test]
    async fn test_probe_failures_are_swallowed() {
        let proxies = mocks(&["a"]);
        proxies[0].set_probe(None);
        let hc = checker(handles(&proxies), false, Duration::ZERO);

        hc.check().await;

        assert!(!proxies[0].alive_for_url(TEST_URL));
    }

    #[tokio::test]
    async fn test_round_notifies_listeners() {
        let notifier = ChangeNotifier::new();
        let (tx, mut rx) = mpsc::channel(1);
        notifier.subscribe(tx);
        let hc = HealthChecker::new(
            "subscription",
            handles(&mocks(&["a"])),
            HealthCheckOption::new(TEST_URL, Duration::ZERO).with_lazy(false),
            notifier,
        );

        hc.check().await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_register_ignores_empty_and_duplicate_urls() {
        let hc = checker(handles(&mocks(&["a"])), true, Duration::ZERO);

        hc.register_health_check_task("   ", ExpectedStatus::any(), Duration::ZERO);
        hc.register_health_check_task(TEST_URL, ExpectedStatus::any(), Duration::ZERO);
        hc.register_health_check_task(EXTRA_URL, ExpectedStatus::any(), Duration::ZERO);
        hc.register_health_check_task(
            &format!(" {} ", EXTRA_URL),
            ExpectedStatus::parse("204").unwrap(),
            Duration::ZERO,
        );

        assert_eq!(hc.urls(), vec![TEST_URL.to_string(), EXTRA_URL.to_string()]);
        assert!(hc.extra.lock()[EXTRA_URL].is_any());
        assert!(!hc.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_adopts_interval_and_starts_loop() {
        let hc = checker(handles(&mocks(&["a"])), true, Duration::ZERO);

        hc.register_health_check_task(EXTRA_URL, ExpectedStatus::any(), Duration::from_secs(60));

        assert_eq!(hc.interval(), Duration::from_secs(60));
        assert!(hc.is_running());
        hc.close();
        assert!(!hc.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop_alternates_lazy_passes() {
        let proxies = mocks(&["a"]);
        let hc = checker(handles(&proxies), true, Duration::from_secs(30));

        hc.start();
        // A second start is ignored
        hc.start();
        assert_eq!(proxies[0].url_tests(), 0);

        // First tick flips lazy off and probes everything
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(proxies[0].url_tests(), 1);

        // Second tick is lazy and the proxy is alive
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(proxies[0].url_tests(), 1);

        // Third tick probes again
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(proxies[0].url_tests(), 2);

        hc.close();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(proxies[0].url_tests(), 2);
    }

    #[test]
    fn test_empty_url_disables_periodic_checking() {
        let hc = HealthChecker::new(
            "inline",
            Vec::new(),
            HealthCheckOption::new("", Duration::from_secs(300)),
            ChangeNotifier::new(),
        );
        assert!(!hc.auto());
        assert!(hc.urls().is_empty());
    }

    #[test]
    fn test_option_from_config() {
        let config = HealthCheckConfig {
            timeout_ms: 0,
            concurrency: 0,
            interval_secs: 120,
        };
        let option = HealthCheckOption::from_config(TEST_URL, &config);
        assert_eq!(option.timeout, Duration::from_millis(5000));
        assert_eq!(option.concurrency, 1);
        assert_eq!(option.interval, Duration::from_secs(120));
        assert!(option.lazy);
    }

    #[test]
    fn test_option_from_group() {
        let mut config = GroupConfig::new("auto", "url-test");
        config.interval = 60;
        config.lazy = false;
        config.test_timeout = 2000;
        config.expected_status = "204".to_string();

        let option = HealthCheckOption::from_group(&config).unwrap();
        assert_eq!(option.url, crate::config::DEFAULT_TEST_URL);
        assert_eq!(option.interval, Duration::from_secs(60));
        assert_eq!(option.timeout, Duration::from_millis(2000));
        assert!(!option.lazy);
        assert!(option.expected_status.check(204));
        assert!(!option.expected_status.check(200));

        let select = HealthCheckOption::from_group(&GroupConfig::new("manual", "select")).unwrap();
        assert_eq!(select.interval, Duration::ZERO);
    }
}
