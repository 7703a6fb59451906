use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::adapter::ProxyHandle;

/// Background task that re-runs a strategy refresh on every change hint.
///
/// Started lazily on first use and at most once; stopped explicitly or when
/// the watcher is dropped.
#[derive(Default)]
pub struct HintWatcher {
    stop: Mutex<Option<watch::Sender<bool>>>,
}

impl HintWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.stop.lock().is_some()
    }

    /// Spawn the watcher unless it is already running.
    ///
    /// `refresh` runs once immediately and again after every hint.
    pub fn start_with<F, Fut>(&self, group: &str, hints: Arc<Notify>, refresh: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        *stop = Some(stop_tx);
        drop(stop);

        let group = group.to_string();
        debug!(group = %group, "Starting hint watcher");
        tokio::spawn(async move {
            refresh().await;
            loop {
                tokio::select! {
                    _ = hints.notified() => refresh().await,
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(group = %group, "Hint watcher stopped");
        });
    }

    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for HintWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Subset of a group's proxies that are alive for its test URL.
///
/// Only the group's watcher refreshes the subset; readers see the last one
/// published.
pub struct AliveCache {
    url: String,
    alive: RwLock<Option<Arc<Vec<ProxyHandle>>>>,
}

impl AliveCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            alive: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last published subset, `None` before the first refresh
    pub fn current(&self) -> Option<Arc<Vec<ProxyHandle>>> {
        self.alive.read().clone()
    }

    /// Recompute and publish the alive subset of `all`; may be empty
    pub fn refresh(&self, all: &[ProxyHandle]) -> Arc<Vec<ProxyHandle>> {
        let alive: Arc<Vec<ProxyHandle>> = Arc::new(
            all.iter()
                .filter(|p| p.alive_for_url(&self.url))
                .cloned()
                .collect(),
        );
        *self.alive.write() = Some(alive.clone());
        alive
    }
}
