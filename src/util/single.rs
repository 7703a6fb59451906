//! Single-flight execution with a coalescing window

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Completed<T> {
    at: Instant,
    epoch: u64,
    value: T,
}

/// Runs a unit of work at most once at a time.
///
/// Callers arriving while a run is in flight wait for it and share its
/// result. Callers arriving within `wait` after a run completed get the
/// cached result without running anything.
pub struct Single<T> {
    wait: Duration,
    last: Mutex<Option<Completed<T>>>,
    runs: AtomicU64,
    epoch: AtomicU64,
}

impl<T: Clone> Single<T> {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last: Mutex::new(None),
            runs: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Run `f` unless a shared result is available.
    ///
    /// Returns the value and whether it was shared with another caller.
    pub async fn run<F, Fut>(&self, f: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let runs_before = self.runs.load(Ordering::Acquire);
        let mut last = self.last.lock().await;

        if let Some(done) = last.as_ref() {
            let fresh = done.epoch == self.epoch.load(Ordering::Acquire)
                && (self.runs.load(Ordering::Acquire) != runs_before
                    || done.at.elapsed() < self.wait);
            if fresh {
                return (done.value.clone(), true);
            }
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let value = f().await;
        *last = Some(Completed {
            at: Instant::now(),
            epoch,
            value: value.clone(),
        });
        self.runs.fetch_add(1, Ordering::AcqRel);

        (value, false)
    }

    /// Drop the cached result so the next caller runs again
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}
