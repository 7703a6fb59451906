//! Per-URL liveness and delay bookkeeping for adapter implementations

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Delay reported for a proxy with no successful measurement
pub const MAX_DELAY: u16 = u16::MAX;

const HISTORY_LIMIT: usize = 10;

/// One recorded probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayHistory {
    pub time: DateTime<Utc>,
    /// 0 means the probe failed
    pub delay: u16,
}

#[derive(Debug, Default)]
struct UrlState {
    alive: bool,
    history: VecDeque<DelayHistory>,
}

/// Liveness facts an adapter keeps for every URL it has been probed against.
///
/// URLs that were never probed fall back to a global alive flag, which starts
/// as `true` so fresh proxies are eligible before their first health check.
#[derive(Debug)]
pub struct ProxyState {
    alive: AtomicBool,
    urls: DashMap<String, UrlState>,
}

impl ProxyState {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            urls: DashMap::new(),
        }
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn alive_for_url(&self, url: &str) -> bool {
        match self.urls.get(url) {
            Some(state) => state.alive,
            None => self.alive(),
        }
    }

    pub fn last_delay_for_url(&self, url: &str) -> u16 {
        let Some(state) = self.urls.get(url) else {
            return MAX_DELAY;
        };
        if !state.alive {
            return MAX_DELAY;
        }
        match state.history.back() {
            Some(h) if h.delay > 0 => h.delay,
            _ => MAX_DELAY,
        }
    }

    /// Record a probe outcome; `None` marks the proxy dead for `url`
    pub fn record(&self, url: &str, delay: Option<u16>) {
        let alive = delay.is_some();
        let mut state = self.urls.entry(url.to_string()).or_default();
        state.alive = alive;
        state.history.push_back(DelayHistory {
            time: Utc::now(),
            delay: delay.unwrap_or(0),
        });
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
        drop(state);

        self.alive.store(alive, Ordering::Relaxed);
    }

    pub fn history(&self, url: &str) -> Vec<DelayHistory> {
        self.urls
            .get(url)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new()
    }
}
