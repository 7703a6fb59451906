//! Round-robin balancing over the alive subset

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{BalanceStrategy, Balancer, PickContext};
use crate::adapter::{compatible, ProxyHandle};

/// Cycles through the alive subset in order
///
/// Uses atomic operations for lock-free index tracking.
#[derive(Debug, Default)]
pub struct RoundRobin {
    index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn pick(&self, ctx: &PickContext<'_>) -> ProxyHandle {
        if ctx.alive.is_empty() {
            return ctx.all.first().cloned().unwrap_or_else(compatible);
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % ctx.alive.len();
        ctx.alive[idx].clone()
    }

    fn strategy(&self) -> BalanceStrategy {
        BalanceStrategy::RoundRobin
    }
}
