//! Consistent hashing on the destination

use super::jump_hash::jump_index;
use super::key::{destination_key, hash_key};
use super::{BalanceStrategy, Balancer, PickContext};
use crate::adapter::{compatible, ProxyHandle};

/// Consecutive keys probed before falling back to a linear scan
const MAX_RETRY: u64 = 5;

/// Pins each destination to a stable proxy while it stays alive
#[derive(Debug, Default)]
pub struct ConsistentHashing;

impl ConsistentHashing {
    pub fn new() -> Self {
        Self
    }
}

impl Balancer for ConsistentHashing {
    fn pick(&self, ctx: &PickContext<'_>) -> ProxyHandle {
        let proxies = ctx.all;
        let key = hash_key(&destination_key(ctx.metadata));

        for i in 0..MAX_RETRY {
            let proxy = &proxies[jump_index(key.wrapping_add(i), proxies.len())];
            if proxy.alive_for_url(ctx.test_url) {
                return proxy.clone();
            }
        }

        // Availability is poor; take any live proxy
        proxies
            .iter()
            .find(|p| p.alive_for_url(ctx.test_url))
            .or_else(|| proxies.first())
            .cloned()
            .unwrap_or_else(compatible)
    }

    fn strategy(&self) -> BalanceStrategy {
        BalanceStrategy::ConsistentHashing
    }
}
