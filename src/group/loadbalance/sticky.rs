//! Sticky sessions keyed on source and destination

use std::num::NonZeroUsize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::jump_hash::jump_index;
use super::key::{hash_key, session_key};
use super::{BalanceStrategy, Balancer, PickContext};
use crate::adapter::{compatible, ProxyHandle};

const STICKY_TTL: Duration = Duration::from_secs(10 * 60);
const STICKY_CAPACITY: usize = 1000;
const MAX_RETRY: usize = 5;

/// Keeps a client on the same proxy for a destination.
///
/// Entries expire a fixed time after they were stored, whether or not they
/// were used since.
pub struct StickySessions {
    cache: Mutex<LruCache<u64, (usize, Instant)>>,
}

impl StickySessions {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(STICKY_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[cfg(test)]
    fn cached_index(&self, key: u64) -> Option<usize> {
        self.cache.lock().peek(&key).map(|&(idx, _)| idx)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for StickySessions {
    fn default() -> Self {
        Self::new()
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl Balancer for StickySessions {
    fn pick(&self, ctx: &PickContext<'_>) -> ProxyHandle {
        let proxies = ctx.all;
        let len = proxies.len();
        if len == 0 {
            return compatible();
        }
        let key = hash_key(&session_key(ctx.metadata));

        let mut cache = self.cache.lock();
        let cached = match cache.get(&key).copied() {
            Some((idx, stored)) if idx < len && stored.elapsed() < STICKY_TTL => Some(idx),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        };

        let mut idx = cached.unwrap_or_else(|| jump_index(key.wrapping_add(now_nanos()), len));
        for _ in 0..MAX_RETRY {
            let proxy = &proxies[idx];
            if proxy.alive_for_url(ctx.test_url) {
                if cached != Some(idx) {
                    cache.put(key, (idx, Instant::now()));
                }
                return proxy.clone();
            }
            idx = jump_index(key.wrapping_add(now_nanos()), len);
        }

        cache.pop(&key);
        proxies[0].clone()
    }

    fn strategy(&self) -> BalanceStrategy {
        BalanceStrategy::StickySessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Proxy;
    use crate::models::Metadata;
    use crate::testutil::{handles, mocks, TEST_URL};
    use std::net::{IpAddr, Ipv4Addr};

    fn metadata(host: &str, src: u8) -> Metadata {
        Metadata::tcp(host, 443).with_src_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, src)))
    }

    fn ctx<'a>(proxies: &'a [ProxyHandle], metadata: &'a Metadata) -> PickContext<'a> {
        PickContext {
            all: proxies,
            alive: proxies,
            metadata,
            test_url: TEST_URL,
        }
    }

    #[test]
    fn test_same_session_same_proxy() {
        let proxies = handles(&mocks(&["a", "b", "c", "d", "e", "f", "g", "h"]));
        let sticky = StickySessions::new();
        let m = metadata("www.example.com", 2);

        let first = sticky.pick(&ctx(&proxies, &m)).name().to_string();
        for _ in 0..20 {
            assert_eq!(sticky.pick(&ctx(&proxies, &m)).name(), first);
        }
        assert_eq!(sticky.len(), 1);
    }

    #[test]
    fn test_dead_proxy_is_replaced() {
        let mocks = mocks(&["a", "b"]);
        let proxies = handles(&mocks);
        let sticky = StickySessions::new();
        let m = metadata("www.example.com", 2);
        let key = hash_key(&session_key(&m));

        let first = sticky.pick(&ctx(&proxies, &m));
        let first_idx = sticky.cached_index(key).unwrap();
        mocks[first_idx].set_alive(TEST_URL, false);

        // Re-seeding is time based; with one live proxy left it is found
        // within a few attempts or the key is evicted.
        let next = sticky.pick(&ctx(&proxies, &m));
        match sticky.cached_index(key) {
            Some(idx) => {
                assert_ne!(next.name(), first.name());
                assert_eq!(idx, 1 - first_idx);
            }
            None => assert_eq!(next.name(), "a"),
        }
    }

    #[test]
    fn test_total_failure_evicts_and_uses_first() {
        let mocks = mocks(&["a", "b", "c"]);
        for mock in &mocks {
            mock.set_alive(TEST_URL, false);
        }
        let proxies = handles(&mocks);
        let sticky = StickySessions::new();
        let m = metadata("www.example.com", 2);

        let picked = sticky.pick(&ctx(&proxies, &m));

        assert_eq!(picked.name(), "a");
        assert_eq!(sticky.cached_index(hash_key(&session_key(&m))), None);
        assert!(!mocks[0].alive_for_url(TEST_URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let proxies = handles(&mocks(&["a", "b", "c"]));
        let sticky = StickySessions::new();
        let m = metadata("www.example.com", 2);
        let key = hash_key(&session_key(&m));

        sticky.pick(&ctx(&proxies, &m));
        let stored_at = sticky.cache.lock().peek(&key).map(|&(_, at)| at).unwrap();

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        sticky.pick(&ctx(&proxies, &m));
        let still = sticky.cache.lock().peek(&key).map(|&(_, at)| at).unwrap();
        assert_eq!(still, stored_at);

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        sticky.pick(&ctx(&proxies, &m));
        let renewed = sticky.cache.lock().peek(&key).map(|&(_, at)| at).unwrap();
        assert!(renewed > stored_at);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let proxies = handles(&mocks(&["a", "b"]));
        let sticky = StickySessions::new();
        let hosts: Vec<Metadata> = (0..=STICKY_CAPACITY)
            .map(|i| Metadata::tcp(format!("host{}.example{}.com", i, i), 443))
            .collect();
        let key = |m: &Metadata| hash_key(&session_key(m));

        for m in &hosts[..STICKY_CAPACITY] {
            sticky.pick(&ctx(&proxies, m));
        }
        // Touch the oldest entry so the second oldest becomes the eviction victim
        sticky.pick(&ctx(&proxies, &hosts[0]));
        sticky.pick(&ctx(&proxies, &hosts[STICKY_CAPACITY]));

        assert_eq!(sticky.len(), STICKY_CAPACITY);
        assert!(sticky.cached_index(key(&hosts[0])).is_some());
        assert!(sticky.cached_index(key(&hosts[1])).is_none());
        assert!(sticky.cached_index(key(&hosts[2])).is_some());
        assert!(sticky.cached_index(key(&hosts[STICKY_CAPACITY])).is_some());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let proxies = handles(&mocks(&["a", "b"]));
        let sticky = StickySessions::new();

        for i in 0..1100 {
            let m = Metadata::tcp(format!("host{}.example{}.com", i, i), 443);
            sticky.pick(&ctx(&proxies, &m));
        }

        assert_eq!(sticky.len(), STICKY_CAPACITY);
    }
}
