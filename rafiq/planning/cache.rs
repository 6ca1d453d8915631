use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::plan::Plan;

/// Cached plan plus bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    plan: Plan,
    created_at: DateTime<Utc>,
    hits: u64,
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a live plan.
    pub hits: u64,
    /// Lookups that found nothing (or only an expired entry).
    pub misses: u64,
    /// Entries evicted by TTL or capacity pressure.
    pub evictions: u64,
}

/// Memoization layer in front of the external model call.
///
/// Keys are caller-computed fingerprints. Entries expire after `ttl`;
/// expired entries are misses and are evicted on access. Once `capacity`
/// is exceeded the least recently used entry goes first. Reads refresh
/// recency. Safe for concurrent use.
#[derive(Debug)]
pub struct PlanCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

#[derive(Debug)]
struct CacheInner {
    entries: IndexMap<String, CacheEntry>,
    stats: CacheStats,
}

impl PlanCache {
    /// Creates a cache holding at most `capacity` plans for `ttl` each.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: IndexMap::new(),
                stats: CacheStats::default(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Looks up a plan by fingerprint, refreshing its recency on a hit.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<Plan> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(fingerprint) else {
            inner.stats.misses += 1;
            return None;
        };
        if Utc::now() - entry.created_at > self.ttl {
            inner.entries.shift_remove(fingerprint);
            inner.stats.misses += 1;
            inner.stats.evictions += 1;
            return None;
        }
        // Move to the back of the recency order.
        let mut entry = inner
            .entries
            .shift_remove(fingerprint)
            .expect("entry present under lock");
        entry.hits += 1;
        let plan = entry.plan.clone();
        inner.entries.insert(fingerprint.to_string(), entry);
        inner.stats.hits += 1;
        Some(plan)
    }

    /// Stores a validated plan under its fingerprint.
    pub fn put(&self, fingerprint: impl Into<String>, plan: Plan) {
        let fingerprint = fingerprint.into();
        let mut inner = self.inner.lock();
        inner.entries.shift_remove(&fingerprint);
        inner.entries.insert(
            fingerprint,
            CacheEntry {
                plan,
                created_at: Utc::now(),
                hits: 0,
            },
        );
        while inner.entries.len() > self.capacity {
            inner.entries.shift_remove_index(0);
            inner.stats.evictions += 1;
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of hit/miss/eviction counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Recorded hit count for a fingerprint (testing/observability).
    #[must_use]
    pub fn hit_count(&self, fingerprint: &str) -> u64 {
        self.inner
            .lock()
            .entries
            .get(fingerprint)
            .map_or(0, |entry| entry.hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instruction::Language,
        plan::{Plan, PlanStep},
    };

    fn plan(tag: &str) -> Plan {
        Plan::new(
            Language::English,
            0.9,
            vec![PlanStep::new("echo", tag.to_string())],
        )
    }

    #[test]
    fn hit_within_ttl_refreshes_recency_and_counts() {
        let cache = PlanCache::new(4, Duration::minutes(5));
        cache.put("fp-a", plan("a"));
        assert!(cache.get("fp-a").is_some());
        assert!(cache.get("fp-a").is_some());
        assert_eq!(cache.hit_count("fp-a"), 2);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn expired_entries_are_misses_and_evicted() {
        let cache = PlanCache::new(4, Duration::zero());
        cache.put("fp-a", plan("a"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("fp-a").is_none());
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn least_recently_used_entry_is_evicted_at_capacity() {
        let cache = PlanCache::new(2, Duration::minutes(5));
        cache.put("fp-a", plan("a"));
        cache.put("fp-b", plan("b"));
        // Touch `a` so `b` becomes the eviction candidate.
        assert!(cache.get("fp-a").is_some());
        cache.put("fp-c", plan("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("fp-b").is_none());
        assert!(cache.get("fp-a").is_some());
        assert!(cache.get("fp-c").is_some());
    }
}
