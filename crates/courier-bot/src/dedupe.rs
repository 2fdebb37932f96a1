//! TTL-bounded mark-once cache for webhook deduplication.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Remembers keys it has seen until their TTL lapses.
pub struct DedupeCache {
    ttl: Duration,
    seen: DashMap<String, Instant>,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record `key` and return true exactly once per TTL window.  Expired
    /// entries behave as unseen.  Each call opportunistically purges expired
    /// keys, so memory stays bounded by the TTL.
    pub fn mark_once(&self, key: &str) -> bool {
        self.mark_once_at(key, Instant::now())
    }

    fn mark_once_at(&self, key: &str, now: Instant) -> bool {
        self.seen.retain(|_, expires_at| *expires_at > now);

        let mut fresh = false;
        self.seen
            .entry(key.to_owned())
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + self.ttl;
                    fresh = true;
                }
            })
            .or_insert_with(|| {
                fresh = true;
                now + self.ttl
            });
        fresh
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_is_true_second_is_false() {
        let cache = DedupeCache::new(Duration::from_secs(300));
        assert!(cache.mark_once("a|1|hello"));
        assert!(!cache.mark_once("a|1|hello"));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let cache = DedupeCache::new(Duration::from_secs(300));
        assert!(cache.mark_once("a|1|x"));
        assert!(cache.mark_once("a|2|x"));
        assert!(cache.mark_once("b|1|x"));
    }

    #[test]
    fn expired_keys_mark_true_again() {
        let cache = DedupeCache::new(Duration::from_secs(300));
        let now = Instant::now();
        assert!(cache.mark_once_at("k", now));
        assert!(!cache.mark_once_at("k", now + Duration::from_secs(299)));
        assert!(cache.mark_once_at("k", now + Duration::from_secs(301)));
    }

    #[test]
    fn purge_drops_expired_entries() {
        let cache = DedupeCache::new(Duration::from_secs(10));
        let now = Instant::now();
        for i in 0..100 {
            cache.mark_once_at(&format!("k{i}"), now);
        }
        cache.mark_once_at("late", now + Duration::from_secs(11));
        assert_eq!(cache.seen.len(), 1);
    }
}
