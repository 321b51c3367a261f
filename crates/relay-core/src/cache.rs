//! TTL-bounded map
//!
//! Small expiring map used for attempt-chain exclusion state. Entries are
//! dropped lazily on access and eagerly by [`TtlCache::sweep`]; time comes
//! from an injectable [`Clock`] so tests never depend on the wall clock.

use crate::clock::{Clock, SharedClock, SystemClock};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct TtlEntry<V> {
    value: V,
    touched: Instant,
}

/// Concurrent map whose entries expire `ttl` after their last touch
pub struct TtlCache<K, V> {
    entries: DashMap<K, TtlEntry<V>>,
    ttl: Duration,
    clock: SharedClock,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache with the given TTL on the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, entry: &TtlEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.touched) >= self.ttl
    }

    /// Insert or replace a value, resetting its TTL
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.entries.insert(
            key,
            TtlEntry {
                value,
                touched: now,
            },
        );
    }

    /// Clone out a live value and refresh its TTL
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = self.clock.now();
        let mut entry = self.entries.get_mut(key)?;
        if self.is_expired(&entry, now) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.touched = now;
        Some(entry.value.clone())
    }

    /// Mutate a live value in place, refreshing its TTL.
    ///
    /// Returns `None` if the key is absent or expired. The closure runs
    /// under the entry's shard lock and must not block or suspend.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let now = self.clock.now();
        let mut entry = self.entries.get_mut(key)?;
        if self.is_expired(&entry, now) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.touched = now;
        Some(f(&mut entry.value))
    }

    /// Remove a value regardless of expiry
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        before - self.entries.len()
    }

    /// Live-or-expired entry count (expired entries linger until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_on_manual_clock(ttl_secs: u64) -> (TtlCache<String, u32>, ManualClock) {
        let clock = ManualClock::new();
        let cache = TtlCache::with_clock(
            Duration::from_secs(ttl_secs),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn get_returns_live_values() {
        let (cache, _clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn expired_values_are_gone() {
        let (cache, clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(301));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn access_refreshes_ttl() {
        let (cache, clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(200));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        clock.advance(Duration::from_secs(200));
        // 400s since insert but only 200s since last get
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn update_mutates_in_place() {
        let (cache, _clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 1);
        let out = cache.update(&"a".to_string(), |v| {
            *v += 41;
            *v
        });
        assert_eq!(out, Some(42));
        assert_eq!(cache.get(&"a".to_string()), Some(42));
    }

    #[test]
    fn update_misses_expired_entries() {
        let (cache, clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 1);
        clock.advance(Duration::from_secs(400));
        assert_eq!(cache.update(&"a".to_string(), |v| *v), None);
    }

    #[test]
    fn sweep_drops_only_expired() {
        let (cache, clock) = cache_on_manual_clock(300);
        cache.insert("old".to_string(), 1);
        clock.advance(Duration::from_secs(200));
        cache.insert("new".to_string(), 2);
        clock.advance(Duration::from_secs(150));

        let removed = cache.sweep();
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&"old".to_string()), None);
        assert_eq!(cache.get(&"new".to_string()), Some(2));
    }

    #[test]
    fn remove_ignores_expiry() {
        let (cache, clock) = cache_on_manual_clock(300);
        cache.insert("a".to_string(), 7);
        clock.advance(Duration::from_secs(500));
        assert_eq!(cache.remove(&"a".to_string()), Some(7));
    }
}
