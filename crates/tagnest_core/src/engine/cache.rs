//! Per-workspace expansion cache.
//!
//! # Responsibility
//! - Memoize expansion results by group id with LRU capacity and TTL bounds.
//! - Drop entries whose subgraph changed: the group and all its ancestors.
//! - Count hits and misses for hit-rate reporting.
//!
//! # Invariants
//! - The cache holds no authoritative state; dropping any entry is safe.
//! - Callers insert only while holding the graph read lock and invalidate
//!   while holding the write lock, so no stale insert can follow an
//!   invalidation.
//! - A disabled cache never serves data; lookups report `Unavailable`.

use crate::config::CacheConfig;
use crate::engine::graph::GroupGraph;
use crate::model::expansion::ExpansionResult;
use crate::model::group::GroupId;
use log::debug;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Internal cache failure; callers recompute from the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    Unavailable,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "expansion cache unavailable"),
        }
    }
}

impl Error for CacheError {}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0.0 before the first lookup.
    pub hit_rate: f64,
    pub size: u64,
    pub invalidations: u64,
}

/// Expansion cache owned by one workspace session.
pub struct ExpansionCache {
    entries: Option<Cache<GroupId, Arc<ExpansionResult>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ExpansionCache {
    /// Builds a cache from validated configuration.
    pub fn new(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::with_ttl(config.capacity, config.ttl())
        } else {
            Self::disabled()
        }
    }

    /// Builds an enabled cache with explicit bounds.
    pub fn with_ttl(capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self::from_entries(Some(entries))
    }

    /// Builds a cache that never stores anything.
    pub fn disabled() -> Self {
        Self::from_entries(None)
    }

    fn from_entries(entries: Option<Cache<GroupId, Arc<ExpansionResult>>>) -> Self {
        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Looks up one entry, counting a hit only when `accept` approves it.
    ///
    /// A rejected entry stays cached and counts as a miss.
    pub fn lookup(
        &self,
        group_id: GroupId,
        accept: impl FnOnce(&ExpansionResult) -> bool,
    ) -> Result<Option<Arc<ExpansionResult>>, CacheError> {
        let entries = self.entries.as_ref().ok_or(CacheError::Unavailable)?;
        match entries
            .get(&group_id)
            .filter(|value| accept(value.as_ref()))
        {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Looks up one entry unconditionally.
    pub fn get(&self, group_id: GroupId) -> Result<Option<Arc<ExpansionResult>>, CacheError> {
        self.lookup(group_id, |_| true)
    }

    /// Stores one entry. No-op when disabled.
    pub fn insert(&self, group_id: GroupId, value: Arc<ExpansionResult>) {
        if let Some(entries) = &self.entries {
            entries.insert(group_id, value);
        }
    }

    /// Returns the cached entry or computes and stores a new one.
    ///
    /// Convenience path for callers without a depth budget. The expander
    /// uses [`Self::lookup`] and [`Self::insert`] so it can reject entries
    /// computed under a different budget. A disabled cache degrades to
    /// plain computation.
    pub fn get_or_compute<E>(
        &self,
        group_id: GroupId,
        compute: impl FnOnce() -> Result<Arc<ExpansionResult>, E>,
    ) -> Result<Arc<ExpansionResult>, E> {
        match self.get(group_id) {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => {
                let value = compute()?;
                self.insert(group_id, Arc::clone(&value));
                Ok(value)
            }
            Err(CacheError::Unavailable) => compute(),
        }
    }

    /// Drops one entry.
    pub fn invalidate(&self, group_id: GroupId) {
        if let Some(entries) = &self.entries {
            entries.invalidate(&group_id);
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops `group_id` and every group that transitively contains it.
    ///
    /// Must run against the graph as it was *before* edges around
    /// `group_id` were removed, otherwise former ancestors are missed.
    /// Returns the number of keys dropped.
    pub fn invalidate_transitive(&self, group_id: GroupId, graph: &GroupGraph) -> usize {
        let mut affected = graph.ancestors_of(group_id);
        affected.insert(group_id);
        for id in &affected {
            self.invalidate(*id);
        }
        debug!(
            "event=cache_invalidate module=cache status=ok scope=transitive keys={}",
            affected.len()
        );
        affected.len()
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        if let Some(entries) = &self.entries {
            entries.invalidate_all();
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!("event=cache_invalidate module=cache status=ok scope=all");
        }
    }

    /// Returns counters and the current entry count.
    pub fn stats(&self) -> CacheStats {
        let size = match &self.entries {
            Some(entries) => {
                entries.run_pending_tasks();
                entries.entry_count()
            }
            None => 0,
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            size,
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheError, ExpansionCache};
    use crate::model::expansion::ExpansionResult;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    fn result(tags: &[&str]) -> Arc<ExpansionResult> {
        Arc::new(ExpansionResult {
            tags: tags.iter().map(|tag| tag.to_string()).collect::<BTreeSet<_>>(),
            truncated: false,
            depth: 1,
        })
    }

    #[test]
    fn hit_rate_tracks_lookups() {
        let cache = ExpansionCache::with_ttl(16, Duration::from_secs(60));
        let id = Uuid::new_v4();
        assert_eq!(cache.stats().hit_rate, 0.0);

        assert!(cache.get(id).unwrap().is_none());
        cache.insert(id, result(&["a"]));
        assert!(cache.get(id).unwrap().is_some());
        assert!(cache.get(id).unwrap().is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn rejected_entry_counts_as_miss() {
        let cache = ExpansionCache::with_ttl(16, Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.insert(id, result(&["a"]));

        assert!(cache.lookup(id, |value| value.depth > 5).unwrap().is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn disabled_cache_reports_unavailable_and_still_computes() {
        let cache = ExpansionCache::disabled();
        let id = Uuid::new_v4();
        assert_eq!(cache.get(id).unwrap_err(), CacheError::Unavailable);

        let mut calls = 0;
        for _ in 0..2 {
            let value = cache
                .get_or_compute::<()>(id, || {
                    calls += 1;
                    Ok(result(&["x"]))
                })
                .unwrap();
            assert!(value.tags.contains("x"));
        }
        assert_eq!(calls, 2);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = ExpansionCache::with_ttl(16, Duration::from_millis(50));
        let id = Uuid::new_v4();
        cache.insert(id, result(&["a"]));
        assert!(cache.get(id).unwrap().is_some());

        thread::sleep(Duration::from_millis(120));
        assert!(cache.get(id).unwrap().is_none());
    }

    #[test]
    fn capacity_bounds_entry_count() {
        let cache = ExpansionCache::with_ttl(8, Duration::from_secs(60));
        for _ in 0..64 {
            cache.insert(Uuid::new_v4(), result(&["a"]));
        }
        assert!(cache.stats().size <= 8);
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        let cache = ExpansionCache::with_ttl(2, Duration::from_secs(60));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.insert(a, result(&["a"]));
        cache.insert(b, result(&["b"]));
        cache.stats();

        assert!(cache.get(a).unwrap().is_some());
        cache.insert(c, result(&["c"]));
        assert_eq!(cache.stats().size, 2);

        assert!(cache.get(b).unwrap().is_none());
        assert!(cache.get(a).unwrap().is_some());
        assert!(cache.get(c).unwrap().is_some());
    }

    #[test]
    fn get_or_compute_only_computes_once() {
        let cache = ExpansionCache::with_ttl(16, Duration::from_secs(60));
        let id = Uuid::new_v4();
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .get_or_compute::<()>(id, || {
                    calls += 1;
                    Ok(result(&["a"]))
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
    }
}
