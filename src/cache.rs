// ============================================================================
// SECTION 12: QUERY CACHE
// ============================================================================
// Short-lived cache of chart query results.
// - Keyed by the raw request parameters
// - Freshness window is one tenth of the polling interval, read from a fresh
//   configuration snapshot on every lookup
// - One mutex; each get and each put is atomic with respect to it
//
// Two concurrent misses for the same key may both query storage and both
// write here; the later write wins. Staleness is bounded by the TTL either way.
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::config::ConfigSource;
use crate::model::ChartRecord;

/// Shared, immutable query result.
pub type CachedRecords = Arc<Vec<ChartRecord>>;

struct CachedResult {
    data: CachedRecords,
    cached_at: Instant,
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// TTL cache for chart query results.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CachedResult>>,
    config: Arc<dyn ConfigSource>,
    stats: CacheStats,
}

impl QueryCache {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            stats: CacheStats::default(),
        }
    }

    /// Cache key: `sensor|minutes|start|end`, empty strings for unused
    /// parameters.
    pub fn key(sensor: &str, minutes: &str, start: &str, end: &str) -> String {
        format!("{}|{}|{}|{}", sensor, minutes, start, end)
    }

    /// Return the cached result if it is younger than the current TTL.
    pub fn get(&self, key: &str) -> Option<CachedRecords> {
        let ttl = self.config.snapshot().cache_ttl();
        let entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.cached_at.elapsed() < ttl => {
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                trace!(target: "isley::cache", key, "Cache hit");
                Some(Arc::clone(&entry.data))
            }
            _ => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    /// Store a result, sweeping expired entries first and evicting the oldest
    /// entry when the cache is full.
    pub fn put(&self, key: String, data: CachedRecords) {
        let snapshot = self.config.snapshot();
        let ttl = snapshot.cache_ttl();
        let max_entries = snapshot.cache.max_entries.max(1);
        let now = Instant::now();

        let mut entries = self.entries.lock();

        let before = entries.len();
        entries.retain(|_, v| now.saturating_duration_since(v.cached_at) < ttl);
        let mut evicted = before - entries.len();

        if entries.len() >= max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, v)| v.cached_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                evicted += 1;
            }
        }

        entries.insert(key, CachedResult { data, cached_at: now });
        drop(entries);

        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted as u64, AtomicOrdering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            entries: self.len(),
            hits: self.stats.hits.load(AtomicOrdering::Relaxed),
            misses: self.stats.misses.load(AtomicOrdering::Relaxed),
            evictions: self.stats.evictions.load(AtomicOrdering::Relaxed),
        }
    }
}
