//! Statement cache.
//!
//! Compiled statements are memoised in a bounded LRU keyed by the plan's
//! structural fingerprint, so logically equal builders share one compiled
//! statement across instances and prepared queries compile once. Thread
//! safety via interior mutability using parking_lot::Mutex.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::query::compile::CompiledQuery;

/// Default number of cached statements.
const DEFAULT_CAPACITY: usize = 256;

/// Cache metrics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Number of cache hits (statement already compiled)
    pub hits: u64,
    /// Number of cache misses (statement needed compilation)
    pub misses: u64,
    /// Number of statements evicted
    pub evictions: u64,
}

impl CacheMetrics {
    /// Get hit rate as a fraction (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState {
    statements: LruCache<String, Arc<CompiledQuery>>,
    metrics: CacheMetrics,
}

/// Bounded LRU of compiled statements, safe for concurrent lookup.
pub struct StatementCache {
    state: Mutex<CacheState>,
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("positive capacity");
        Self {
            state: Mutex::new(CacheState {
                statements: LruCache::new(capacity),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Look up a compiled statement by cache key.
    pub fn get(&self, key: &str) -> Option<Arc<CompiledQuery>> {
        let mut state = self.state.lock();
        match state.statements.get(key) {
            Some(stmt) => {
                let stmt = Arc::clone(stmt);
                state.metrics.hits += 1;
                Some(stmt)
            }
            None => {
                state.metrics.misses += 1;
                None
            }
        }
    }

    /// Insert a freshly compiled statement.
    pub fn insert(&self, key: String, statement: Arc<CompiledQuery>) {
        let mut state = self.state.lock();
        if state.statements.len() == state.statements.cap().get()
            && !state.statements.contains(&key)
        {
            state.metrics.evictions += 1;
            debug!(key = %key, "statement cache eviction");
        }
        state.statements.put(key, statement);
    }

    /// Drop all cached statements, keeping metrics.
    pub fn clear(&self) {
        self.state.lock().statements.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }
}
