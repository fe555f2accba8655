//! Memoization of resolved views and level records.
//!
//! Two eviction triggers, whichever fires first:
//!
//! - **TTL**: entries older than the configured TTL read as misses and
//!   are dropped lazily.
//! - **Write invalidation**: [`ResolutionCache::invalidate`] evicts the
//!   written key and walks the reverse dependency index to evict every
//!   cached view whose resolution chain included it. Views register
//!   under each ancestor key at insert time, so the walk is a single
//!   step bounded by the number of cached dependents — never a full-cache
//!   scan, and never a scan guarded by one global lock (`DashMap` shards).
//!
//! Writers race resolvers: a resolution that started before a write must
//! not repopulate the cache with pre-write data after the invalidation
//! ran. Each key carries a generation counter, bumped on invalidation;
//! the resolver snapshots the generations of the whole chain before
//! reading, and [`ResolutionCache::insert_view`] refuses the insert if
//! any of them moved. The observed generations are stored with the entry
//! and re-verified on every read, so an insert that raced the
//! invalidation check is caught the first time anyone looks at it.
//!
//! Nothing here persists. Cache loss is a latency cost, never a
//! correctness hazard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, error};

use strata_core::level::{ContextKey, ContextLevel};
use strata_core::types::{ContextRecord, ResolvedView};

use crate::metrics::{
    CACHE_EVICTIONS_TOTAL, CACHE_HITS_TOTAL, CACHE_INCONSISTENCIES_TOTAL,
    CACHE_INVALIDATIONS_TOTAL, CACHE_MISSES_TOTAL, CACHE_STALE_REJECTS_TOTAL,
};

/// Per-key generation observations taken before a resolution reads the
/// store. Consumed by [`ResolutionCache::insert_view`].
#[derive(Clone, Debug, Default)]
pub struct GenerationSnapshot {
    observed: Vec<(ContextKey, u64)>,
}

impl GenerationSnapshot {
    /// Record the generation observed for `key`.
    pub fn observe(&mut self, key: ContextKey, generation: u64) {
        self.observed.push((key, generation));
    }
}

struct CachedView {
    view: Arc<ResolvedView>,
    /// Ancestor keys this view registered under in the reverse index.
    chain: Vec<ContextKey>,
    /// Chain generations the resolution observed before reading the
    /// store. Re-verified on every read: an insert that slipped past an
    /// in-flight invalidation fails the comparison and is evicted.
    observed: Vec<(ContextKey, u64)>,
    inserted_at: Instant,
}

struct CachedRecord {
    record: Arc<ContextRecord>,
    /// Key generation observed before the store read.
    generation: u64,
    inserted_at: Instant,
}

/// Shared, sharded cache for resolved views and raw level records.
pub struct ResolutionCache {
    ttl: Duration,
    views: DashMap<ContextKey, CachedView>,
    records: DashMap<ContextKey, CachedRecord>,
    /// Reverse index: ancestor key → view keys whose chain includes it.
    dependents: DashMap<ContextKey, HashSet<ContextKey>>,
    /// Monotonic per-key write counters. Never pruned: a counter that
    /// disappeared would read as 0 again and re-validate snapshots taken
    /// before the writes it was counting.
    generations: DashMap<ContextKey, u64>,
}

impl ResolutionCache {
    /// Create a cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            views: DashMap::new(),
            records: DashMap::new(),
            dependents: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    /// Current generation for a key (0 if never invalidated).
    #[must_use]
    pub fn generation(&self, key: &ContextKey) -> u64 {
        self.generations.get(key).map_or(0, |g| *g)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Views
    // ─────────────────────────────────────────────────────────────────────

    /// Cached view for `key`, if present and fresh.
    pub fn get_view(&self, key: &ContextKey) -> Option<Arc<ResolvedView>> {
        let result = match self.views.get(key) {
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl => {
                drop(entry);
                self.evict_view(key, "ttl");
                None
            }
            Some(entry) => {
                // A live entry's observed chain generations must still be
                // current. A mismatch means an insert raced an
                // invalidation (checked then overtaken): log, evict,
                // report a miss — the next resolution recomputes.
                let stale = entry
                    .observed
                    .iter()
                    .any(|(chain_key, observed)| self.generation(chain_key) != *observed);
                if stale {
                    error!(key = %key, "cache inconsistency: generation mismatch on live view");
                    counter!(CACHE_INCONSISTENCIES_TOTAL).increment(1);
                    drop(entry);
                    self.invalidate(key.level, &key.context_id);
                    None
                } else {
                    Some(Arc::clone(&entry.view))
                }
            }
            None => None,
        };

        if result.is_some() {
            counter!(CACHE_HITS_TOTAL, "kind" => "view").increment(1);
        } else {
            counter!(CACHE_MISSES_TOTAL, "kind" => "view").increment(1);
        }
        result
    }

    /// Insert a freshly resolved view, registering it under every ancestor
    /// key in its chain.
    ///
    /// Returns `false` (and caches nothing) if any generation in
    /// `snapshot` has moved since the resolution read the store — the
    /// view was computed against data a concurrent write already
    /// invalidated.
    pub fn insert_view(
        &self,
        view: Arc<ResolvedView>,
        chain: &[ContextKey],
        snapshot: &GenerationSnapshot,
    ) -> bool {
        for (key, observed) in &snapshot.observed {
            if self.generation(key) != *observed {
                debug!(stale = %key, view = %view.key(), "rejecting stale view insert");
                counter!(CACHE_STALE_REJECTS_TOTAL).increment(1);
                return false;
            }
        }

        let view_key = view.key();
        for ancestor in chain {
            if *ancestor == view_key {
                continue;
            }
            let _ = self
                .dependents
                .entry(ancestor.clone())
                .or_default()
                .insert(view_key.clone());
        }
        // Store what the resolution observed, not a re-read: a concurrent
        // invalidation landing between the check above and this insert
        // must surface as a mismatch on the next `get_view`.
        let _ = self.views.insert(
            view_key.clone(),
            CachedView {
                view,
                chain: chain.to_vec(),
                observed: snapshot.observed.clone(),
                inserted_at: Instant::now(),
            },
        );
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────

    /// Cached raw record for `key`, if present and fresh.
    pub fn get_record(&self, key: &ContextKey) -> Option<Arc<ContextRecord>> {
        let result = match self.records.get(key) {
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl => {
                drop(entry);
                let _ = self.records.remove(key);
                counter!(CACHE_EVICTIONS_TOTAL, "cause" => "ttl").increment(1);
                None
            }
            // Same read-time defense as views: an insert that raced an
            // invalidation carries a superseded generation.
            Some(entry) if entry.generation != self.generation(key) => {
                drop(entry);
                let _ = self.records.remove(key);
                counter!(CACHE_EVICTIONS_TOTAL, "cause" => "stale").increment(1);
                None
            }
            Some(entry) => Some(Arc::clone(&entry.record)),
            None => None,
        };

        if result.is_some() {
            counter!(CACHE_HITS_TOTAL, "kind" => "record").increment(1);
        } else {
            counter!(CACHE_MISSES_TOTAL, "kind" => "record").increment(1);
        }
        result
    }

    /// Insert a raw record read at `observed_generation` for its key.
    ///
    /// Skipped if the key has been invalidated since the read.
    pub fn insert_record(&self, record: Arc<ContextRecord>, observed_generation: u64) {
        let key = record.key();
        if self.generation(&key) != observed_generation {
            counter!(CACHE_STALE_REJECTS_TOTAL).increment(1);
            return;
        }
        let _ = self.records.insert(
            key,
            CachedRecord {
                record,
                generation: observed_generation,
                inserted_at: Instant::now(),
            },
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────────────────

    /// Invalidate (level, id): bump its generation, evict its record and
    /// view, then evict every cached view that inherited from it.
    ///
    /// Runs synchronously with the triggering write — by the time the
    /// store's `put` returns, dependents are gone.
    pub fn invalidate(&self, level: ContextLevel, context_id: &str) {
        let key = ContextKey::new(level, context_id);
        counter!(CACHE_INVALIDATIONS_TOTAL).increment(1);

        {
            let mut generation = self.generations.entry(key.clone()).or_insert(0);
            *generation += 1;
        }

        let _ = self.records.remove(&key);
        self.evict_view(&key, "invalidation");

        // One-step walk: views register under every chain ancestor, so
        // all transitive dependents of this key sit in this one set.
        if let Some((_, dependent_keys)) = self.dependents.remove(&key) {
            for dependent in dependent_keys {
                self.evict_view(&dependent, "cascade");
            }
        }

        debug!(key = %key, "cache invalidated");
    }

    /// Remove a view and deregister it from its ancestors' dependent
    /// sets, dropping sets the removal left empty.
    fn evict_view(&self, key: &ContextKey, cause: &'static str) {
        if let Some((_, cached)) = self.views.remove(key) {
            counter!(CACHE_EVICTIONS_TOTAL, "cause" => cause).increment(1);
            for ancestor in &cached.chain {
                let emptied = match self.dependents.get_mut(ancestor) {
                    Some(mut set) => {
                        let _ = set.remove(key);
                        set.is_empty()
                    }
                    None => false,
                };
                // Re-checked under the entry lock: a concurrent insert may
                // have re-registered since the guard above was dropped.
                if emptied {
                    let _ = self.dependents.remove_if(ancestor, |_, set| set.is_empty());
                }
            }
        }
    }

    /// Number of cached views (test/diagnostic helper).
    #[must_use]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }
}

/// The cache *is* the store's invalidation hook: writes call straight
/// into [`ResolutionCache::invalidate`] before the write returns.
impl strata_store::InvalidationHook for ResolutionCache {
    fn invalidate(&self, level: ContextLevel, context_id: &str) {
        Self::invalidate(self, level, context_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
