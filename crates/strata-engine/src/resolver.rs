//! Inheritance resolution: walk the ancestor chain, merge, memoize.
//!
//! The chain is derived from the target row's own ref columns — no
//! lookup table and no unbounded recursion, at most three ancestor
//! fetches. Missing ancestors contribute empty maps (inheritance is
//! best-effort on the read path); a missing *target* is a hard
//! `ContextNotFound`, since without its row there is no chain to walk.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use serde_json::Map;
use tracing::{debug, instrument};

use strata_core::level::{ContextKey, ContextLevel};
use strata_core::merge::deep_merge;
use strata_core::types::{ContextRecord, ResolvedView};
use strata_store::ContextStore;

use crate::cache::{GenerationSnapshot, ResolutionCache};
use crate::errors::Result;
use crate::metrics::RESOLUTIONS_TOTAL;

/// Computes merged views over the ancestor chain.
pub struct InheritanceResolver {
    store: Arc<ContextStore>,
    cache: Arc<ResolutionCache>,
}

impl InheritanceResolver {
    /// Create a resolver over the given store and cache.
    #[must_use]
    pub fn new(store: Arc<ContextStore>, cache: Arc<ResolutionCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve the merged view for (level, context id).
    ///
    /// `force_refresh` bypasses cache reads but still writes through, so
    /// a forced resolution repopulates the cache for later callers.
    #[instrument(skip(self), fields(level = %level, context_id, force_refresh))]
    pub fn resolve(
        &self,
        level: ContextLevel,
        context_id: &str,
        force_refresh: bool,
    ) -> Result<Arc<ResolvedView>> {
        let key = ContextKey::new(level, context_id);

        if !force_refresh {
            if let Some(view) = self.cache.get_view(&key) {
                return Ok(view);
            }
        }

        let mut snapshot = GenerationSnapshot::default();

        // The target record anchors the chain: its ref columns name every
        // ancestor id. Generation is observed before the read so a
        // concurrent write to the target rejects this population.
        let target = self
            .fetch_record(&key, force_refresh, &mut snapshot)?
            .ok_or_else(|| strata_store::StoreError::context_not_found(level, context_id))?;

        let mut chain_keys: Vec<ContextKey> = Vec::with_capacity(4);
        let mut inherited_by_level: BTreeMap<ContextLevel, Map<String, serde_json::Value>> =
            BTreeMap::new();
        let mut merged = Map::new();

        for chain_level in level.chain() {
            if *chain_level == level {
                chain_keys.push(key.clone());
                deep_merge(&mut merged, &target.data);
                let _ = inherited_by_level.insert(level, target.data.clone());
                continue;
            }

            let Some(ancestor_key) = target.ancestor_key(*chain_level) else {
                // Row carries no ref for this level; it contributes nothing.
                let _ = inherited_by_level.insert(*chain_level, Map::new());
                continue;
            };

            chain_keys.push(ancestor_key.clone());
            let contribution = self
                .fetch_record(&ancestor_key, force_refresh, &mut snapshot)?
                .map(|record| record.data.clone())
                .unwrap_or_default();
            deep_merge(&mut merged, &contribution);
            let _ = inherited_by_level.insert(*chain_level, contribution);
        }

        let view = Arc::new(ResolvedView {
            context_id: context_id.to_string(),
            level,
            own_data: target.data.clone(),
            inherited_by_level,
            merged,
            computed_at: chrono::Utc::now().to_rfc3339(),
        });

        counter!(RESOLUTIONS_TOTAL, "level" => level.as_sql()).increment(1);
        if !self.cache.insert_view(Arc::clone(&view), &chain_keys, &snapshot) {
            debug!(key = %key, "resolved view not cached (chain changed mid-resolution)");
        }

        Ok(view)
    }

    /// Fetch a record through the record cache, observing its generation
    /// before the store read.
    fn fetch_record(
        &self,
        key: &ContextKey,
        force_refresh: bool,
        snapshot: &mut GenerationSnapshot,
    ) -> Result<Option<Arc<ContextRecord>>> {
        if !force_refresh {
            if let Some(record) = self.cache.get_record(key) {
                snapshot.observe(key.clone(), self.cache.generation(key));
                return Ok(Some(record));
            }
        }

        let observed = self.cache.generation(key);
        snapshot.observe(key.clone(), observed);

        let Some(record) = self.store.get_opt(key.level, &key.context_id)? else {
            return Ok(None);
        };
        let record = Arc::new(record);
        self.cache.insert_record(Arc::clone(&record), observed);
        Ok(Some(record))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
