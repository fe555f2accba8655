//! Async facade over the store, resolver, cache, and delegation queue.
//!
//! `ContextService` owns the wiring: it installs the cache as the store's
//! invalidation hook, runs the schema hook on every write, bridges the
//! blocking store onto the runtime with `spawn_blocking`, and supervises
//! the delegation worker's lifecycle (startup recovery through graceful
//! shutdown).

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use strata_core::level::ContextLevel;
use strata_core::schema::SchemaHook;
use strata_core::types::{
    ContextRecord, ContextRefs, DelegationEntry, InsightEntry, ProgressEntry, ResolvedView,
};
use strata_store::{AnnotationQuery, ContextStore, InvalidationHook, ListFilter};

use crate::cache::ResolutionCache;
use crate::config::EngineConfig;
use crate::delegation::DelegationQueue;
use crate::errors::{EngineError, Result};
use crate::resolver::InheritanceResolver;

/// What `get` returns, depending on whether resolution was requested.
#[derive(Clone, Debug)]
pub enum GetResult {
    /// The raw record, own data only.
    Record(ContextRecord),
    /// The merged view over the ancestor chain.
    Resolved(Arc<ResolvedView>),
}

/// The engine's public entry point.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct ContextService {
    store: Arc<ContextStore>,
    cache: Arc<ResolutionCache>,
    resolver: Arc<InheritanceResolver>,
    queue: RwLock<Option<DelegationQueue>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    schema: Arc<dyn SchemaHook>,
    config: EngineConfig,
}

impl ContextService {
    /// Wire up the service over an opened store and start the delegation
    /// worker, re-enqueueing any PENDING entries from a previous run.
    pub async fn start(
        store: Arc<ContextStore>,
        schema: Arc<dyn SchemaHook>,
        config: EngineConfig,
    ) -> Result<Self> {
        let cache = Arc::new(ResolutionCache::new(config.cache_ttl));
        store.set_invalidation_hook(Arc::clone(&cache) as Arc<dyn InvalidationHook>);

        let resolver = Arc::new(InheritanceResolver::new(
            Arc::clone(&store),
            Arc::clone(&cache),
        ));

        // The worker must be draining before recovery re-enqueues the
        // backlog: recovery waits for channel capacity, so a backlog
        // larger than the channel never completes against an idle worker.
        let (queue, worker) = DelegationQueue::new(Arc::clone(&store), config.queue_capacity);
        let handle = worker.spawn();
        let recovered = queue.recover_pending(config.recovery_batch).await?;
        info!(
            recovered,
            queue_capacity = config.queue_capacity,
            "context service started"
        );

        Ok(Self {
            store,
            cache,
            resolver,
            queue: RwLock::new(Some(queue)),
            worker: parking_lot::Mutex::new(Some(handle)),
            schema,
            config,
        })
    }

    /// Close the delegation queue and wait for the worker to drain.
    ///
    /// Entries still PENDING after shutdown (accepted but not applied)
    /// are picked up by the next run's startup recovery.
    pub async fn shutdown(&self) {
        drop(self.queue.write().take());
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "delegation worker ended abnormally");
            }
        }
        info!("context service stopped");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Context CRUD
    // ─────────────────────────────────────────────────────────────────────

    /// Create or replace a context record.
    ///
    /// Runs the schema hook, then validates parentage and persists.
    #[instrument(skip(self, data, refs), fields(level = %level, context_id))]
    pub async fn create(
        &self,
        level: ContextLevel,
        context_id: &str,
        mut data: Map<String, Value>,
        refs: ContextRefs,
    ) -> Result<ContextRecord> {
        self.schema.normalize(level, context_id, &mut data)?;
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        run_blocking(move || store.put(level, &id, data, &refs)).await
    }

    /// Fetch a context, raw or resolved.
    ///
    /// `force_refresh` only matters with `include_inherited`: raw reads go
    /// straight to the store.
    pub async fn get(
        &self,
        level: ContextLevel,
        context_id: &str,
        include_inherited: bool,
        force_refresh: bool,
    ) -> Result<GetResult> {
        if include_inherited {
            return Ok(GetResult::Resolved(
                self.resolve(level, context_id, force_refresh).await?,
            ));
        }
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        run_blocking(move || store.get(level, &id))
            .await
            .map(GetResult::Record)
    }

    /// Replace a context's data, keeping its existing ancestor refs.
    ///
    /// With `propagate_changes`, descendant views are eagerly recomputed
    /// after the write so the next reads at those levels are cache hits.
    /// Correctness never depends on it: the write already invalidated
    /// every affected view.
    #[instrument(skip(self, data), fields(level = %level, context_id, propagate_changes))]
    pub async fn update(
        &self,
        level: ContextLevel,
        context_id: &str,
        mut data: Map<String, Value>,
        propagate_changes: bool,
    ) -> Result<ContextRecord> {
        self.schema.normalize(level, context_id, &mut data)?;
        let store = Arc::clone(&self.store);
        let resolver = Arc::clone(&self.resolver);
        let id = context_id.to_string();
        run_blocking(move || -> strata_store::Result<ContextRecord> {
            let existing = store.get(level, &id)?;
            let refs = ContextRefs {
                owner_id: Some(existing.owner_id.clone()),
                project_id: existing.project_id.clone(),
                branch_id: existing.branch_id.clone(),
            };
            let record = store.put(level, &id, data, &refs)?;
            // The write is committed and invalidation already ran; a
            // warming failure must not turn a successful update into an
            // error for the caller.
            if propagate_changes {
                if let Err(err) = warm_descendants(&store, &resolver, level, &id) {
                    warn!(level = %level, context_id = %id, error = %err, "descendant warm-up skipped");
                }
            }
            Ok(record)
        })
        .await
    }

    /// Delete a context record. Descendants and annotations are left in
    /// place; affected cached views are invalidated by the store hook.
    pub async fn delete(&self, level: ContextLevel, context_id: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        run_blocking(move || store.delete(level, &id)).await
    }

    /// List records at a level, optionally filtered by ancestor refs.
    pub async fn list(&self, level: ContextLevel, filter: ListFilter) -> Result<Vec<ContextRecord>> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.list(level, &filter)).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve the merged view for (level, context id), subject to the
    /// configured deadline.
    pub async fn resolve(
        &self,
        level: ContextLevel,
        context_id: &str,
        force_refresh: bool,
    ) -> Result<Arc<ResolvedView>> {
        let resolver = Arc::clone(&self.resolver);
        let id = context_id.to_string();
        let task = run_blocking(move || resolver.resolve(level, &id, force_refresh));
        match tokio::time::timeout(self.config.resolve_timeout, task).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ResolveTimeout {
                level,
                context_id: context_id.to_string(),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delegation
    // ─────────────────────────────────────────────────────────────────────

    /// Enqueue an upward delegation; returns once the entry is durable.
    pub async fn delegate(
        &self,
        source_level: ContextLevel,
        source_id: &str,
        target_level: ContextLevel,
        payload: Map<String, Value>,
        reason: &str,
    ) -> Result<DelegationEntry> {
        let queue = self
            .queue
            .read()
            .clone()
            .ok_or(EngineError::QueueClosed)?;
        queue
            .delegate(source_level, source_id, target_level, payload, reason)
            .await
    }

    /// Fetch one delegation entry by id.
    pub async fn delegation(&self, id: &str) -> Result<DelegationEntry> {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        run_blocking(move || store.get_delegation(&id)).await
    }

    /// Full delegation audit history for a source context, oldest first.
    pub async fn delegations_for(
        &self,
        source_level: ContextLevel,
        source_id: &str,
    ) -> Result<Vec<DelegationEntry>> {
        let store = Arc::clone(&self.store);
        let id = source_id.to_string();
        run_blocking(move || store.delegations_for(source_level, &id)).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Insights and progress
    // ─────────────────────────────────────────────────────────────────────

    /// Append an insight to an existing context.
    pub async fn add_insight(
        &self,
        level: ContextLevel,
        context_id: &str,
        content: &str,
        category: Option<String>,
        importance: Option<u8>,
        agent_id: Option<String>,
    ) -> Result<InsightEntry> {
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        let content = content.to_string();
        run_blocking(move || {
            store.append_insight(
                level,
                &id,
                &content,
                category.as_deref(),
                importance,
                agent_id.as_deref(),
            )
        })
        .await
    }

    /// Append a progress note to an existing context.
    pub async fn add_progress(
        &self,
        level: ContextLevel,
        context_id: &str,
        content: &str,
        agent_id: Option<String>,
    ) -> Result<ProgressEntry> {
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        let content = content.to_string();
        run_blocking(move || store.append_progress(level, &id, &content, agent_id.as_deref())).await
    }

    /// List a context's insights, newest filters applied store-side.
    pub async fn insights(
        &self,
        level: ContextLevel,
        context_id: &str,
        query: AnnotationQuery,
    ) -> Result<Vec<InsightEntry>> {
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        run_blocking(move || store.list_insights(level, &id, &query)).await
    }

    /// List a context's progress notes in chronological order.
    pub async fn progress(
        &self,
        level: ContextLevel,
        context_id: &str,
        query: AnnotationQuery,
    ) -> Result<Vec<ProgressEntry>> {
        let store = Arc::clone(&self.store);
        let id = context_id.to_string();
        run_blocking(move || store.list_progress(level, &id, &query)).await
    }

    /// Number of cached views, for observability and tests.
    #[must_use]
    pub fn cached_view_count(&self) -> usize {
        self.cache.view_count()
    }
}

/// Recompute descendant views after a write at `level`.
///
/// Descendants are found through the denormalized ref columns: a GLOBAL
/// write warms every project, branch, and task under the owner; a BRANCH
/// write warms its tasks. Failures are logged and skipped, since warming
/// is an optimization.
fn warm_descendants(
    store: &ContextStore,
    resolver: &InheritanceResolver,
    level: ContextLevel,
    context_id: &str,
) -> strata_store::Result<()> {
    let mut warmed = 0usize;
    for descendant_level in ContextLevel::ALL {
        if !level.is_ancestor_of(descendant_level) {
            continue;
        }
        let filter = match level {
            ContextLevel::Global => ListFilter {
                owner_id: Some(context_id.to_string()),
                ..ListFilter::default()
            },
            ContextLevel::Project => ListFilter {
                project_id: Some(context_id.to_string()),
                ..ListFilter::default()
            },
            ContextLevel::Branch => ListFilter {
                branch_id: Some(context_id.to_string()),
                ..ListFilter::default()
            },
            ContextLevel::Task => return Ok(()),
        };
        for record in store.list(descendant_level, &filter)? {
            match resolver.resolve(record.level, &record.context_id, false) {
                Ok(_) => warmed += 1,
                Err(err) => {
                    warn!(
                        key = %record.key(),
                        error = %err,
                        "descendant warm-up failed, view stays cold"
                    );
                }
            }
        }
    }
    if warmed > 0 {
        tracing::debug!(level = %level, context_id, warmed, "descendant views recomputed");
    }
    Ok(())
}

async fn run_blocking<T, E, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    E: Send + 'static,
    EngineError: From<E>,
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Internal(format!("blocking store task panicked: {e}")))?
        .map_err(EngineError::from)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
