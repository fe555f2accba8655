//! High-level transactional `ContextStore` API.
//!
//! Composes the repositories into atomic, context-centric methods. Every
//! write method runs inside a single `SQLite` transaction — callers never
//! observe partial state — and synchronously notifies the installed
//! [`InvalidationHook`] before returning, so a completed write is never
//! followed by a stale cache read.

use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use strata_core::level::{ContextKey, ContextLevel};
use strata_core::merge::{deep_merge, deep_merge_strict};
use strata_core::types::{
    ContextRecord, ContextRefs, DelegationEntry, InsightEntry, ProgressEntry,
};

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{ConnectionPool, PooledConnection, open_pool};
use crate::sqlite::repositories::annotation::{
    AnnotationFilter, AnnotationRepo, AppendAnnotationOptions,
};
use crate::sqlite::repositories::context::{ContextRepo, UpsertContextOptions};
use crate::sqlite::repositories::delegation::{DelegationRepo, InsertDelegationOptions};

/// Synchronous cache-invalidation callback.
///
/// Installed by the engine at service construction; the store calls it
/// after every successful `put`/`merge_data`/`delete`, before the write
/// method returns. Implementations must be cheap and non-blocking.
pub trait InvalidationHook: Send + Sync {
    /// Invalidate everything whose resolution chain includes (level, id).
    fn invalidate(&self, level: ContextLevel, context_id: &str);
}

/// Filters for [`ContextStore::list`].
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    /// Only contexts owned by this user.
    pub owner_id: Option<String>,
    /// Only contexts under this project.
    pub project_id: Option<String>,
    /// Only contexts under this branch.
    pub branch_id: Option<String>,
    /// At most this many records.
    pub limit: Option<u32>,
}

/// Filters for listing insights/progress.
#[derive(Clone, Debug, Default)]
pub struct AnnotationQuery {
    /// Only this category (insights).
    pub category: Option<String>,
    /// Only entries recorded by this agent.
    pub agent_id: Option<String>,
    /// At most this many entries.
    pub limit: Option<u32>,
}

/// High-level `ContextStore` wrapping a connection pool and all repositories.
///
/// INVARIANT: writes to one (level, context id) are serialized via
/// in-process per-key mutexes (`with_key_write_lock`), so read-merge-write
/// cycles (delegation applies) never interleave on a target. The
/// `contexts` primary key enforces the one-row-per-key invariant at the
/// DB level.
pub struct ContextStore {
    pool: ConnectionPool,
    key_write_locks: Mutex<HashMap<ContextKey, Weak<Mutex<()>>>>,
    invalidation: RwLock<Option<Arc<dyn InvalidationHook>>>,
}

impl ContextStore {
    const SQLITE_BUSY_MAX_RETRIES: u32 = 32;

    /// Open (or create) the database at `path` and build the store.
    pub fn open(path: &std::path::Path, pool_size: u32) -> Result<Self> {
        Ok(Self::new(open_pool(path, pool_size)?))
    }

    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            key_write_locks: Mutex::new(HashMap::new()),
            invalidation: RwLock::new(None),
        }
    }

    /// Install the cache-invalidation hook.
    ///
    /// Explicitly constructed and injected at service start — the store
    /// carries no hidden static cache state.
    pub fn set_invalidation_hook(&self, hook: Arc<dyn InvalidationHook>) {
        let mut guard = self
            .invalidation
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(hook);
    }

    fn notify_invalidation(&self, level: ContextLevel, context_id: &str) {
        let guard = self
            .invalidation
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(hook) = guard.as_ref() {
            hook.invalidate(level, context_id);
        }
    }

    fn acquire_key_write_lock(&self, key: &ContextKey) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .key_write_locks
            .lock()
            .map_err(|_| StoreError::Internal("key lock map poisoned".into()))?;

        // Opportunistically prune dead weak refs when the map grows.
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(key.clone(), Arc::downgrade(&lock));
        Ok(lock)
    }

    fn with_key_write_lock<T>(&self, key: &ContextKey, f: impl FnMut() -> Result<T>) -> Result<T> {
        let key_lock = self.acquire_key_write_lock(key)?;
        let _guard: MutexGuard<'_, ()> = key_lock
            .lock()
            .map_err(|_| StoreError::Internal("key write lock poisoned".into()))?;
        self.retry_on_sqlite_busy(f)
    }

    /// Retry an operation on `SQLite` BUSY/LOCKED with linear backoff + jitter.
    ///
    /// Backoff: base = min(attempts * 10, 500) ms, jitter ±25% to prevent
    /// thundering herd when multiple writers contend on the same database.
    #[allow(clippy::unused_self)]
    fn retry_on_sqlite_busy<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err)
                    if Self::is_sqlite_busy_or_locked(&err)
                        && attempts < Self::SQLITE_BUSY_MAX_RETRIES =>
                {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_sqlite_busy_or_locked(err: &StoreError) -> bool {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => {
                matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }

    /// Get a connection from the pool.
    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Context records
    // ─────────────────────────────────────────────────────────────────────

    /// Create or replace the record for (level, context id).
    ///
    /// Non-GLOBAL writes validate the immediate parent exists (fail
    /// closed) and inherit grandparent refs from the parent row, so every
    /// persisted row carries its full ancestor key set. Synchronously
    /// notifies the invalidation hook before returning.
    #[instrument(skip(self, data, refs), fields(level = %level, context_id))]
    pub fn put(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: Map<String, Value>,
        refs: &ContextRefs,
    ) -> Result<ContextRecord> {
        let key = ContextKey::new(level, context_id);
        let data_text = serde_json::to_string(&Value::Object(data))?;

        let record = self.with_key_write_lock(&key, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let resolved = Self::resolve_write_refs(&tx, level, context_id, refs)?;
            let row = ContextRepo::upsert(
                &tx,
                &UpsertContextOptions {
                    level: level.as_sql(),
                    context_id,
                    owner_id: &resolved.owner_id,
                    project_id: resolved.project_id.as_deref(),
                    branch_id: resolved.branch_id.as_deref(),
                    data: &data_text,
                },
            )?;
            tx.commit()?;
            row.into_record()
        })?;

        self.notify_invalidation(level, context_id);
        debug!(key = %key, "context written");
        Ok(record)
    }

    /// Validate the parent chain for a write and produce the full ref set.
    fn resolve_write_refs(
        conn: &Connection,
        level: ContextLevel,
        context_id: &str,
        refs: &ContextRefs,
    ) -> Result<ResolvedRefs> {
        let missing = |field: &'static str| StoreError::MissingParentRef {
            level,
            context_id: context_id.to_string(),
            missing: field,
        };
        let parent_not_found = |parent_level: ContextLevel, parent_id: &str| {
            StoreError::ParentNotFound {
                level,
                context_id: context_id.to_string(),
                parent_level,
                parent_id: parent_id.to_string(),
            }
        };

        match level {
            // For GLOBAL rows the context id *is* the owner id.
            ContextLevel::Global => Ok(ResolvedRefs {
                owner_id: context_id.to_string(),
                project_id: None,
                branch_id: None,
            }),
            ContextLevel::Project => {
                let owner_id = refs.owner_id.as_deref().ok_or_else(|| missing("ownerId"))?;
                if !ContextRepo::exists(conn, ContextLevel::Global.as_sql(), owner_id)? {
                    return Err(parent_not_found(ContextLevel::Global, owner_id));
                }
                Ok(ResolvedRefs {
                    owner_id: owner_id.to_string(),
                    project_id: None,
                    branch_id: None,
                })
            }
            ContextLevel::Branch => {
                let project_id = refs
                    .project_id
                    .as_deref()
                    .ok_or_else(|| missing("projectId"))?;
                let parent = ContextRepo::get(conn, ContextLevel::Project.as_sql(), project_id)?
                    .ok_or_else(|| parent_not_found(ContextLevel::Project, project_id))?
                    .into_record()?;
                Ok(ResolvedRefs {
                    owner_id: parent.owner_id,
                    project_id: Some(project_id.to_string()),
                    branch_id: None,
                })
            }
            ContextLevel::Task => {
                let branch_id = refs
                    .branch_id
                    .as_deref()
                    .ok_or_else(|| missing("branchId"))?;
                let parent = ContextRepo::get(conn, ContextLevel::Branch.as_sql(), branch_id)?
                    .ok_or_else(|| parent_not_found(ContextLevel::Branch, branch_id))?
                    .into_record()?;
                Ok(ResolvedRefs {
                    owner_id: parent.owner_id,
                    project_id: parent.project_id,
                    branch_id: Some(branch_id.to_string()),
                })
            }
        }
    }

    /// Get the record for (level, context id), or `ContextNotFound`.
    pub fn get(&self, level: ContextLevel, context_id: &str) -> Result<ContextRecord> {
        self.get_opt(level, context_id)?
            .ok_or_else(|| StoreError::context_not_found(level, context_id))
    }

    /// Get the record for (level, context id) if it exists.
    pub fn get_opt(&self, level: ContextLevel, context_id: &str) -> Result<Option<ContextRecord>> {
        let conn = self.conn()?;
        ContextRepo::get(&conn, level.as_sql(), context_id)?
            .map(crate::sqlite::row_types::ContextRow::into_record)
            .transpose()
    }

    /// Whether a record exists for (level, context id).
    pub fn exists(&self, level: ContextLevel, context_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        ContextRepo::exists(&conn, level.as_sql(), context_id)
    }

    /// Read-merge-write `overlay` into the record's data under the
    /// per-key write lock, overlay keys winning.
    ///
    /// With `strict` set, a map/non-map kind mismatch aborts with
    /// `MergeConflict` instead of clobbering — the delegation worker uses
    /// this so a bad payload fails the entry rather than corrupting the
    /// target. Notifies the invalidation hook on success.
    #[instrument(skip(self, overlay), fields(level = %level, context_id, strict))]
    pub fn merge_data(
        &self,
        level: ContextLevel,
        context_id: &str,
        overlay: &Map<String, Value>,
        strict: bool,
    ) -> Result<ContextRecord> {
        let key = ContextKey::new(level, context_id);

        let record = self.with_key_write_lock(&key, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;
            let current = ContextRepo::get(&tx, level.as_sql(), context_id)?
                .ok_or_else(|| StoreError::context_not_found(level, context_id))?
                .into_record()?;

            let mut data = current.data;
            if strict {
                deep_merge_strict(&mut data, overlay)?;
            } else {
                deep_merge(&mut data, overlay);
            }
            let data_text = serde_json::to_string(&Value::Object(data))?;

            let row = ContextRepo::upsert(
                &tx,
                &UpsertContextOptions {
                    level: level.as_sql(),
                    context_id,
                    owner_id: &current.owner_id,
                    project_id: current.project_id.as_deref(),
                    branch_id: current.branch_id.as_deref(),
                    data: &data_text,
                },
            )?;
            tx.commit()?;
            row.into_record()
        })?;

        self.notify_invalidation(level, context_id);
        Ok(record)
    }

    /// Delete the record for (level, context id).
    ///
    /// No cascade: descendants keep their rows. Notifies the invalidation
    /// hook so cached views that inherited from the deleted record are
    /// recomputed without it.
    #[instrument(skip(self), fields(level = %level, context_id))]
    pub fn delete(&self, level: ContextLevel, context_id: &str) -> Result<()> {
        let key = ContextKey::new(level, context_id);
        let deleted = self.with_key_write_lock(&key, || {
            let conn = self.conn()?;
            ContextRepo::delete(&conn, level.as_sql(), context_id)
        })?;

        if !deleted {
            return Err(StoreError::context_not_found(level, context_id));
        }
        self.notify_invalidation(level, context_id);
        debug!(key = %key, "context deleted");
        Ok(())
    }

    /// List records at a level, optionally filtered by an ancestor ref.
    pub fn list(&self, level: ContextLevel, filter: &ListFilter) -> Result<Vec<ContextRecord>> {
        let conn = self.conn()?;
        let ref_column = if let Some(branch_id) = filter.branch_id.as_deref() {
            Some(("branch_id", branch_id))
        } else if let Some(project_id) = filter.project_id.as_deref() {
            Some(("project_id", project_id))
        } else {
            filter.owner_id.as_deref().map(|owner| ("owner_id", owner))
        };

        ContextRepo::list(&conn, level.as_sql(), ref_column, filter.limit)?
            .into_iter()
            .map(crate::sqlite::row_types::ContextRow::into_record)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delegation audit log
    // ─────────────────────────────────────────────────────────────────────

    /// Durably insert a PENDING delegation entry.
    #[instrument(skip(self, payload), fields(source = %source_level, source_id, target = %target_level))]
    pub fn enqueue_delegation(
        &self,
        source_level: ContextLevel,
        source_id: &str,
        target_level: ContextLevel,
        payload: &Map<String, Value>,
        reason: &str,
    ) -> Result<DelegationEntry> {
        let payload_text = serde_json::to_string(&Value::Object(payload.clone()))?;
        let conn = self.conn()?;
        DelegationRepo::insert(
            &conn,
            &InsertDelegationOptions {
                source_level: source_level.as_sql(),
                source_id,
                target_level: target_level.as_sql(),
                payload: &payload_text,
                reason,
            },
        )?
        .into_entry()
    }

    /// Get a delegation entry by id.
    pub fn get_delegation(&self, id: &str) -> Result<DelegationEntry> {
        let conn = self.conn()?;
        DelegationRepo::get_by_id(&conn, id)?
            .ok_or_else(|| StoreError::DelegationNotFound(id.to_string()))?
            .into_entry()
    }

    /// Mark a PENDING entry APPLIED.
    pub fn mark_delegation_applied(&self, id: &str, target_id: &str) -> Result<()> {
        let conn = self.conn()?;
        DelegationRepo::mark_applied(&conn, id, target_id)
    }

    /// Mark a PENDING entry FAILED, preserving it for audit.
    pub fn mark_delegation_failed(
        &self,
        id: &str,
        target_id: Option<&str>,
        error: &str,
    ) -> Result<()> {
        warn!(delegation_id = id, error, "delegation failed");
        let conn = self.conn()?;
        DelegationRepo::mark_failed(&conn, id, target_id, error)
    }

    /// PENDING entries in enqueue order (startup recovery). `after_id`
    /// pages through backlogs larger than one batch.
    pub fn pending_delegations(
        &self,
        after_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DelegationEntry>> {
        let conn = self.conn()?;
        DelegationRepo::list_pending(&conn, after_id, limit)?
            .into_iter()
            .map(crate::sqlite::row_types::DelegationRow::into_entry)
            .collect()
    }

    /// Full delegation history for a source context, oldest first.
    pub fn delegations_for(
        &self,
        source_level: ContextLevel,
        source_id: &str,
    ) -> Result<Vec<DelegationEntry>> {
        let conn = self.conn()?;
        DelegationRepo::list_by_source(&conn, source_level.as_sql(), source_id)?
            .into_iter()
            .map(crate::sqlite::row_types::DelegationRow::into_entry)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Annotations
    // ─────────────────────────────────────────────────────────────────────

    /// Append an insight to an existing context.
    pub fn append_insight(
        &self,
        level: ContextLevel,
        context_id: &str,
        content: &str,
        category: Option<&str>,
        importance: Option<u8>,
        agent_id: Option<&str>,
    ) -> Result<InsightEntry> {
        let conn = self.conn()?;
        if !ContextRepo::exists(&conn, level.as_sql(), context_id)? {
            return Err(StoreError::context_not_found(level, context_id));
        }
        AnnotationRepo::append(
            &conn,
            &AppendAnnotationOptions {
                kind: "insight",
                level: level.as_sql(),
                context_id,
                content,
                category,
                importance,
                agent_id,
            },
        )?
        .into_insight()
    }

    /// Append a progress note to an existing context.
    pub fn append_progress(
        &self,
        level: ContextLevel,
        context_id: &str,
        content: &str,
        agent_id: Option<&str>,
    ) -> Result<ProgressEntry> {
        let conn = self.conn()?;
        if !ContextRepo::exists(&conn, level.as_sql(), context_id)? {
            return Err(StoreError::context_not_found(level, context_id));
        }
        AnnotationRepo::append(
            &conn,
            &AppendAnnotationOptions {
                kind: "progress",
                level: level.as_sql(),
                context_id,
                content,
                category: None,
                importance: None,
                agent_id,
            },
        )?
        .into_progress()
    }

    /// Insights for a context, creation time ascending.
    pub fn list_insights(
        &self,
        level: ContextLevel,
        context_id: &str,
        query: &AnnotationQuery,
    ) -> Result<Vec<InsightEntry>> {
        let conn = self.conn()?;
        AnnotationRepo::list(
            &conn,
            "insight",
            level.as_sql(),
            context_id,
            &AnnotationFilter {
                category: query.category.as_deref(),
                agent_id: query.agent_id.as_deref(),
                limit: query.limit,
            },
        )?
        .into_iter()
        .map(crate::sqlite::row_types::AnnotationRow::into_insight)
        .collect()
    }

    /// Progress notes for a context, creation time ascending.
    pub fn list_progress(
        &self,
        level: ContextLevel,
        context_id: &str,
        query: &AnnotationQuery,
    ) -> Result<Vec<ProgressEntry>> {
        let conn = self.conn()?;
        AnnotationRepo::list(
            &conn,
            "progress",
            level.as_sql(),
            context_id,
            &AnnotationFilter {
                category: None,
                agent_id: query.agent_id.as_deref(),
                limit: query.limit,
            },
        )?
        .into_iter()
        .map(crate::sqlite::row_types::AnnotationRow::into_progress)
        .collect()
    }
}

/// Full ref set computed for a validated write.
struct ResolvedRefs {
    owner_id: String,
    project_id: Option<String>,
    branch_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn open_store() -> (tempfile::TempDir, ContextStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(&dir.path().join("strata.db"), 4).unwrap();
        (dir, store)
    }

    /// Seeds GLOBAL(U1) → PROJECT(P1) → BRANCH(B1) → TASK(T1).
    fn seed_chain(store: &ContextStore) {
        store
            .put(ContextLevel::Global, "U1", obj(json!({"theme": "dark"})), &ContextRefs::default())
            .unwrap();
        store
            .put(
                ContextLevel::Project,
                "P1",
                obj(json!({"theme": "light", "stack": ["Go"]})),
                &ContextRefs::owner("U1"),
            )
            .unwrap();
        store
            .put(ContextLevel::Branch, "B1", Map::new(), &ContextRefs::project("P1"))
            .unwrap();
        store
            .put(
                ContextLevel::Task,
                "T1",
                obj(json!({"progress": 50})),
                &ContextRefs::branch("B1"),
            )
            .unwrap();
    }

    #[test]
    fn put_inherits_grandparent_refs() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        let task = store.get(ContextLevel::Task, "T1").unwrap();
        assert_eq!(task.owner_id, "U1");
        assert_eq!(task.project_id.as_deref(), Some("P1"));
        assert_eq!(task.branch_id.as_deref(), Some("B1"));
    }

    #[test]
    fn put_without_parent_fails_closed() {
        let (_dir, store) = open_store();

        assert_matches!(
            store.put(
                ContextLevel::Project,
                "P1",
                Map::new(),
                &ContextRefs::owner("U404"),
            ),
            Err(StoreError::ParentNotFound { .. })
        );
        // Nothing was written.
        assert!(!store.exists(ContextLevel::Project, "P1").unwrap());
    }

    #[test]
    fn put_without_required_ref_is_rejected() {
        let (_dir, store) = open_store();
        store
            .put(ContextLevel::Global, "U1", Map::new(), &ContextRefs::default())
            .unwrap();

        assert_matches!(
            store.put(ContextLevel::Project, "P1", Map::new(), &ContextRefs::default()),
            Err(StoreError::MissingParentRef { missing: "ownerId", .. })
        );
    }

    #[test]
    fn global_owner_is_context_id() {
        let (_dir, store) = open_store();
        let record = store
            .put(ContextLevel::Global, "U1", Map::new(), &ContextRefs::default())
            .unwrap();
        assert_eq!(record.owner_id, "U1");
    }

    #[test]
    fn merge_data_overlay_wins() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        let merged = store
            .merge_data(
                ContextLevel::Project,
                "P1",
                &obj(json!({"stack": ["Go", "Postgres"]})),
                true,
            )
            .unwrap();
        assert_eq!(merged.data["stack"], json!(["Go", "Postgres"]));
        assert_eq!(merged.data["theme"], "light");
    }

    #[test]
    fn strict_merge_conflict_leaves_target_untouched() {
        let (_dir, store) = open_store();
        seed_chain(&store);
        store
            .merge_data(ContextLevel::Project, "P1", &obj(json!({"cfg": {"a": 1}})), true)
            .unwrap();

        assert_matches!(
            store.merge_data(ContextLevel::Project, "P1", &obj(json!({"cfg": 7})), true),
            Err(StoreError::MergeConflict(_))
        );
        let record = store.get(ContextLevel::Project, "P1").unwrap();
        assert_eq!(record.data["cfg"], json!({"a": 1}));
    }

    #[test]
    fn delete_is_not_cascading() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        store.delete(ContextLevel::Project, "P1").unwrap();
        assert!(store.exists(ContextLevel::Branch, "B1").unwrap());
        assert_matches!(
            store.get(ContextLevel::Project, "P1"),
            Err(StoreError::ContextNotFound { .. })
        );
    }

    #[test]
    fn list_by_owner() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        let projects = store
            .list(
                ContextLevel::Project,
                &ListFilter {
                    owner_id: Some("U1".into()),
                    ..ListFilter::default()
                },
            )
            .unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].context_id, "P1");
    }

    #[test]
    fn invalidation_hook_fires_synchronously() {
        struct Counter(AtomicUsize);
        impl InvalidationHook for Counter {
            fn invalidate(&self, _level: ContextLevel, _context_id: &str) {
                let _ = self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_dir, store) = open_store();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        store.set_invalidation_hook(Arc::clone(&counter) as Arc<dyn InvalidationHook>);

        store
            .put(ContextLevel::Global, "U1", Map::new(), &ContextRefs::default())
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        store
            .merge_data(ContextLevel::Global, "U1", &obj(json!({"a": 1})), false)
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        store.delete(ContextLevel::Global, "U1").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_put_does_not_invalidate() {
        struct Counter(AtomicUsize);
        impl InvalidationHook for Counter {
            fn invalidate(&self, _level: ContextLevel, _context_id: &str) {
                let _ = self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_dir, store) = open_store();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        store.set_invalidation_hook(Arc::clone(&counter) as Arc<dyn InvalidationHook>);

        let _ = store.put(
            ContextLevel::Task,
            "T1",
            Map::new(),
            &ContextRefs::branch("B404"),
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn annotations_require_existing_context() {
        let (_dir, store) = open_store();
        assert_matches!(
            store.append_insight(ContextLevel::Task, "T404", "x", None, None, None),
            Err(StoreError::ContextNotFound { .. })
        );
    }

    #[test]
    fn insight_round_trip_with_filters() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        store
            .append_insight(
                ContextLevel::Branch,
                "B1",
                "integration tests need a live db",
                Some("testing"),
                Some(7),
                Some("agent-1"),
            )
            .unwrap();
        store
            .append_insight(ContextLevel::Branch, "B1", "use feature flags", Some("tooling"), None, None)
            .unwrap();

        let testing = store
            .list_insights(
                ContextLevel::Branch,
                "B1",
                &AnnotationQuery {
                    category: Some("testing".into()),
                    ..AnnotationQuery::default()
                },
            )
            .unwrap();
        assert_eq!(testing.len(), 1);
        assert_eq!(testing[0].importance, Some(7));
    }

    #[test]
    fn delegation_audit_round_trip() {
        let (_dir, store) = open_store();
        seed_chain(&store);

        let entry = store
            .enqueue_delegation(
                ContextLevel::Branch,
                "B1",
                ContextLevel::Project,
                &obj(json!({"stack": ["Go", "Postgres"]})),
                "shared tooling",
            )
            .unwrap();
        assert_eq!(entry.status, strata_core::types::DelegationStatus::Pending);

        store.mark_delegation_applied(&entry.id, "P1").unwrap();
        let applied = store.get_delegation(&entry.id).unwrap();
        assert_eq!(applied.status, strata_core::types::DelegationStatus::Applied);
        assert_eq!(applied.target_id.as_deref(), Some("P1"));

        let history = store.delegations_for(ContextLevel::Branch, "B1").unwrap();
        assert_eq!(history.len(), 1);
    }
}
