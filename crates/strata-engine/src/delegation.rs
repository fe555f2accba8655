//! Asynchronous, audited delegation of context data to ancestor levels.
//!
//! `delegate` is acknowledged as soon as the entry is durably PENDING;
//! a single background worker drains the bounded channel FIFO, which
//! serializes applications per target (and globally) — two payloads never
//! interleave on one record, and the store's per-key write lock guards
//! against concurrent direct updates to the same target.
//!
//! Backpressure is caller-visible: a full channel surfaces `QueueFull`
//! and persists nothing. Failures land on the entry (`status = failed`
//! plus an error string), never in a log only — entries are immutable
//! audit rows once terminal.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use strata_core::level::ContextLevel;
use strata_core::types::{DelegationEntry, DelegationStatus};
use strata_store::{ContextStore, StoreError};

use crate::errors::{EngineError, Result};
use crate::metrics::{
    DELEGATIONS_APPLIED_TOTAL, DELEGATIONS_ENQUEUED_TOTAL, DELEGATIONS_FAILED_TOTAL,
    DELEGATIONS_REJECTED_TOTAL,
};

/// Producer half: validates, persists, and enqueues delegation entries.
#[derive(Clone)]
pub struct DelegationQueue {
    store: Arc<ContextStore>,
    tx: mpsc::Sender<String>,
}

impl DelegationQueue {
    /// Build the queue and its worker half with the given channel capacity.
    #[must_use]
    pub fn new(store: Arc<ContextStore>, capacity: usize) -> (Self, DelegationWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                store: Arc::clone(&store),
                tx,
            },
            DelegationWorker { store, rx },
        )
    }

    /// Enqueue an upward delegation. Returns once the entry is durably
    /// PENDING; the merge happens asynchronously.
    ///
    /// A channel permit is reserved *before* the insert, so `QueueFull`
    /// rejections leave no orphaned PENDING rows behind.
    #[instrument(skip(self, payload), fields(source = %source_level, source_id, target = %target_level))]
    pub async fn delegate(
        &self,
        source_level: ContextLevel,
        source_id: &str,
        target_level: ContextLevel,
        payload: Map<String, Value>,
        reason: &str,
    ) -> Result<DelegationEntry> {
        if !target_level.is_ancestor_of(source_level) {
            return Err(EngineError::InvalidDelegationDirection {
                source_level,
                target_level,
            });
        }

        let permit = match self.tx.clone().try_reserve_owned() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!(DELEGATIONS_REJECTED_TOTAL).increment(1);
                warn!("delegation rejected: queue full");
                return Err(EngineError::QueueFull);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(EngineError::QueueClosed),
        };

        let store = Arc::clone(&self.store);
        let source_id_owned = source_id.to_string();
        let reason_owned = reason.to_string();
        let entry = tokio::task::spawn_blocking(move || {
            store.enqueue_delegation(
                source_level,
                &source_id_owned,
                target_level,
                &payload,
                &reason_owned,
            )
        })
        .await
        .map_err(|e| EngineError::Internal(format!("enqueue task panicked: {e}")))??;

        let _ = permit.send(entry.id.clone());
        counter!(DELEGATIONS_ENQUEUED_TOTAL).increment(1);
        debug!(delegation_id = %entry.id, "delegation enqueued");
        Ok(entry)
    }

    /// Re-enqueue PENDING entries left over from a previous run.
    ///
    /// Pages through the backlog `batch` rows at a time; keeps the "no
    /// entry stays PENDING indefinitely" property across restarts. The
    /// worker must already be draining: `send` waits for channel capacity,
    /// so a backlog larger than the channel only completes while entries
    /// are being consumed on the other end.
    pub async fn recover_pending(&self, batch: u32) -> Result<usize> {
        let mut recovered = 0usize;
        let mut cursor: Option<String> = None;
        loop {
            let store = Arc::clone(&self.store);
            let after = cursor.clone();
            let pending = tokio::task::spawn_blocking(move || {
                store.pending_delegations(after.as_deref(), batch)
            })
            .await
            .map_err(|e| EngineError::Internal(format!("recovery task panicked: {e}")))??;

            let fetched = pending.len();
            if fetched == 0 {
                break;
            }
            cursor = pending.last().map(|entry| entry.id.clone());
            for entry in pending {
                if self.tx.send(entry.id).await.is_err() {
                    return Err(EngineError::QueueClosed);
                }
            }
            recovered += fetched;
            if fetched < batch as usize {
                break;
            }
        }
        if recovered > 0 {
            info!(recovered, "re-enqueued pending delegations from previous run");
        }
        Ok(recovered)
    }
}

/// Consumer half: drains the channel and applies entries.
pub struct DelegationWorker {
    store: Arc<ContextStore>,
    rx: mpsc::Receiver<String>,
}

impl DelegationWorker {
    /// Spawn the worker loop. Ends when every `DelegationQueue` clone is
    /// dropped and the channel drains.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delegation_id) = self.rx.recv().await {
                let store = Arc::clone(&self.store);
                let id = delegation_id.clone();
                let outcome = tokio::task::spawn_blocking(move || apply_entry(&store, &id)).await;
                match outcome {
                    Ok(Ok(ApplyOutcome::Applied { target_id })) => {
                        counter!(DELEGATIONS_APPLIED_TOTAL).increment(1);
                        debug!(delegation_id, target_id, "delegation applied");
                    }
                    Ok(Ok(ApplyOutcome::Failed { error })) => {
                        counter!(DELEGATIONS_FAILED_TOTAL).increment(1);
                        debug!(delegation_id, error, "delegation marked failed");
                    }
                    Ok(Ok(ApplyOutcome::Skipped)) => {
                        debug!(delegation_id, "delegation already terminal, skipped");
                    }
                    Ok(Err(err)) => {
                        // Infrastructure failure (pool, disk): the entry
                        // stays PENDING and is retried by startup recovery.
                        error!(delegation_id, error = %err, "delegation apply hit store error");
                    }
                    Err(join_err) => {
                        error!(delegation_id, error = %join_err, "delegation apply task panicked");
                    }
                }
            }
            info!("delegation worker drained and stopped");
        })
    }
}

enum ApplyOutcome {
    Applied { target_id: String },
    Failed { error: String },
    Skipped,
}

/// Apply one entry: resolve the concrete target from the source row's
/// refs, strict-merge the payload (payload keys win), flip the status.
///
/// Domain failures (missing source/target, merge conflict) terminate the
/// entry as FAILED and are never silently dropped. Store/infrastructure
/// errors propagate so the entry stays PENDING for retry.
fn apply_entry(store: &ContextStore, delegation_id: &str) -> strata_store::Result<ApplyOutcome> {
    let entry = store.get_delegation(delegation_id)?;
    if entry.status != DelegationStatus::Pending {
        return Ok(ApplyOutcome::Skipped);
    }

    let fail = |target_id: Option<&str>, error: String| -> strata_store::Result<ApplyOutcome> {
        store.mark_delegation_failed(delegation_id, target_id, &error)?;
        Ok(ApplyOutcome::Failed { error })
    };

    // The source row names the target: BRANCH→PROJECT uses the branch's
    // project_id, anything→GLOBAL uses owner_id.
    let Some(source) = store.get_opt(entry.source_level, &entry.source_id)? else {
        return fail(
            None,
            format!(
                "source context {}:{} no longer exists",
                entry.source_level, entry.source_id
            ),
        );
    };
    let Some(target_key) = source.ancestor_key(entry.target_level) else {
        return fail(
            None,
            format!(
                "source row carries no {} reference",
                entry.target_level
            ),
        );
    };

    match store.merge_data(target_key.level, &target_key.context_id, &entry.payload, true) {
        Ok(_) => {
            store.mark_delegation_applied(delegation_id, &target_key.context_id)?;
            Ok(ApplyOutcome::Applied {
                target_id: target_key.context_id,
            })
        }
        Err(StoreError::ContextNotFound { .. }) => fail(
            Some(&target_key.context_id),
            format!("target context {target_key} not found"),
        ),
        Err(StoreError::MergeConflict(conflict)) => {
            fail(Some(&target_key.context_id), conflict.to_string())
        }
        Err(other) => Err(other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
