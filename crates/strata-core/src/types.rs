//! Persisted and ephemeral record types for the context engine.
//!
//! Records are flat structs with the dynamic per-level payload stored as an
//! opaque `serde_json` object map. All serializable types use `camelCase`
//! for wire compatibility with the transport layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::{ContextKey, ContextLevel};

// ─────────────────────────────────────────────────────────────────────────────
// Context records
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-supplied ancestor references for a `put`.
///
/// Only the immediate parent ref is required at each level (`owner_id` for
/// PROJECT, `project_id` for BRANCH, `branch_id` for TASK); the store
/// fills in the grandparent refs from the parent row so every persisted
/// row carries the full chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRefs {
    /// Owning user id. Required for GLOBAL and PROJECT writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Parent project id. Required for BRANCH writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Parent branch id. Required for TASK writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

impl ContextRefs {
    /// Refs naming just an owner.
    #[must_use]
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    /// Refs naming just a parent project.
    #[must_use]
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    /// Refs naming just a parent branch.
    #[must_use]
    pub fn branch(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: Some(branch_id.into()),
            ..Self::default()
        }
    }
}

/// A persisted context record — exactly one per (level, context id).
///
/// Rows are flat: ancestor foreign keys live beside the payload so the
/// chain derives from the row alone, without a lookup table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Hierarchy level.
    pub level: ContextLevel,
    /// Level-scoped context id (user id for GLOBAL, project id for
    /// PROJECT, and so on).
    pub context_id: String,
    /// Owning user id. For GLOBAL rows this equals `context_id`.
    pub owner_id: String,
    /// Ancestor project id (set on BRANCH and TASK rows).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Ancestor branch id (set on TASK rows).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Dynamic per-level payload (opaque JSON object).
    pub data: Map<String, Value>,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// ISO 8601 last-update time.
    pub updated_at: String,
}

impl ContextRecord {
    /// The addressing key for this record.
    #[must_use]
    pub fn key(&self) -> ContextKey {
        ContextKey::new(self.level, self.context_id.clone())
    }

    /// The immediate parent key, derived from the ref columns.
    ///
    /// `None` for GLOBAL rows, and for malformed rows missing the ref
    /// their level requires (the resolver treats those ancestors as
    /// absent rather than failing the read path).
    #[must_use]
    pub fn parent_key(&self) -> Option<ContextKey> {
        self.level
            .parent()
            .and_then(|parent_level| self.ancestor_key(parent_level))
    }

    /// The ancestor key at `ancestor_level`, derived from the ref columns.
    ///
    /// Returns `None` when `ancestor_level` is not a proper ancestor of
    /// this record's level or the corresponding ref is missing.
    #[must_use]
    pub fn ancestor_key(&self, ancestor_level: ContextLevel) -> Option<ContextKey> {
        if !ancestor_level.is_ancestor_of(self.level) {
            return None;
        }
        let id = match ancestor_level {
            ContextLevel::Global => Some(&self.owner_id),
            ContextLevel::Project => self.project_id.as_ref(),
            ContextLevel::Branch => self.branch_id.as_ref(),
            ContextLevel::Task => None,
        };
        id.map(|id| ContextKey::new(ancestor_level, id.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved views
// ─────────────────────────────────────────────────────────────────────────────

/// The deep-merged view of a context and all its ancestors.
///
/// Ephemeral — lives only in the resolution cache and API responses, never
/// persisted. `merged` is `GLOBAL ⊕ PROJECT ⊕ BRANCH ⊕ TASK` in that
/// order, later levels overriding earlier ones per key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    /// Context id of the resolution target.
    pub context_id: String,
    /// Level of the resolution target.
    pub level: ContextLevel,
    /// The target's own raw data (pre-merge).
    pub own_data: Map<String, Value>,
    /// Per-level raw contributions, keyed by level in chain order.
    /// Levels whose record is absent contribute an empty map.
    pub inherited_by_level: BTreeMap<ContextLevel, Map<String, Value>>,
    /// The merged result, most specific level winning.
    pub merged: Map<String, Value>,
    /// ISO 8601 computation time.
    pub computed_at: String,
}

impl ResolvedView {
    /// The addressing key for this view.
    #[must_use]
    pub fn key(&self) -> ContextKey {
        ContextKey::new(self.level, self.context_id.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegation
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a delegation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    /// Durably enqueued, not yet applied.
    Pending,
    /// Payload merged into the target.
    Applied,
    /// Apply failed; `error` on the entry says why.
    Failed,
}

impl DelegationStatus {
    /// Whether this status is terminal (the worker is done with it).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    /// SQL string representation (matches the CHECK constraint values).
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// An audited, asynchronous push of a data fragment from a descendant
/// context to an ancestor context.
///
/// Created by `delegate`; mutated only by the queue worker; never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationEntry {
    /// Unique entry id (`del_` + UUID v7).
    pub id: String,
    /// Level the fragment originates from.
    pub source_level: ContextLevel,
    /// Context id the fragment originates from.
    pub source_id: String,
    /// Ancestor level the fragment is pushed to.
    pub target_level: ContextLevel,
    /// Concrete target context id, resolved by the worker at apply time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// The data fragment to merge into the target.
    pub payload: Map<String, Value>,
    /// Caller-supplied justification, kept for the audit trail.
    pub reason: String,
    /// Lifecycle status.
    pub status: DelegationStatus,
    /// Failure detail when `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 enqueue time.
    pub created_at: String,
    /// ISO 8601 apply/fail time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Annotations
// ─────────────────────────────────────────────────────────────────────────────

/// An append-only insight attached to a context.
///
/// Never mutated after creation; corrections are new entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightEntry {
    /// Unique entry id (`ins_` + UUID v7).
    pub id: String,
    /// Level of the annotated context.
    pub level: ContextLevel,
    /// Id of the annotated context.
    pub context_id: String,
    /// Insight text.
    pub content: String,
    /// Free-form category tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Importance, 1 (low) to 10 (high).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<u8>,
    /// Agent that recorded the insight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// ISO 8601 creation time.
    pub created_at: String,
}

/// An append-only progress note attached to a context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    /// Unique entry id (`prg_` + UUID v7).
    pub id: String,
    /// Level of the annotated context.
    pub level: ContextLevel,
    /// Id of the annotated context.
    pub context_id: String,
    /// Progress text.
    pub content: String,
    /// Agent that recorded the note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// ISO 8601 creation time.
    pub created_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_record() -> ContextRecord {
        ContextRecord {
            level: ContextLevel::Task,
            context_id: "T1".into(),
            owner_id: "U1".into(),
            project_id: Some("P1".into()),
            branch_id: Some("B1".into()),
            data: Map::new(),
            created_at: "2026-02-01T10:00:00Z".into(),
            updated_at: "2026-02-01T10:00:00Z".into(),
        }
    }

    #[test]
    fn parent_key_derivation() {
        let task = task_record();
        assert_eq!(
            task.parent_key(),
            Some(ContextKey::new(ContextLevel::Branch, "B1"))
        );

        let mut global = task_record();
        global.level = ContextLevel::Global;
        global.context_id = "U1".into();
        assert_eq!(global.parent_key(), None);
    }

    #[test]
    fn ancestor_key_derivation() {
        let task = task_record();
        assert_eq!(
            task.ancestor_key(ContextLevel::Project),
            Some(ContextKey::new(ContextLevel::Project, "P1"))
        );
        assert_eq!(
            task.ancestor_key(ContextLevel::Global),
            Some(ContextKey::new(ContextLevel::Global, "U1"))
        );
        // Not a proper ancestor of itself.
        assert_eq!(task.ancestor_key(ContextLevel::Task), None);
    }

    #[test]
    fn record_serde_round_trip() {
        let mut record = task_record();
        record.data = match json!({"progress": 50}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ContextRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn record_wire_names_are_camel_case() {
        let record = task_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["contextId"], "T1");
        assert_eq!(json["ownerId"], "U1");
        assert_eq!(json["branchId"], "B1");
        assert_eq!(json["createdAt"], "2026-02-01T10:00:00Z");
    }

    #[test]
    fn delegation_status_terminal() {
        assert!(!DelegationStatus::Pending.is_terminal());
        assert!(DelegationStatus::Applied.is_terminal());
        assert!(DelegationStatus::Failed.is_terminal());
    }

    #[test]
    fn insight_optional_fields_omitted() {
        let entry = InsightEntry {
            id: "ins_1".into(),
            level: ContextLevel::Branch,
            context_id: "B1".into(),
            content: "uses vitest".into(),
            category: None,
            importance: None,
            agent_id: None,
            created_at: "2026-02-01T10:00:00Z".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("category").is_none());
        assert!(json.get("importance").is_none());
    }
}
