//! Raw row structs as they come out of `SQLite`, plus conversions into the
//! core domain types.
//!
//! Rows keep `level`/`status` as TEXT and `data`/`payload` as JSON TEXT;
//! conversion parses both and fails loudly on corrupt rows rather than
//! silently degrading.

use serde_json::{Map, Value};
use strata_core::level::ContextLevel;
use strata_core::types::{
    ContextRecord, DelegationEntry, DelegationStatus, InsightEntry, ProgressEntry,
};

use crate::errors::{Result, StoreError};

/// A `contexts` table row.
#[derive(Clone, Debug)]
pub struct ContextRow {
    /// Level column (TEXT).
    pub level: String,
    /// Context id.
    pub context_id: String,
    /// Owner id.
    pub owner_id: String,
    /// Project ref.
    pub project_id: Option<String>,
    /// Branch ref.
    pub branch_id: Option<String>,
    /// JSON TEXT payload.
    pub data: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 update time.
    pub updated_at: String,
}

impl ContextRow {
    /// Parse into a domain record.
    pub fn into_record(self) -> Result<ContextRecord> {
        let level: ContextLevel = self
            .level
            .parse()
            .map_err(|e| StoreError::Internal(format!("corrupt contexts row: {e}")))?;
        Ok(ContextRecord {
            level,
            context_id: self.context_id,
            owner_id: self.owner_id,
            project_id: self.project_id,
            branch_id: self.branch_id,
            data: parse_object(&self.data)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A `delegations` table row.
#[derive(Clone, Debug)]
pub struct DelegationRow {
    /// Entry id.
    pub id: String,
    /// Source level (TEXT).
    pub source_level: String,
    /// Source context id.
    pub source_id: String,
    /// Target level (TEXT).
    pub target_level: String,
    /// Concrete target id once resolved.
    pub target_id: Option<String>,
    /// JSON TEXT payload.
    pub payload: String,
    /// Caller-supplied reason.
    pub reason: String,
    /// Status column (TEXT).
    pub status: String,
    /// Failure detail.
    pub error: Option<String>,
    /// RFC 3339 enqueue time.
    pub created_at: String,
    /// RFC 3339 apply/fail time.
    pub applied_at: Option<String>,
}

impl DelegationRow {
    /// Parse into a domain entry.
    pub fn into_entry(self) -> Result<DelegationEntry> {
        let source_level: ContextLevel = self
            .source_level
            .parse()
            .map_err(|e| StoreError::Internal(format!("corrupt delegations row: {e}")))?;
        let target_level: ContextLevel = self
            .target_level
            .parse()
            .map_err(|e| StoreError::Internal(format!("corrupt delegations row: {e}")))?;
        let status = match self.status.as_str() {
            "pending" => DelegationStatus::Pending,
            "applied" => DelegationStatus::Applied,
            "failed" => DelegationStatus::Failed,
            other => {
                return Err(StoreError::Internal(format!(
                    "corrupt delegations row: unknown status {other:?}"
                )));
            }
        };
        Ok(DelegationEntry {
            id: self.id,
            source_level,
            source_id: self.source_id,
            target_level,
            target_id: self.target_id,
            payload: parse_object(&self.payload)?,
            reason: self.reason,
            status,
            error: self.error,
            created_at: self.created_at,
            applied_at: self.applied_at,
        })
    }
}

/// An `annotations` table row (insights and progress share the table).
#[derive(Clone, Debug)]
pub struct AnnotationRow {
    /// Entry id.
    pub id: String,
    /// Discriminator: "insight" or "progress".
    pub kind: String,
    /// Level column (TEXT).
    pub level: String,
    /// Annotated context id.
    pub context_id: String,
    /// Annotation text.
    pub content: String,
    /// Optional category (insights only).
    pub category: Option<String>,
    /// Optional importance 1–10 (insights only).
    pub importance: Option<i64>,
    /// Optional recording agent.
    pub agent_id: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl AnnotationRow {
    fn parsed_level(&self) -> Result<ContextLevel> {
        self.level
            .parse()
            .map_err(|e| StoreError::Internal(format!("corrupt annotations row: {e}")))
    }

    /// Parse into an insight entry.
    pub fn into_insight(self) -> Result<InsightEntry> {
        let level = self.parsed_level()?;
        Ok(InsightEntry {
            id: self.id,
            level,
            context_id: self.context_id,
            content: self.content,
            category: self.category,
            importance: self.importance.map(|i| i as u8),
            agent_id: self.agent_id,
            created_at: self.created_at,
        })
    }

    /// Parse into a progress entry.
    pub fn into_progress(self) -> Result<ProgressEntry> {
        let level = self.parsed_level()?;
        Ok(ProgressEntry {
            id: self.id,
            level,
            context_id: self.context_id,
            content: self.content,
            agent_id: self.agent_id,
            created_at: self.created_at,
        })
    }
}

/// Parse a JSON TEXT column that must hold an object.
fn parse_object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Internal(format!(
            "expected JSON object in data column, got {}",
            strata_core::merge::json_kind(&other)
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn context_row_parses() {
        let row = ContextRow {
            level: "task".into(),
            context_id: "T1".into(),
            owner_id: "U1".into(),
            project_id: Some("P1".into()),
            branch_id: Some("B1".into()),
            data: r#"{"progress": 50}"#.into(),
            created_at: "2026-02-01T10:00:00Z".into(),
            updated_at: "2026-02-01T10:00:00Z".into(),
        };
        let record = row.into_record().unwrap();
        assert_eq!(record.level, ContextLevel::Task);
        assert_eq!(record.data["progress"], 50);
    }

    #[test]
    fn corrupt_level_is_internal_error() {
        let row = ContextRow {
            level: "galaxy".into(),
            context_id: "X".into(),
            owner_id: "U1".into(),
            project_id: None,
            branch_id: None,
            data: "{}".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_matches!(row.into_record(), Err(StoreError::Internal(_)));
    }

    #[test]
    fn non_object_data_is_internal_error() {
        let row = ContextRow {
            level: "global".into(),
            context_id: "U1".into(),
            owner_id: "U1".into(),
            project_id: None,
            branch_id: None,
            data: "[1, 2]".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_matches!(row.into_record(), Err(StoreError::Internal(_)));
    }
}
