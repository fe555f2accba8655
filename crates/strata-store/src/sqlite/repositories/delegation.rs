//! Delegation repository — append-only audit log in the `delegations` table.
//!
//! Entries are inserted PENDING and only ever move to APPLIED or FAILED
//! (by the queue worker). Rows are never deleted.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::{Result, StoreError};
use crate::sqlite::row_types::DelegationRow;

const SELECT_COLUMNS: &str = "id, source_level, source_id, target_level, target_id, payload, \
                              reason, status, error, created_at, applied_at";

/// Options for inserting a new (PENDING) delegation entry.
pub struct InsertDelegationOptions<'a> {
    /// Source level (SQL string form).
    pub source_level: &'a str,
    /// Source context id.
    pub source_id: &'a str,
    /// Target level (SQL string form).
    pub target_level: &'a str,
    /// Serialized JSON payload object.
    pub payload: &'a str,
    /// Caller-supplied reason.
    pub reason: &'a str,
}

/// Delegation repository — stateless, every method takes `&Connection`.
pub struct DelegationRepo;

impl DelegationRepo {
    /// Insert a new PENDING entry.
    pub fn insert(conn: &Connection, opts: &InsertDelegationOptions<'_>) -> Result<DelegationRow> {
        let id = format!("del_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO delegations (id, source_level, source_id, target_level, payload, reason, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![
                id,
                opts.source_level,
                opts.source_id,
                opts.target_level,
                opts.payload,
                opts.reason,
                now
            ],
        )?;
        Ok(DelegationRow {
            id,
            source_level: opts.source_level.to_string(),
            source_id: opts.source_id.to_string(),
            target_level: opts.target_level.to_string(),
            target_id: None,
            payload: opts.payload.to_string(),
            reason: opts.reason.to_string(),
            status: "pending".into(),
            error: None,
            created_at: now,
            applied_at: None,
        })
    }

    /// Get an entry by id.
    pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<DelegationRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM delegations WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mark an entry APPLIED, recording the concrete target id.
    pub fn mark_applied(conn: &Connection, id: &str, target_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE delegations SET status = 'applied', target_id = ?1, applied_at = ?2, error = NULL
             WHERE id = ?3 AND status = 'pending'",
            params![target_id, now, id],
        )?;
        if changed == 0 {
            return Err(StoreError::DelegationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Mark an entry FAILED with a diagnostic, keeping it for audit.
    pub fn mark_failed(
        conn: &Connection,
        id: &str,
        target_id: Option<&str>,
        error: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE delegations SET status = 'failed', target_id = ?1, applied_at = ?2, error = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![target_id, now, error, id],
        )?;
        if changed == 0 {
            return Err(StoreError::DelegationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// PENDING entries in enqueue order. UUID v7 ids sort by creation time,
    /// so ordering by id alone is enqueue order and `after_id` works as a
    /// keyset cursor for paging through a large backlog.
    pub fn list_pending(
        conn: &Connection,
        after_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DelegationRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM delegations
             WHERE status = 'pending' AND (?1 IS NULL OR id > ?1)
             ORDER BY id ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![after_id, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All entries originating from a (level, context id), oldest first.
    pub fn list_by_source(
        conn: &Connection,
        source_level: &str,
        source_id: &str,
    ) -> Result<Vec<DelegationRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM delegations
             WHERE source_level = ?1 AND source_id = ?2
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![source_level, source_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total number of entries (the audit log is monotonically non-decreasing).
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM delegations", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DelegationRow> {
        Ok(DelegationRow {
            id: row.get(0)?,
            source_level: row.get(1)?,
            source_id: row.get(2)?,
            target_level: row.get(3)?,
            target_id: row.get(4)?,
            payload: row.get(5)?,
            reason: row.get(6)?,
            status: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
            applied_at: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
