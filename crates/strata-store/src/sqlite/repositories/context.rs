//! Context repository — CRUD for the `contexts` table.
//!
//! One row per (level, context id). Ancestor foreign keys are stored
//! denormalized on every row so the inheritance chain derives from the
//! row alone.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::ContextRow;

const SELECT_COLUMNS: &str =
    "level, context_id, owner_id, project_id, branch_id, data, created_at, updated_at";

/// Column values for an upsert.
pub struct UpsertContextOptions<'a> {
    /// Hierarchy level (SQL string form).
    pub level: &'a str,
    /// Context id.
    pub context_id: &'a str,
    /// Owner id (always set; equals `context_id` for GLOBAL rows).
    pub owner_id: &'a str,
    /// Ancestor project id.
    pub project_id: Option<&'a str>,
    /// Ancestor branch id.
    pub branch_id: Option<&'a str>,
    /// Serialized JSON object.
    pub data: &'a str,
}

/// Context repository — stateless, every method takes `&Connection`.
pub struct ContextRepo;

impl ContextRepo {
    /// Insert or replace the row for (level, context id).
    ///
    /// `created_at` survives an update; `updated_at` always moves.
    pub fn upsert(conn: &Connection, opts: &UpsertContextOptions<'_>) -> Result<ContextRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO contexts (level, context_id, owner_id, project_id, branch_id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (level, context_id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 project_id = excluded.project_id,
                 branch_id = excluded.branch_id,
                 data = excluded.data,
                 updated_at = excluded.updated_at",
            params![
                opts.level,
                opts.context_id,
                opts.owner_id,
                opts.project_id,
                opts.branch_id,
                opts.data,
                now
            ],
        )?;
        Self::get(conn, opts.level, opts.context_id)?.ok_or_else(|| {
            crate::errors::StoreError::Internal("upserted context row vanished".into())
        })
    }

    /// Get the row for (level, context id).
    pub fn get(conn: &Connection, level: &str, context_id: &str) -> Result<Option<ContextRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM contexts WHERE level = ?1 AND context_id = ?2"),
                params![level, context_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Whether a row exists for (level, context id).
    pub fn exists(conn: &Connection, level: &str, context_id: &str) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM contexts WHERE level = ?1 AND context_id = ?2)",
            params![level, context_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Delete the row for (level, context id). Returns `true` if deleted.
    ///
    /// No cascade: children keep their rows (explicit design — deleting a
    /// parent must not silently destroy descendant data).
    pub fn delete(conn: &Connection, level: &str, context_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM contexts WHERE level = ?1 AND context_id = ?2",
            params![level, context_id],
        )?;
        Ok(changed > 0)
    }

    /// List rows at a level, optionally filtered by one ref column,
    /// ordered by creation time.
    pub fn list(
        conn: &Connection,
        level: &str,
        ref_column: Option<(&str, &str)>,
        limit: Option<u32>,
    ) -> Result<Vec<ContextRow>> {
        // ref_column names come from a fixed internal set, never callers.
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM contexts WHERE level = ?1");
        let mut bind: Vec<&str> = vec![level];
        if let Some((column, value)) = ref_column {
            debug_assert!(matches!(column, "owner_id" | "project_id" | "branch_id"));
            sql.push_str(&format!(" AND {column} = ?2"));
            bind.push(value);
        }
        sql.push_str(" ORDER BY created_at ASC, context_id ASC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRow> {
        Ok(ContextRow {
            level: row.get(0)?,
            context_id: row.get(1)?,
            owner_id: row.get(2)?,
            project_id: row.get(3)?,
            branch_id: row.get(4)?,
            data: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn upsert(conn: &Connection, level: &str, id: &str, owner: &str, data: &str) -> ContextRow {
        ContextRepo::upsert(
            conn,
            &UpsertContextOptions {
                level,
                context_id: id,
                owner_id: owner,
                project_id: None,
                branch_id: None,
                data,
            },
        )
        .unwrap()
    }

    #[test]
    fn upsert_then_get() {
        let conn = setup();
        upsert(&conn, "global", "U1", "U1", r#"{"theme":"dark"}"#);

        let row = ContextRepo::get(&conn, "global", "U1").unwrap().unwrap();
        assert_eq!(row.owner_id, "U1");
        assert!(row.data.contains("dark"));
    }

    #[test]
    fn upsert_preserves_created_at() {
        let conn = setup();
        let first = upsert(&conn, "global", "U1", "U1", "{}");
        let second = upsert(&conn, "global", "U1", "U1", r#"{"a":1}"#);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.data.contains("a"));
    }

    #[test]
    fn one_row_per_level_and_id() {
        let conn = setup();
        upsert(&conn, "global", "U1", "U1", "{}");
        upsert(&conn, "global", "U1", "U1", "{}");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM contexts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn delete_does_not_cascade() {
        let conn = setup();
        upsert(&conn, "global", "U1", "U1", "{}");
        ContextRepo::upsert(
            &conn,
            &UpsertContextOptions {
                level: "project",
                context_id: "P1",
                owner_id: "U1",
                project_id: None,
                branch_id: None,
                data: "{}",
            },
        )
        .unwrap();

        assert!(ContextRepo::delete(&conn, "global", "U1").unwrap());
        // Child row survives the parent delete.
        assert!(ContextRepo::exists(&conn, "project", "P1").unwrap());
    }

    #[test]
    fn list_filters_by_ref_column() {
        let conn = setup();
        for (id, owner) in [("P1", "U1"), ("P2", "U1"), ("P3", "U2")] {
            ContextRepo::upsert(
                &conn,
                &UpsertContextOptions {
                    level: "project",
                    context_id: id,
                    owner_id: owner,
                    project_id: None,
                    branch_id: None,
                    data: "{}",
                },
            )
            .unwrap();
        }

        let mine = ContextRepo::list(&conn, "project", Some(("owner_id", "U1")), None).unwrap();
        assert_eq!(mine.len(), 2);
        let all = ContextRepo::list(&conn, "project", None, None).unwrap();
        assert_eq!(all.len(), 3);
        let limited = ContextRepo::list(&conn, "project", None, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn missing_row_is_none() {
        let conn = setup();
        assert!(ContextRepo::get(&conn, "task", "T404").unwrap().is_none());
        assert!(!ContextRepo::exists(&conn, "task", "T404").unwrap());
        assert!(!ContextRepo::delete(&conn, "task", "T404").unwrap());
    }
}
