//! Annotation repository — append-only insights and progress notes.
//!
//! Both kinds share the `annotations` table, discriminated by `kind`.
//! There is no update or delete: corrections are modeled as new entries.

use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::sqlite::row_types::AnnotationRow;

const SELECT_COLUMNS: &str =
    "id, kind, level, context_id, content, category, importance, agent_id, created_at";

/// Options for appending an annotation.
pub struct AppendAnnotationOptions<'a> {
    /// "insight" or "progress".
    pub kind: &'a str,
    /// Level of the annotated context (SQL string form).
    pub level: &'a str,
    /// Id of the annotated context.
    pub context_id: &'a str,
    /// Annotation text.
    pub content: &'a str,
    /// Optional category tag (insights).
    pub category: Option<&'a str>,
    /// Optional importance 1–10 (insights).
    pub importance: Option<u8>,
    /// Optional recording agent.
    pub agent_id: Option<&'a str>,
}

/// Filters for listing annotations.
#[derive(Default)]
pub struct AnnotationFilter<'a> {
    /// Only this category.
    pub category: Option<&'a str>,
    /// Only this agent.
    pub agent_id: Option<&'a str>,
    /// At most this many entries.
    pub limit: Option<u32>,
}

/// Annotation repository — stateless, every method takes `&Connection`.
pub struct AnnotationRepo;

impl AnnotationRepo {
    /// Append an annotation. Pure insert; rows are immutable afterwards.
    pub fn append(conn: &Connection, opts: &AppendAnnotationOptions<'_>) -> Result<AnnotationRow> {
        let prefix = if opts.kind == "progress" { "prg" } else { "ins" };
        let id = format!("{prefix}_{}", Uuid::now_v7());
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO annotations (id, kind, level, context_id, content, category, importance, agent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                opts.kind,
                opts.level,
                opts.context_id,
                opts.content,
                opts.category,
                opts.importance,
                opts.agent_id,
                now
            ],
        )?;
        Ok(AnnotationRow {
            id,
            kind: opts.kind.to_string(),
            level: opts.level.to_string(),
            context_id: opts.context_id.to_string(),
            content: opts.content.to_string(),
            category: opts.category.map(String::from),
            importance: opts.importance.map(i64::from),
            agent_id: opts.agent_id.map(String::from),
            created_at: now,
        })
    }

    /// List annotations for a context, creation time ascending.
    pub fn list(
        conn: &Connection,
        kind: &str,
        level: &str,
        context_id: &str,
        filter: &AnnotationFilter<'_>,
    ) -> Result<Vec<AnnotationRow>> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM annotations
             WHERE kind = ?1 AND level = ?2 AND context_id = ?3"
        );
        let mut bind: Vec<&str> = vec![kind, level, context_id];
        if let Some(category) = filter.category {
            bind.push(category);
            sql.push_str(&format!(" AND category = ?{}", bind.len()));
        }
        if let Some(agent_id) = filter.agent_id {
            bind.push(agent_id);
            sql.push_str(&format!(" AND agent_id = ?{}", bind.len()));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count annotations of a kind for a context.
    pub fn count(conn: &Connection, kind: &str, level: &str, context_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM annotations WHERE kind = ?1 AND level = ?2 AND context_id = ?3",
            params![kind, level, context_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnnotationRow> {
        Ok(AnnotationRow {
            id: row.get(0)?,
            kind: row.get(1)?,
            level: row.get(2)?,
            context_id: row.get(3)?,
            content: row.get(4)?,
            category: row.get(5)?,
            importance: row.get(6)?,
            agent_id: row.get(7)?,
            created_at: row.get(8)?,
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

    fn append_insight(conn: &Connection, content: &str, category: Option<&str>) -> AnnotationRow {
        AnnotationRepo::append(
            conn,
            &AppendAnnotationOptions {
                kind: "insight",
                level: "branch",
                context_id: "B1",
                content,
                category,
                importance: Some(5),
                agent_id: Some("agent-1"),
            },
        )
        .unwrap()
    }

    #[test]
    fn append_assigns_prefixed_ids() {
        let conn = setup();
        let insight = append_insight(&conn, "uses vitest", None);
        assert!(insight.id.starts_with("ins_"));

        let progress = AnnotationRepo::append(
            &conn,
            &AppendAnnotationOptions {
                kind: "progress",
                level: "task",
                context_id: "T1",
                content: "half done",
                category: None,
                importance: None,
                agent_id: None,
            },
        )
        .unwrap();
        assert!(progress.id.starts_with("prg_"));
    }

    #[test]
    fn list_is_creation_ordered() {
        let conn = setup();
        let first = append_insight(&conn, "first", None);
        let second = append_insight(&conn, "second", None);

        let listed = AnnotationRepo::list(
            &conn,
            "insight",
            "branch",
            "B1",
            &AnnotationFilter::default(),
        )
        .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[test]
    fn category_and_agent_filters() {
        let conn = setup();
        append_insight(&conn, "a", Some("tooling"));
        append_insight(&conn, "b", Some("testing"));

        let tooling = AnnotationRepo::list(
            &conn,
            "insight",
            "branch",
            "B1",
            &AnnotationFilter {
                category: Some("tooling"),
                ..AnnotationFilter::default()
            },
        )
        .unwrap();
        assert_eq!(tooling.len(), 1);
        assert_eq!(tooling[0].content, "a");

        let other_agent = AnnotationRepo::list(
            &conn,
            "insight",
            "branch",
            "B1",
            &AnnotationFilter {
                agent_id: Some("agent-2"),
                ..AnnotationFilter::default()
            },
        )
        .unwrap();
        assert!(other_agent.is_empty());
    }

    #[test]
    fn kinds_are_disjoint() {
        let conn = setup();
        append_insight(&conn, "insight text", None);

        let progress = AnnotationRepo::list(
            &conn,
            "progress",
            "branch",
            "B1",
            &AnnotationFilter::default(),
        )
        .unwrap();
        assert!(progress.is_empty());
        assert_eq!(AnnotationRepo::count(&conn, "insight", "branch", "B1").unwrap(), 1);
    }
}
