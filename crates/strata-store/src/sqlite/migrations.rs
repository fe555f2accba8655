//! Versioned, idempotent schema migrations.
//!
//! Applied versions are tracked in `schema_migrations`; each migration
//! runs at most once, inside its own transaction.

use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;

/// One migration step.
struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE contexts (
            level       TEXT NOT NULL CHECK (level IN ('global', 'project', 'branch', 'task')),
            context_id  TEXT NOT NULL,
            owner_id    TEXT NOT NULL,
            project_id  TEXT,
            branch_id   TEXT,
            data        TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (level, context_id)
        );
        CREATE INDEX idx_contexts_owner ON contexts(owner_id, level);
        CREATE INDEX idx_contexts_project ON contexts(project_id) WHERE project_id IS NOT NULL;
        CREATE INDEX idx_contexts_branch ON contexts(branch_id) WHERE branch_id IS NOT NULL;

        CREATE TABLE delegations (
            id           TEXT PRIMARY KEY,
            source_level TEXT NOT NULL CHECK (source_level IN ('project', 'branch', 'task')),
            source_id    TEXT NOT NULL,
            target_level TEXT NOT NULL CHECK (target_level IN ('global', 'project', 'branch')),
            target_id    TEXT,
            payload      TEXT NOT NULL DEFAULT '{}',
            reason       TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending', 'applied', 'failed')),
            error        TEXT,
            created_at   TEXT NOT NULL,
            applied_at   TEXT
        );
        CREATE INDEX idx_delegations_status ON delegations(status, created_at);
        CREATE INDEX idx_delegations_source ON delegations(source_level, source_id);

        CREATE TABLE annotations (
            id         TEXT PRIMARY KEY,
            kind       TEXT NOT NULL CHECK (kind IN ('insight', 'progress')),
            level      TEXT NOT NULL CHECK (level IN ('global', 'project', 'branch', 'task')),
            context_id TEXT NOT NULL,
            content    TEXT NOT NULL,
            category   TEXT,
            importance INTEGER CHECK (importance BETWEEN 1 AND 10),
            agent_id   TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_annotations_context ON annotations(kind, level, context_id, created_at);
    ",
}];

/// Run all pending migrations on the given connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let _ = conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        let _ = tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!(version = migration.version, "schema migration applied");
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
