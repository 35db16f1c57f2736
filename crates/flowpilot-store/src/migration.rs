//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch tagged with a version number.  The
//! highest applied version is tracked in `_migrations`, so running the set
//! again is a no-op.  Timestamps are stored as fixed-width RFC 3339 text
//! (see [`crate::db`]).

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order.  Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "workflow core: triggers, executions, metrics, preferences",
        sql: r#"
            CREATE TABLE triggers (
                id            TEXT PRIMARY KEY,
                owner_id      TEXT NOT NULL,
                trigger_type  TEXT NOT NULL,
                config        TEXT NOT NULL,
                metadata      TEXT NOT NULL,
                active        BOOLEAN NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );
            CREATE INDEX idx_triggers_owner ON triggers(owner_id, trigger_type);
            CREATE INDEX idx_triggers_active ON triggers(active);

            CREATE TABLE workflow_executions (
                id                    TEXT PRIMARY KEY,
                owner_id              TEXT NOT NULL,
                workflow_id           TEXT NOT NULL,
                status                TEXT NOT NULL CHECK(status IN
                    ('pending','analyzing','suggesting','executing','completed','failed','cancelled')),
                started_at            TEXT NOT NULL,
                completed_at          TEXT,
                trigger_data          TEXT NOT NULL,
                analysis_data         TEXT NOT NULL,
                selected_suggestions  TEXT NOT NULL,
                executed_actions      TEXT NOT NULL,
                result                TEXT NOT NULL,
                error                 TEXT
            );
            CREATE INDEX idx_executions_workflow ON workflow_executions(workflow_id, started_at);
            CREATE INDEX idx_executions_owner ON workflow_executions(owner_id, started_at);

            CREATE TABLE workflow_metrics (
                workflow_id         TEXT PRIMARY KEY,
                execution_count     INTEGER NOT NULL DEFAULT 0,
                success_count       INTEGER NOT NULL DEFAULT 0,
                success_rate        REAL NOT NULL DEFAULT 0,
                avg_duration_ms     REAL NOT NULL DEFAULT 0,
                time_saved_minutes  REAL NOT NULL DEFAULT 0,
                last_executed       TEXT
            );

            CREATE TABLE workflow_preferences (
                owner_id              TEXT PRIMARY KEY,
                auto_approve          BOOLEAN NOT NULL,
                confidence_threshold  REAL NOT NULL,
                min_priority          INTEGER NOT NULL,
                max_auto_actions      INTEGER NOT NULL,
                updated_at            TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "domain records: tasks, reminders, calendar, email, activity, notifications",
        sql: r#"
            CREATE TABLE tasks (
                id           TEXT PRIMARY KEY,
                owner_id     TEXT NOT NULL,
                title        TEXT NOT NULL,
                description  TEXT,
                status       TEXT NOT NULL CHECK(status IN
                    ('todo','in_progress','blocked','completed','cancelled')),
                priority     TEXT NOT NULL CHECK(priority IN ('low','medium','high','urgent')),
                due_date     TEXT,
                assignee     TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );
            CREATE INDEX idx_tasks_owner_status ON tasks(owner_id, status);
            CREATE INDEX idx_tasks_owner_created ON tasks(owner_id, created_at);

            CREATE TABLE reminders (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL,
                title       TEXT NOT NULL,
                message     TEXT,
                remind_at   TEXT NOT NULL,
                task_id     TEXT,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX idx_reminders_owner ON reminders(owner_id, remind_at);

            CREATE TABLE calendar_events (
                id           TEXT PRIMARY KEY,
                owner_id     TEXT NOT NULL,
                title        TEXT NOT NULL,
                description  TEXT,
                start_time   TEXT NOT NULL,
                end_time     TEXT NOT NULL,
                location     TEXT,
                attendees    TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );
            CREATE INDEX idx_events_owner_start ON calendar_events(owner_id, start_time);

            CREATE TABLE emails (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL,
                direction   TEXT NOT NULL CHECK(direction IN ('inbound','outbound')),
                sender      TEXT,
                recipients  TEXT NOT NULL,
                subject     TEXT NOT NULL,
                body        TEXT NOT NULL,
                status      TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX idx_emails_owner ON emails(owner_id, created_at);

            CREATE TABLE activity_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id    TEXT NOT NULL,
                kind        TEXT NOT NULL,
                description TEXT NOT NULL,
                metadata    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX idx_activity_owner ON activity_log(owner_id, created_at);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL,
                kind        TEXT NOT NULL,
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                metadata    TEXT NOT NULL,
                read        BOOLEAN NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX idx_notifications_owner ON notifications(owner_id, created_at);
        "#,
    },
    Migration {
        version: 3,
        description: "account state: permissions, integrations, generated content",
        sql: r#"
            CREATE TABLE permissions (
                owner_id    TEXT NOT NULL,
                scope       TEXT NOT NULL,
                granted_at  TEXT NOT NULL,
                PRIMARY KEY (owner_id, scope)
            );

            CREATE TABLE integrations (
                owner_id    TEXT NOT NULL,
                provider    TEXT NOT NULL,
                status      TEXT NOT NULL CHECK(status IN ('connected','disconnected','error')),
                active      BOOLEAN NOT NULL DEFAULT 1,
                last_error  TEXT,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (owner_id, provider)
            );

            CREATE TABLE generated_content (
                id            TEXT PRIMARY KEY,
                owner_id      TEXT NOT NULL,
                content_type  TEXT NOT NULL,
                prompt        TEXT NOT NULL,
                content       TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );
            CREATE INDEX idx_generated_owner ON generated_content(owner_id, created_at);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// Synchronous; call it through [`crate::Database::run_migrations`].
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(current_version = current, pending = pending.len(), "running pending migrations");
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Return the latest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    ensure_migrations_table(conn)?;
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
        row.get(0)
    })
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  TEXT NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside an immediate transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    info!(version = migration.version, description = migration.description, "applying migration");

    // `Connection::transaction` needs `&mut`; manage the transaction by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| fail(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    crate::db::encode_ts(&chrono::Utc::now())
                ],
            )
            .map(|_| ())
            .map_err(|e| fail(format!("failed to record migration: {e}")))
        });

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
            Ok(())
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LATEST_VERSION: u32 = 3;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' \
                 AND name != 'sqlite_sequence' ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(LATEST_VERSION));
    }

    #[test]
    fn fresh_db_reports_version_zero() {
        let conn = setup_conn();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables = table_names(&conn);
        for expected in [
            "triggers",
            "workflow_executions",
            "workflow_metrics",
            "workflow_preferences",
            "tasks",
            "reminders",
            "calendar_events",
            "emails",
            "activity_log",
            "notifications",
            "permissions",
            "integrations",
            "generated_content",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn execution_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO workflow_executions (id, owner_id, workflow_id, status, started_at, \
             trigger_data, analysis_data, selected_suggestions, executed_actions, result) \
             VALUES ('e', 'o', 'w', 'exploded', '2026-01-01T00:00:00.000000000Z', '{}', '{}', '[]', '[]', '[]')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn task_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let bad = conn.execute(
            "INSERT INTO tasks (id, owner_id, title, status, priority, created_at, updated_at) \
             VALUES ('t', 'o', 'x', 'someday', 'low', 'a', 'a')",
            [],
        );
        assert!(bad.is_err());
    }
}
