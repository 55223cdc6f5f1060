//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS task (
    id              TEXT PRIMARY KEY NOT NULL,
    task_type       TEXT,
    description     TEXT,
    assigned_to     TEXT,
    status          TEXT NOT NULL CHECK(status IN ('inbox','in_progress','done','error')),
    priority        TEXT,
    user_id         TEXT,
    conversation_id TEXT,
    workflow        INTEGER NOT NULL DEFAULT 0,
    context         TEXT,
    payload         TEXT,
    extra           TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_update (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id         TEXT NOT NULL,
    agent           TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('done','error')),
    result          TEXT NOT NULL,
    deliverable     TEXT,
    workflow_id     TEXT,
    step_index      INTEGER,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow (
    id              TEXT PRIMARY KEY NOT NULL,
    parent_task_id  TEXT,
    source_name     TEXT,
    source_file     TEXT,
    parent          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_step (
    workflow_id     TEXT NOT NULL,
    step_index      INTEGER NOT NULL,
    agent           TEXT NOT NULL,
    description     TEXT NOT NULL,
    depends_on      INTEGER,
    status          TEXT NOT NULL CHECK(status IN ('pending','dispatched','done','error','skipped')),
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (workflow_id, step_index)
);

CREATE TABLE IF NOT EXISTS worker (
    name            TEXT PRIMARY KEY NOT NULL,
    spec            TEXT NOT NULL,
    registered_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_status ON task(status);
CREATE INDEX IF NOT EXISTS idx_update_task ON task_update(task_id);
CREATE INDEX IF NOT EXISTS idx_step_workflow ON workflow_step(workflow_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
