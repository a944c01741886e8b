//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so bootstrap can
//! run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id                       TEXT PRIMARY KEY NOT NULL,
    user_id                  TEXT NOT NULL,
    port                     INTEGER NOT NULL CHECK(port BETWEEN 1 AND 65535),
    environment              TEXT NOT NULL,
    tags                     TEXT NOT NULL,
    repository               TEXT,
    status                   TEXT NOT NULL CHECK(status IN ('starting','active','stopped','failed')),
    process_info             TEXT,
    failure_reason           TEXT,
    termination_requested_at TEXT,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL,
    version                  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_account (
    id              TEXT PRIMARY KEY NOT NULL,
    display_name    TEXT NOT NULL,
    is_active       INTEGER NOT NULL DEFAULT 1,
    is_admin        INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    last_used_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_session_user ON session(user_id);
CREATE INDEX IF NOT EXISTS idx_session_status ON session(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
