//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Called during database initialization; every statement is idempotent.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Runtime settings overrides
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- API users
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            full_name TEXT,
            email TEXT,
            password_hash TEXT NOT NULL,
            scopes TEXT NOT NULL DEFAULT '[]',
            disabled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        -- Uploaded and generated files
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            original_name TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL,
            source_job_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_files_kind ON files(kind);
        CREATE INDEX IF NOT EXISTS idx_files_created ON files(created_at);

        -- Batch jobs (full snapshot per row)
        CREATE TABLE IF NOT EXISTS batch_jobs (
            id TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            parameters TEXT NOT NULL,
            file_ids TEXT NOT NULL,
            options TEXT NOT NULL,
            status TEXT NOT NULL,
            results TEXT NOT NULL,
            warnings TEXT NOT NULL DEFAULT '[]',
            processed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            source_job_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_batch_jobs_status ON batch_jobs(status);

        -- Saved batch configurations
        CREATE TABLE IF NOT EXISTS batch_configurations (
            name TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            parameters TEXT NOT NULL,
            options TEXT NOT NULL,
            created_at TEXT NOT NULL,
            source_job_id TEXT
        );

        -- Content-addressed conversion cache
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            outputs TEXT NOT NULL,
            data TEXT,
            size_bytes INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            last_accessed TEXT NOT NULL,
            hits INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON cache_entries(last_accessed);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
