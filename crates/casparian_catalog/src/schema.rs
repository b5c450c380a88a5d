//! Catalog schema (SQLite DDL).
//!
//! The partial unique index on `cf_jobs` enforces the core invariant in the
//! store itself: at most one non-terminal job per (fingerprint, binding).

use crate::error::Result;
use sqlx::{Pool, Sqlite};

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cf_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT NOT NULL,
        rel_path TEXT NOT NULL,
        abs_path TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        fingerprint TEXT NOT NULL,
        tag TEXT,
        tag_source TEXT NOT NULL DEFAULT 'none',
        rule_id INTEGER,
        status TEXT NOT NULL DEFAULT 'discovered',
        last_error TEXT,
        discovered_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(root, rel_path)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_cf_files_fingerprint ON cf_files(fingerprint)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_cf_files_status ON cf_files(status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_tagging_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pattern TEXT NOT NULL,
        tag TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_parser_bindings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        parser_version TEXT NOT NULL,
        source_code TEXT NOT NULL,
        dependency_set TEXT NOT NULL DEFAULT '[]',
        schema_contract TEXT NOT NULL,
        sink_spec TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(name, source_hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_subscriptions (
        tag TEXT NOT NULL,
        parser_binding_id INTEGER NOT NULL REFERENCES cf_parser_bindings(id),
        UNIQUE(tag, parser_binding_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES cf_files(id),
        file_fingerprint TEXT NOT NULL,
        parser_binding_id INTEGER NOT NULL REFERENCES cf_parser_bindings(id),
        status TEXT NOT NULL DEFAULT 'QUEUED',
        claim_time TEXT,
        end_time TEXT,
        worker_id TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error_kind TEXT,
        error_message TEXT,
        output_path TEXT,
        row_count INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_cf_jobs_active_once
        ON cf_jobs(file_fingerprint, parser_binding_id)
        WHERE status IN ('QUEUED', 'RUNNING')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_cf_jobs_status ON cf_jobs(status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_worker_registrations (
        worker_id TEXT PRIMARY KEY,
        last_heartbeat INTEGER NOT NULL,
        capabilities TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cf_lineage_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        event_time TEXT NOT NULL,
        file_fingerprint TEXT,
        job_id INTEGER,
        parser_name TEXT,
        parser_version TEXT,
        output_path TEXT,
        row_count INTEGER
    )
    "#,
];

pub(crate) async fn create_all(pool: &Pool<Sqlite>) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
