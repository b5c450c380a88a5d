//! File rows: upsert, status, manual tagging, error recording.

use crate::error::Result;
use crate::models::{EventDetails, EventType, FileRecord};
use crate::{Catalog, CatalogError};
use casparian_protocol::types::{FileStatus, TagSource, UpsertOutcome};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

pub(crate) fn map_file_row(row: &SqliteRow) -> Result<FileRecord> {
    let status_raw: String = row.try_get("status")?;
    let tag_source_raw: String = row.try_get("tag_source")?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        root: row.try_get("root")?,
        rel_path: row.try_get("rel_path")?,
        abs_path: row.try_get("abs_path")?,
        size_bytes: row.try_get("size_bytes")?,
        fingerprint: row.try_get("fingerprint")?,
        tag: row.try_get("tag")?,
        tag_source: TagSource::from_str(&tag_source_raw).map_err(CatalogError::Corrupt)?,
        rule_id: row.try_get("rule_id")?,
        status: FileStatus::from_str(&status_raw).map_err(CatalogError::Corrupt)?,
        last_error: row.try_get("last_error")?,
    })
}

impl Catalog {
    /// Insert or refresh a file row.
    ///
    /// - Unknown `(root, rel_path)`: insert with status `discovered`.
    /// - Known with same fingerprint: no-op (`Unchanged`) - rescans of
    ///   byte-identical trees must not cause any transition.
    /// - Known with different fingerprint: reset to `discovered`, cancel any
    ///   queued job for the stale content, clear non-manual tags.
    pub async fn upsert_file(
        &self,
        root: &str,
        rel_path: &str,
        abs_path: &str,
        size_bytes: i64,
        fingerprint: &str,
    ) -> Result<(i64, UpsertOutcome)> {
        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now().to_rfc3339();

        let existing = sqlx::query(
            "SELECT id, fingerprint, tag_source FROM cf_files WHERE root = ? AND rel_path = ?",
        )
        .bind(root)
        .bind(rel_path)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = existing else {
            let result = sqlx::query(
                r#"
                INSERT INTO cf_files
                    (root, rel_path, abs_path, size_bytes, fingerprint,
                     tag_source, status, discovered_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'none', 'discovered', ?, ?)
                "#,
            )
            .bind(root)
            .bind(rel_path)
            .bind(abs_path)
            .bind(size_bytes)
            .bind(fingerprint)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            let file_id = result.last_insert_rowid();
            tx.commit().await?;
            return Ok((file_id, UpsertOutcome::Inserted));
        };

        let file_id: i64 = row.try_get("id")?;
        let old_fingerprint: String = row.try_get("fingerprint")?;
        let tag_source_raw: String = row.try_get("tag_source")?;

        if old_fingerprint == fingerprint {
            tx.commit().await?;
            return Ok((file_id, UpsertOutcome::Unchanged));
        }

        // Content changed under the same path. Stale queued jobs are cancelled;
        // running jobs conclude on their own against the old content.
        let stale_jobs = sqlx::query("SELECT id FROM cf_jobs WHERE file_id = ? AND status = 'QUEUED'")
            .bind(file_id)
            .fetch_all(&mut *tx)
            .await?;
        for stale in &stale_jobs {
            let job_id: i64 = stale.try_get("id")?;
            sqlx::query(
                r#"
                UPDATE cf_jobs
                SET status = 'CANCELLED',
                    end_time = ?,
                    error_kind = 'cancelled',
                    error_message = 'superseded by content change'
                WHERE id = ? AND status = 'QUEUED'
                "#,
            )
            .bind(&now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            crate::lineage::append_event_tx(
                &mut tx,
                EventType::JobCancelled,
                &EventDetails::for_job(job_id, &old_fingerprint),
            )
            .await?;
        }

        let keep_tag = tag_source_raw == TagSource::Manual.as_str();
        if keep_tag {
            sqlx::query(
                r#"
                UPDATE cf_files
                SET size_bytes = ?, fingerprint = ?, abs_path = ?,
                    status = 'discovered', last_error = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(size_bytes)
            .bind(fingerprint)
            .bind(abs_path)
            .bind(&now)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE cf_files
                SET size_bytes = ?, fingerprint = ?, abs_path = ?,
                    tag = NULL, tag_source = 'none', rule_id = NULL,
                    status = 'discovered', last_error = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(size_bytes)
            .bind(fingerprint)
            .bind(abs_path)
            .bind(&now)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((file_id, UpsertOutcome::Updated))
    }

    pub async fn get_file(&self, file_id: i64) -> Result<FileRecord> {
        let row = sqlx::query("SELECT * FROM cf_files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(CatalogError::FileNotFound(file_id))?;
        map_file_row(&row)
    }

    pub async fn get_file_by_path(&self, root: &str, rel_path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM cf_files WHERE root = ? AND rel_path = ?")
            .bind(root)
            .bind(rel_path)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_file_row).transpose()
    }

    pub async fn list_files_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM cf_files WHERE status = ? ORDER BY id ASC")
            .bind(status.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_file_row).collect()
    }

    /// Record a file-level I/O error without aborting the scan.
    pub async fn record_file_error(&self, file_id: i64, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE cf_files SET last_error = ?, status = 'discovered', updated_at = ? WHERE id = ?",
        )
        .bind(message)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(file_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Manually tag a file. Manual tags always win and survive rescans.
    pub async fn set_manual_tag(&self, file_id: i64, tag: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cf_files
            SET tag = ?, tag_source = 'manual', rule_id = NULL,
                status = 'tagged', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(tag)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(file_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::FileNotFound(file_id));
        }
        Ok(())
    }
}
