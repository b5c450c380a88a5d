//! Job queue: creation, atomic claiming, terminal transitions, orphan sweep.
//!
//! Claiming is a conditional `UPDATE ... WHERE status = 'QUEUED'` inside a
//! transaction; when two claimers race, exactly one sees a row affected.

use crate::bindings::map_binding_row;
use crate::error::Result;
use crate::models::{
    ClaimedJob, EventDetails, EventType, JobRecord, RetryDecision, SweepReport,
};
use crate::{lineage, Catalog, CatalogError};
use casparian_protocol::types::{ErrorKind, JobOutcome, JobState};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

/// Result of a cancel request against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Job was queued; it is now terminally cancelled.
    CancelledQueued,
    /// Job is running on this worker; the coordinator must send ABORT.
    RunningOn(String),
    /// Job already reached a terminal state.
    AlreadyTerminal,
    NotFound,
}

fn map_job_row(row: &SqliteRow) -> Result<JobRecord> {
    let status_raw: String = row.try_get("status")?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        file_fingerprint: row.try_get("file_fingerprint")?,
        parser_binding_id: row.try_get("parser_binding_id")?,
        status: JobState::from_str(&status_raw).map_err(CatalogError::Corrupt)?,
        claim_time: row.try_get("claim_time")?,
        end_time: row.try_get("end_time")?,
        worker_id: row.try_get("worker_id")?,
        retry_count: row.try_get("retry_count")?,
        error_kind: row.try_get("error_kind")?,
        error_message: row.try_get("error_message")?,
        output_path: row.try_get("output_path")?,
        row_count: row.try_get("row_count")?,
    })
}

/// Recompute a file's status from its job rows.
async fn recompute_file_status(tx: &mut sqlx::SqliteConnection, file_id: i64) -> Result<()> {
    let rows = sqlx::query("SELECT status FROM cf_jobs WHERE file_id = ?")
        .bind(file_id)
        .fetch_all(&mut *tx)
        .await?;

    let mut any_running = false;
    let mut any_queued = false;
    let mut any_failed = false;
    let mut any_succeeded = false;
    for row in &rows {
        let status_raw: String = row.try_get("status")?;
        match JobState::from_str(&status_raw).map_err(CatalogError::Corrupt)? {
            JobState::Running => any_running = true,
            JobState::Queued => any_queued = true,
            JobState::Failed => any_failed = true,
            JobState::Succeeded => any_succeeded = true,
            JobState::Cancelled => {}
        }
    }

    let status = if any_running {
        "running"
    } else if any_queued {
        "queued"
    } else if any_failed {
        "failed"
    } else if any_succeeded {
        "done"
    } else {
        // Only cancelled jobs (or none at all): the file stays tagged.
        "tagged"
    };

    sqlx::query("UPDATE cf_files SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
    Ok(())
}

impl Catalog {
    /// Create queued jobs for every binding subscribed to this file's tag.
    ///
    /// A job is created only when no job of any status exists for the
    /// `(fingerprint, binding)` pair - backlog scans after a restart must not
    /// resurrect terminally failed or cancelled work. Returns created job ids.
    pub async fn create_jobs_for_file(&self, file_id: i64) -> Result<Vec<i64>> {
        let file = self.get_file(file_id).await?;
        let Some(tag) = file.tag.as_deref() else {
            return Ok(Vec::new());
        };
        let bindings = self.bindings_for_tag(tag).await?;

        let mut tx = self.pool().begin().await?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut created = Vec::new();

        for binding in &bindings {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM cf_jobs WHERE file_fingerprint = ? AND parser_binding_id = ? LIMIT 1",
            )
            .bind(&file.fingerprint)
            .bind(binding.id)
            .fetch_optional(&mut *tx)
            .await?;
            if exists.is_some() {
                continue;
            }

            // INSERT OR IGNORE backstops the partial unique index under races.
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO cf_jobs
                    (file_id, file_fingerprint, parser_binding_id, status, created_at)
                VALUES (?, ?, ?, 'QUEUED', ?)
                "#,
            )
            .bind(file_id)
            .bind(&file.fingerprint)
            .bind(binding.id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                let job_id = result.last_insert_rowid();
                created.push(job_id);
                lineage::append_event_tx(
                    &mut tx,
                    EventType::JobQueued,
                    &EventDetails::for_job(job_id, &file.fingerprint)
                        .parser(&binding.name, &binding.parser_version),
                )
                .await?;
            }
        }

        recompute_file_status(&mut tx, file_id).await?;
        tx.commit().await?;

        if !created.is_empty() {
            info!("File {}: {} job(s) queued", file_id, created.len());
        }
        Ok(created)
    }

    /// Match all files sitting in `tagged` into jobs. Returns created job ids.
    pub async fn match_tagged_files(&self) -> Result<Vec<i64>> {
        let file_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM cf_files WHERE status = 'tagged' AND tag IS NOT NULL")
                .fetch_all(self.pool())
                .await?;

        let mut created = Vec::new();
        for file_id in file_ids {
            created.extend(self.create_jobs_for_file(file_id).await?);
        }
        Ok(created)
    }

    /// Atomically claim the oldest queued job whose fingerprint has no
    /// running job. Safe under concurrent claimers: the claim is a single
    /// conditional UPDATE, so exactly one wins; losers get `None`.
    pub async fn claim_next_job(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let now = chrono::Utc::now().to_rfc3339();
        let job_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE cf_jobs
            SET status = 'RUNNING', claim_time = ?, worker_id = ?
            WHERE id = (
                SELECT j.id FROM cf_jobs j
                WHERE j.status = 'QUEUED'
                  AND NOT EXISTS (
                      SELECT 1 FROM cf_jobs r
                      WHERE r.status = 'RUNNING' AND r.file_fingerprint = j.file_fingerprint
                  )
                ORDER BY j.id ASC
                LIMIT 1
            ) AND status = 'QUEUED'
            RETURNING id
            "#,
        )
        .bind(&now)
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let job_row = sqlx::query("SELECT * FROM cf_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(self.pool())
            .await?;
        let job = map_job_row(&job_row)?;

        let file_row = sqlx::query("SELECT * FROM cf_files WHERE id = ?")
            .bind(job.file_id)
            .fetch_one(self.pool())
            .await?;
        let file = crate::files::map_file_row(&file_row)?;

        let binding_row = sqlx::query("SELECT * FROM cf_parser_bindings WHERE id = ?")
            .bind(job.parser_binding_id)
            .fetch_one(self.pool())
            .await?;
        let binding = map_binding_row(&binding_row)?;

        sqlx::query("UPDATE cf_files SET status = 'running', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(job.file_id)
            .execute(self.pool())
            .await?;

        info!("Claimed job {} for worker {}", job_id, worker_id);

        Ok(Some(ClaimedJob {
            job_id,
            file_id: file.id,
            input_path: file.abs_path,
            file_fingerprint: job.file_fingerprint,
            tag: file.tag.unwrap_or_default(),
            binding,
            retry_count: job.retry_count,
        }))
    }

    /// Terminal transition for a job, with lineage events and file status
    /// propagation. Idempotent against already-terminal jobs (returns false).
    pub async fn conclude_job(
        &self,
        job_id: i64,
        outcome: JobOutcome,
        error_kind: Option<ErrorKind>,
        error_message: Option<&str>,
        output_path: Option<&str>,
        row_count: Option<i64>,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM cf_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CatalogError::JobNotFound(job_id))?;
        let job = map_job_row(&row)?;

        if job.status.is_terminal() {
            tx.commit().await?;
            return Ok(false);
        }

        let binding_row = sqlx::query("SELECT name, parser_version FROM cf_parser_bindings WHERE id = ?")
            .bind(job.parser_binding_id)
            .fetch_one(&mut *tx)
            .await?;
        let parser_name: String = binding_row.try_get("name")?;
        let parser_version: String = binding_row.try_get("parser_version")?;

        let now = chrono::Utc::now().to_rfc3339();
        let new_state = outcome.to_state();
        sqlx::query(
            r#"
            UPDATE cf_jobs
            SET status = ?, end_time = ?, error_kind = ?, error_message = ?,
                output_path = ?, row_count = ?
            WHERE id = ?
            "#,
        )
        .bind(new_state.as_str())
        .bind(&now)
        .bind(error_kind.map(|k| k.as_str()))
        .bind(error_message)
        .bind(output_path)
        .bind(row_count)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if let Some(message) = error_message {
            sqlx::query("UPDATE cf_files SET last_error = ? WHERE id = ?")
                .bind(message)
                .bind(job.file_id)
                .execute(&mut *tx)
                .await?;
        }

        let event_type = match outcome {
            JobOutcome::Succeeded => EventType::JobSucceeded,
            JobOutcome::Failed => EventType::JobFailed,
            JobOutcome::Cancelled => EventType::JobCancelled,
        };
        let mut details = EventDetails::for_job(job_id, &job.file_fingerprint)
            .parser(&parser_name, &parser_version);
        if let (Some(path), Some(rows)) = (output_path, row_count) {
            details = details.output(path, rows);
        }
        lineage::append_event_tx(&mut tx, event_type, &details).await?;

        recompute_file_status(&mut tx, job.file_id).await?;
        tx.commit().await?;

        info!("Job {} concluded: {}", job_id, outcome);
        Ok(true)
    }

    /// Requeue a failed-but-retriable job, or fail it terminally with
    /// `exceeded_retries` once the ceiling is reached. Atomic.
    pub async fn retry_or_fail(
        &self,
        job_id: i64,
        kind: ErrorKind,
        message: &str,
        retry_ceiling: u32,
    ) -> Result<RetryDecision> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM cf_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CatalogError::JobNotFound(job_id))?;
        let job = map_job_row(&row)?;

        if job.status.is_terminal() {
            tx.commit().await?;
            return Ok(RetryDecision::Exhausted);
        }

        if job.retry_count < retry_ceiling as i64 {
            let new_count = job.retry_count + 1;
            sqlx::query(
                r#"
                UPDATE cf_jobs
                SET status = 'QUEUED', claim_time = NULL, worker_id = NULL,
                    retry_count = ?, error_kind = ?, error_message = ?
                WHERE id = ?
                "#,
            )
            .bind(new_count)
            .bind(kind.as_str())
            .bind(message)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            recompute_file_status(&mut tx, job.file_id).await?;
            tx.commit().await?;
            info!("Job {} requeued (retry {}): {}", job_id, new_count, kind);
            return Ok(RetryDecision::Requeued(new_count));
        }

        sqlx::query(
            r#"
            UPDATE cf_jobs
            SET status = 'FAILED', end_time = ?, error_kind = 'exceeded_retries',
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(message)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        lineage::append_event_tx(
            &mut tx,
            EventType::JobFailed,
            &EventDetails::for_job(job_id, &job.file_fingerprint),
        )
        .await?;
        recompute_file_status(&mut tx, job.file_id).await?;
        tx.commit().await?;
        warn!(
            "Job {} exhausted retries ({}), failing terminally",
            job_id, job.retry_count
        );
        Ok(RetryDecision::Exhausted)
    }

    /// Return a running job to the queue without a retry penalty.
    ///
    /// Used for capacity rejections: a worker refusing a DISPATCH is not a
    /// failure of the job.
    pub async fn defer_job(&self, job_id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let rows = sqlx::query(
            r#"
            UPDATE cf_jobs
            SET status = 'QUEUED', claim_time = NULL, worker_id = NULL
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if rows > 0 {
            let file_id: Option<i64> =
                sqlx::query_scalar("SELECT file_id FROM cf_jobs WHERE id = ?")
                    .bind(job_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if let Some(file_id) = file_id {
                recompute_file_status(&mut tx, file_id).await?;
            }
            info!("Job {} deferred back to queue", job_id);
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cancel a job. Queued jobs cancel directly; running jobs report their
    /// worker so the coordinator can send ABORT.
    pub async fn cancel_job(&self, job_id: i64) -> Result<CancelOutcome> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM cf_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(CancelOutcome::NotFound);
        };
        let job = map_job_row(&row)?;

        match job.status {
            JobState::Queued => {
                sqlx::query(
                    r#"
                    UPDATE cf_jobs
                    SET status = 'CANCELLED', end_time = ?, error_kind = 'cancelled'
                    WHERE id = ? AND status = 'QUEUED'
                    "#,
                )
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
                lineage::append_event_tx(
                    &mut tx,
                    EventType::JobCancelled,
                    &EventDetails::for_job(job_id, &job.file_fingerprint),
                )
                .await?;
                recompute_file_status(&mut tx, job.file_id).await?;
                tx.commit().await?;
                Ok(CancelOutcome::CancelledQueued)
            }
            JobState::Running => {
                tx.commit().await?;
                Ok(CancelOutcome::RunningOn(job.worker_id.unwrap_or_default()))
            }
            _ => {
                tx.commit().await?;
                Ok(CancelOutcome::AlreadyTerminal)
            }
        }
    }

    /// Requeue running jobs whose worker has gone silent.
    ///
    /// Only RUNNING jobs are touched, so the sweep is idempotent with
    /// respect to already-terminal jobs. Each orphan gets a `job.orphaned`
    /// event; jobs past the retry ceiling fail with `exceeded_retries`.
    pub async fn sweep_stale(
        &self,
        now_ms: i64,
        liveness_window_ms: i64,
        retry_ceiling: u32,
    ) -> Result<SweepReport> {
        let cutoff = now_ms - liveness_window_ms;
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT j.* FROM cf_jobs j
            LEFT JOIN cf_worker_registrations w ON w.worker_id = j.worker_id
            WHERE j.status = 'RUNNING'
              AND (w.worker_id IS NULL OR w.last_heartbeat < ?)
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut report = SweepReport::default();
        let now = chrono::Utc::now().to_rfc3339();

        for row in &rows {
            let job = map_job_row(row)?;
            lineage::append_event_tx(
                &mut tx,
                EventType::JobOrphaned,
                &EventDetails::for_job(job.id, &job.file_fingerprint),
            )
            .await?;

            if job.retry_count < retry_ceiling as i64 {
                sqlx::query(
                    r#"
                    UPDATE cf_jobs
                    SET status = 'QUEUED', claim_time = NULL, worker_id = NULL,
                        retry_count = retry_count + 1
                    WHERE id = ? AND status = 'RUNNING'
                    "#,
                )
                .bind(job.id)
                .execute(&mut *tx)
                .await?;
                warn!(
                    "Job {} orphaned by worker {:?}, requeued (retry {})",
                    job.id,
                    job.worker_id,
                    job.retry_count + 1
                );
                report.requeued.push(job.id);
            } else {
                sqlx::query(
                    r#"
                    UPDATE cf_jobs
                    SET status = 'FAILED', end_time = ?, error_kind = 'exceeded_retries',
                        error_message = 'worker lost after retry ceiling'
                    WHERE id = ? AND status = 'RUNNING'
                    "#,
                )
                .bind(&now)
                .bind(job.id)
                .execute(&mut *tx)
                .await?;
                lineage::append_event_tx(
                    &mut tx,
                    EventType::JobFailed,
                    &EventDetails::for_job(job.id, &job.file_fingerprint),
                )
                .await?;
                report.exhausted.push(job.id);
            }
            recompute_file_status(&mut tx, job.file_id).await?;
        }

        tx.commit().await?;
        Ok(report)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM cf_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_job_row).transpose()
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobState>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JobRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM cf_jobs WHERE status = ? ORDER BY id ASC LIMIT ? OFFSET ?")
                    .bind(status.as_str())
                    .bind(limit.max(0))
                    .bind(offset.max(0))
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM cf_jobs ORDER BY id ASC LIMIT ? OFFSET ?")
                    .bind(limit.max(0))
                    .bind(offset.max(0))
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(map_job_row).collect()
    }

    pub async fn count_jobs_by_status(&self) -> Result<HashMap<JobState, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM cf_jobs GROUP BY status")
            .fetch_all(self.pool())
            .await?;
        let mut counts = HashMap::new();
        for row in &rows {
            let status_raw: String = row.try_get("status")?;
            let status = JobState::from_str(&status_raw).map_err(CatalogError::Corrupt)?;
            counts.insert(status, row.try_get::<i64, _>("n")?);
        }
        Ok(counts)
    }
}
