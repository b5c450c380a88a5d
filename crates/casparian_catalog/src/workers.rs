//! Worker registrations (liveness tracking).

use crate::error::Result;
use crate::models::WorkerRegistration;
use crate::Catalog;
use sqlx::Row;

impl Catalog {
    /// Record a worker heartbeat. Upserts the registration row.
    pub async fn record_heartbeat(
        &self,
        worker_id: &str,
        now_ms: i64,
        capabilities: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cf_worker_registrations (worker_id, last_heartbeat, capabilities)
            VALUES (?, ?, ?)
            ON CONFLICT(worker_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                capabilities = excluded.capabilities
            "#,
        )
        .bind(worker_id)
        .bind(now_ms)
        .bind(serde_json::to_string(capabilities)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_registration(&self, worker_id: &str) -> Result<Option<WorkerRegistration>> {
        let row = sqlx::query("SELECT * FROM cf_worker_registrations WHERE worker_id = ?")
            .bind(worker_id)
            .fetch_optional(self.pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let capabilities: String = row.try_get("capabilities")?;
        Ok(Some(WorkerRegistration {
            worker_id: row.try_get("worker_id")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            capabilities: serde_json::from_str(&capabilities)?,
        }))
    }

    /// Drop a registration (session teardown).
    pub async fn remove_registration(&self, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cf_worker_registrations WHERE worker_id = ?")
            .bind(worker_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Worker ids whose heartbeat is older than the cutoff.
    pub async fn stale_workers(&self, now_ms: i64, liveness_window_ms: i64) -> Result<Vec<String>> {
        let cutoff = now_ms - liveness_window_ms;
        let ids =
            sqlx::query_scalar("SELECT worker_id FROM cf_worker_registrations WHERE last_heartbeat < ?")
                .bind(cutoff)
                .fetch_all(self.pool())
                .await?;
        Ok(ids)
    }
}
