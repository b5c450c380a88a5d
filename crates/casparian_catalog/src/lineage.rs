//! Append-only lineage log.

use crate::error::Result;
use crate::models::{EventDetails, EventType, LineageEvent};
use crate::{Catalog, CatalogError};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

pub(crate) async fn append_event_tx(
    conn: &mut sqlx::SqliteConnection,
    event_type: EventType,
    details: &EventDetails,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cf_lineage_events
            (event_type, event_time, file_fingerprint, job_id, parser_name,
             parser_version, output_path, row_count)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event_type.as_str())
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(&details.file_fingerprint)
    .bind(details.job_id)
    .bind(&details.parser_name)
    .bind(&details.parser_version)
    .bind(&details.output_path)
    .bind(details.row_count)
    .execute(conn)
    .await?;
    Ok(())
}

fn map_event_row(row: &SqliteRow) -> Result<LineageEvent> {
    let raw_type: String = row.try_get("event_type")?;
    let event_type = EventType::from_str(&raw_type).map_err(CatalogError::Corrupt)?;
    Ok(LineageEvent {
        id: row.try_get("id")?,
        event_type,
        event_time: row.try_get("event_time")?,
        file_fingerprint: row.try_get("file_fingerprint")?,
        job_id: row.try_get("job_id")?,
        parser_name: row.try_get("parser_name")?,
        parser_version: row.try_get("parser_version")?,
        output_path: row.try_get("output_path")?,
        row_count: row.try_get("row_count")?,
    })
}

impl Catalog {
    /// Append a lineage event outside any other transaction.
    pub async fn append_event(&self, event_type: EventType, details: EventDetails) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        append_event_tx(&mut conn, event_type, &details).await
    }

    /// All events, oldest first.
    pub async fn list_events(&self) -> Result<Vec<LineageEvent>> {
        let rows = sqlx::query("SELECT * FROM cf_lineage_events ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_event_row).collect()
    }

    /// Events of one kind, oldest first.
    pub async fn list_events_of_type(&self, event_type: EventType) -> Result<Vec<LineageEvent>> {
        let rows = sqlx::query("SELECT * FROM cf_lineage_events WHERE event_type = ? ORDER BY id ASC")
            .bind(event_type.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_event_row).collect()
    }

    /// Events referencing a job, oldest first.
    pub async fn events_for_job(&self, job_id: i64) -> Result<Vec<LineageEvent>> {
        let rows = sqlx::query("SELECT * FROM cf_lineage_events WHERE job_id = ? ORDER BY id ASC")
            .bind(job_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(map_event_row).collect()
    }
}
