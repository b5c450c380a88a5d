//! Durable catalog for the execution fabric.
//!
//! The catalog exclusively owns all persistent state: files, tagging rules,
//! parser bindings, subscriptions, jobs, worker registrations, and the
//! append-only lineage log. Scanner, Coordinator, and Worker hold no
//! authoritative state - everything passes through here or the wire protocol.
//!
//! All mutations are single transactions; partial observers never see a job
//! in two states. Job claiming uses a conditional `UPDATE ... WHERE status =
//! 'QUEUED'` so concurrent claimers race safely.

pub mod error;
pub mod models;

mod bindings;
mod files;
mod lineage;
mod queue;
mod rules;
mod schema;
mod workers;

pub use error::{CatalogError, Result};
pub use models::{
    ClaimedJob, EventDetails, EventType, FileRecord, JobRecord, LineageEvent, ParserBinding,
    RetryDecision, RuleApplication, SweepReport, TaggingRule, WorkerRegistration,
};
pub use queue::CancelOutcome;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Handle to the catalog database. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Catalog {
    pool: Pool<Sqlite>,
}

impl Catalog {
    /// Open (and create if missing) a catalog at the given URL.
    ///
    /// Accepts `sqlite:/path/to/catalog.db` or a bare filesystem path.
    pub async fn open(url: &str) -> Result<Self> {
        let path = url.strip_prefix("sqlite:").unwrap_or(url);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.init().await?;
        info!("Catalog opened: {}", path);
        Ok(catalog)
    }

    /// Open an in-memory catalog (single connection, test use).
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let catalog = Self { pool };
        catalog.init().await?;
        Ok(catalog)
    }

    /// Create the schema idempotently.
    pub async fn init(&self) -> Result<()> {
        schema::create_all(&self.pool).await
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Current wall clock in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
