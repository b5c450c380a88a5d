//! Catalog row types.

use casparian_protocol::schema::SchemaContract;
use casparian_protocol::sink::SinkSpec;
use casparian_protocol::types::{FileStatus, JobState, TagSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A discovered file - the unit of potential work.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub root: String,
    pub rel_path: String,
    pub abs_path: String,
    pub size_bytes: i64,
    pub fingerprint: String,
    pub tag: Option<String>,
    pub tag_source: TagSource,
    pub rule_id: Option<i64>,
    pub status: FileStatus,
    pub last_error: Option<String>,
}

/// A tagging rule. Applied in descending priority; ties broken by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingRule {
    pub id: i64,
    pub pattern: String,
    pub tag: String,
    pub priority: i32,
    pub enabled: bool,
    pub description: Option<String>,
}

/// Result of evaluating the rules against a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleApplication {
    pub tag: String,
    pub rule_id: i64,
    /// Whether the file's tag actually changed.
    pub changed: bool,
}

/// A registered, content-addressed parser version.
#[derive(Debug, Clone)]
pub struct ParserBinding {
    pub id: i64,
    pub name: String,
    pub source_hash: String,
    pub parser_version: String,
    pub source_code: String,
    pub dependency_set: Vec<String>,
    pub schema_contract: SchemaContract,
    pub sink_spec: SinkSpec,
}

/// A job row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub file_id: i64,
    pub file_fingerprint: String,
    pub parser_binding_id: i64,
    pub status: JobState,
    pub claim_time: Option<String>,
    pub end_time: Option<String>,
    pub worker_id: Option<String>,
    pub retry_count: i64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub row_count: Option<i64>,
}

/// Everything the coordinator needs to build a DISPATCH for a claimed job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: i64,
    pub file_id: i64,
    pub input_path: String,
    pub file_fingerprint: String,
    pub tag: String,
    pub binding: ParserBinding,
    pub retry_count: i64,
}

/// Worker liveness registration.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub worker_id: String,
    /// Milliseconds since epoch.
    pub last_heartbeat: i64,
    pub capabilities: Vec<String>,
}

/// Result of `retry_or_fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeued; carries the new retry count.
    Requeued(i64),
    /// Retry ceiling reached; job failed with `exceeded_retries`.
    Exhausted,
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub requeued: Vec<i64>,
    pub exhausted: Vec<i64>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.exhausted.is_empty()
    }
}

/// Lineage event kinds. The log is append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    FileDiscovered,
    FileTagged,
    FileRetagged,
    JobQueued,
    JobOrphaned,
    JobSucceeded,
    JobFailed,
    JobCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FileDiscovered => "file.discovered",
            EventType::FileTagged => "file.tagged",
            EventType::FileRetagged => "file.retagged",
            EventType::JobQueued => "job.queued",
            EventType::JobOrphaned => "job.orphaned",
            EventType::JobSucceeded => "job.succeeded",
            EventType::JobFailed => "job.failed",
            EventType::JobCancelled => "job.cancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file.discovered" => Ok(EventType::FileDiscovered),
            "file.tagged" => Ok(EventType::FileTagged),
            "file.retagged" => Ok(EventType::FileRetagged),
            "job.queued" => Ok(EventType::JobQueued),
            "job.orphaned" => Ok(EventType::JobOrphaned),
            "job.succeeded" => Ok(EventType::JobSucceeded),
            "job.failed" => Ok(EventType::JobFailed),
            "job.cancelled" => Ok(EventType::JobCancelled),
            _ => Err(format!("Invalid event type: '{}'", s)),
        }
    }
}

/// One lineage log entry.
#[derive(Debug, Clone)]
pub struct LineageEvent {
    pub id: i64,
    pub event_type: EventType,
    pub event_time: String,
    pub file_fingerprint: Option<String>,
    pub job_id: Option<i64>,
    pub parser_name: Option<String>,
    pub parser_version: Option<String>,
    pub output_path: Option<String>,
    pub row_count: Option<i64>,
}

/// Builder-ish helper for appending events without a pile of Nones at call sites.
#[derive(Debug, Clone, Default)]
pub struct EventDetails {
    pub file_fingerprint: Option<String>,
    pub job_id: Option<i64>,
    pub parser_name: Option<String>,
    pub parser_version: Option<String>,
    pub output_path: Option<String>,
    pub row_count: Option<i64>,
}

impl EventDetails {
    pub fn for_file(fingerprint: &str) -> Self {
        Self {
            file_fingerprint: Some(fingerprint.to_string()),
            ..Default::default()
        }
    }

    pub fn for_job(job_id: i64, fingerprint: &str) -> Self {
        Self {
            file_fingerprint: Some(fingerprint.to_string()),
            job_id: Some(job_id),
            ..Default::default()
        }
    }

    pub fn parser(mut self, name: &str, version: &str) -> Self {
        self.parser_name = Some(name.to_string());
        self.parser_version = Some(version.to_string());
        self
    }

    pub fn output(mut self, path: &str, rows: i64) -> Self {
        self.output_path = Some(path.to_string());
        self.row_count = Some(rows);
        self
    }
}
