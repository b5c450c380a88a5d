//! Protocol payload types and canonical enums.
//!
//! Everything that crosses the wire or the catalog boundary is defined here
//! so every crate agrees on spellings and status transitions.

use crate::schema::SchemaContract;
use crate::sink::SinkSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Job identity
// ============================================================================

/// Canonical job identifier across the system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn to_i64(self) -> Result<i64, JobIdError> {
        i64::try_from(self.0).map_err(|_| JobIdError::Overflow(self.0))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobId> for u64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl TryFrom<i64> for JobId {
    type Error = JobIdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(JobIdError::Negative(value));
        }
        Ok(JobId::new(value as u64))
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u64>()
            .map_err(|_| JobIdError::Parse(s.to_string()))?;
        Ok(JobId::new(value))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobIdError {
    #[error("job id cannot be negative: {0}")]
    Negative(i64),
    #[error("job id does not fit in i64: {0}")]
    Overflow(u64),
    #[error("invalid job id: {0}")]
    Parse(String),
}

// ============================================================================
// File lifecycle
// ============================================================================

/// File row status - lifecycle of a discovered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Seen by the scanner, no tag yet
    #[default]
    Discovered,
    /// Tagged (by rule or manually), not yet matched to jobs
    Tagged,
    /// At least one non-terminal job references this file
    Queued,
    /// A job for this file is executing
    Running,
    /// All matched jobs concluded successfully
    Done,
    /// A job for this file failed terminally
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "discovered",
            FileStatus::Tagged => "tagged",
            FileStatus::Queued => "queued",
            FileStatus::Running => "running",
            FileStatus::Done => "done",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discovered" => Ok(FileStatus::Discovered),
            "tagged" => Ok(FileStatus::Tagged),
            "queued" => Ok(FileStatus::Queued),
            "running" => Ok(FileStatus::Running),
            "done" => Ok(FileStatus::Done),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(format!("Invalid file status: '{}'", s)),
        }
    }
}

/// How a file got its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Manual,
    Rule,
    Inferred,
    #[default]
    None,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Manual => "manual",
            TagSource::Rule => "rule",
            TagSource::Inferred => "inferred",
            TagSource::None => "none",
        }
    }
}

impl FromStr for TagSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TagSource::Manual),
            "rule" => Ok(TagSource::Rule),
            "inferred" => Ok(TagSource::Inferred),
            "none" => Ok(TagSource::None),
            _ => Err(format!("Invalid tag source: '{}'", s)),
        }
    }
}

/// Outcome of a file upsert against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

// ============================================================================
// Job lifecycle
// ============================================================================

/// Job queue status. This is the CANONICAL definition - use it everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Job is queued and ready for a worker
    #[default]
    Queued,
    /// Job is currently being processed by a worker
    Running,
    /// Job completed successfully
    Succeeded,
    /// Job failed with an error
    Failed,
    /// Job was cancelled before completion
    Cancelled,
}

impl JobState {
    pub const ALL: &'static [JobState] = &[
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(JobState::Queued),
            "RUNNING" => Ok(JobState::Running),
            "SUCCEEDED" => Ok(JobState::Succeeded),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" | "CANCELED" => Ok(JobState::Cancelled),
            _ => Err(format!("Invalid job state: '{}'", s)),
        }
    }
}

/// Terminal outcome reported by a worker in CONCLUDE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }

    pub fn to_state(self) -> JobState {
        match self {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Canonical error kinds, independent of representation.
///
/// The retriable column drives the Coordinator's requeue decision; the
/// worker only reports the kind, it never loops on non-retriable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Scanner or guest input read failure
    IoRead,
    /// Scanner revalidation found a changed fingerprint
    HashMismatch,
    /// Environment provisioning failed
    EnvPrepareFailed,
    /// Guest never connected to the IPC socket
    GuestStartupTimeout,
    /// Guest produced no output or progress within the idle window
    GuestIdleTimeout,
    /// Guest exited abnormally mid-stream
    GuestCrashed,
    /// Parser raised inside the guest
    ParserError,
    /// Batch type/shape did not match the schema contract
    SchemaViolation,
    /// Parser emitted a reserved lineage column
    LineageCollision,
    /// Sink write failed after worker-local retries
    SinkWriteFailed,
    /// Cancelled by the coordinator
    Cancelled,
    /// Retry ceiling exhausted
    ExceededRetries,
    /// Bad header or version mismatch; session reset
    ProtocolError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IoRead => "io_read",
            ErrorKind::HashMismatch => "hash_mismatch",
            ErrorKind::EnvPrepareFailed => "env_prepare_failed",
            ErrorKind::GuestStartupTimeout => "guest_startup_timeout",
            ErrorKind::GuestIdleTimeout => "guest_idle_timeout",
            ErrorKind::GuestCrashed => "guest_crashed",
            ErrorKind::ParserError => "parser_error",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::LineageCollision => "lineage_collision",
            ErrorKind::SinkWriteFailed => "sink_write_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ExceededRetries => "exceeded_retries",
            ErrorKind::ProtocolError => "protocol_error",
        }
    }

    /// Whether the Coordinator may requeue a job that failed with this kind.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::IoRead
                | ErrorKind::GuestStartupTimeout
                | ErrorKind::GuestIdleTimeout
                | ErrorKind::GuestCrashed
                | ErrorKind::SinkWriteFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "io_read" => Ok(ErrorKind::IoRead),
            "hash_mismatch" => Ok(ErrorKind::HashMismatch),
            "env_prepare_failed" => Ok(ErrorKind::EnvPrepareFailed),
            "guest_startup_timeout" => Ok(ErrorKind::GuestStartupTimeout),
            "guest_idle_timeout" => Ok(ErrorKind::GuestIdleTimeout),
            "guest_crashed" => Ok(ErrorKind::GuestCrashed),
            "parser_error" => Ok(ErrorKind::ParserError),
            "schema_violation" => Ok(ErrorKind::SchemaViolation),
            "lineage_collision" => Ok(ErrorKind::LineageCollision),
            "sink_write_failed" => Ok(ErrorKind::SinkWriteFailed),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "exceeded_retries" => Ok(ErrorKind::ExceededRetries),
            "protocol_error" => Ok(ErrorKind::ProtocolError),
            _ => Err(format!("Invalid error kind: '{}'", s)),
        }
    }
}

// ============================================================================
// Session payloads
// ============================================================================

/// Payload for OpCode.IDENTIFY.
/// Worker -> Sentinel: handshake with identity and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub worker_id: String,
    /// Free-form capability strings; informational for scheduling.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Maximum concurrent jobs this worker accepts.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u32,
}

fn default_max_inflight() -> u32 {
    1
}

/// Payload for OpCode.HEARTBEAT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Sender wall clock, milliseconds since epoch.
    pub ts: i64,
    /// Jobs currently executing on the worker.
    pub in_flight: u32,
}

/// Payload for OpCode.ERR - session-level, distinct from job failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

// ============================================================================
// Job payloads
// ============================================================================

/// Payload for OpCode.DISPATCH.
/// Sentinel -> Worker: "Process this file; here is everything you need."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub parser_name: String,
    /// Short form of the parser source hash, stamped as `_cf_parser_version`.
    pub parser_version: String,
    /// Content hash of the parser source (binding identity).
    pub source_hash: String,
    /// Content fingerprint of the input file, stamped as `_cf_source_hash`.
    pub file_fingerprint: String,
    /// Tag the file matched; used for sink path templates.
    pub tag: String,
    pub input_path: String,
    /// Parser source code, materialized into the guest's temp dir.
    pub parser_source: String,
    /// Opaque dependency list handed to the environment provisioner.
    #[serde(default)]
    pub dependency_set: Vec<String>,
    pub schema_contract: SchemaContract,
    pub sink_spec: SinkSpec,
}

/// Payload for OpCode.RECEIPT - immediate ack of DISPATCH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReceipt {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for OpCode.CONCLUDE.
/// Worker -> Sentinel: terminal job outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcludePayload {
    pub outcome: JobOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

impl ConcludePayload {
    pub fn succeeded(output_path: String, row_count: u64) -> Self {
        Self {
            outcome: JobOutcome::Succeeded,
            error_kind: None,
            message: None,
            output_path: Some(output_path),
            row_count: Some(row_count),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: JobOutcome::Failed,
            error_kind: Some(kind),
            message: Some(message.into()),
            output_path: None,
            row_count: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outcome: JobOutcome::Cancelled,
            error_kind: Some(ErrorKind::Cancelled),
            message: None,
            output_path: None,
            row_count: None,
        }
    }
}

// ============================================================================
// Environment payloads
// ============================================================================

/// Payload for OpCode.PREPARE_ENV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareEnvCommand {
    pub parser_name: String,
    /// Opaque dependency list; the worker hashes it into an env key.
    pub dependency_set: Vec<String>,
}

/// Payload for OpCode.ENV_READY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvReadyPayload {
    pub env_handle: String,
    pub cached: bool,
}

// ============================================================================
// Deploy payload
// ============================================================================

/// Payload for OpCode.DEPLOY - register a parser binding.
///
/// The binding identity is `(parser_name, blake3(source_code))`; deploying
/// the same pair twice is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployCommand {
    pub parser_name: String,
    pub source_code: String,
    #[serde(default)]
    pub dependency_set: Vec<String>,
    pub subscribed_tags: Vec<String>,
    pub schema_contract: SchemaContract,
    pub sink_spec: SinkSpec,
}

impl DeployCommand {
    /// Content hash of the parser source (binding identity component).
    pub fn source_hash(&self) -> String {
        blake3::hash(self.source_code.as_bytes()).to_hex().to_string()
    }
}

/// Short parser version derived from a source hash (first 12 hex chars).
pub fn parser_version_from_hash(source_hash: &str) -> String {
    source_hash.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminal() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_state_roundtrip() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_str(state.as_str()).unwrap(), *state);
        }
    }

    #[test]
    fn test_error_kind_retriable_table() {
        // Retriable per the canonical taxonomy
        for kind in [
            ErrorKind::IoRead,
            ErrorKind::GuestStartupTimeout,
            ErrorKind::GuestIdleTimeout,
            ErrorKind::GuestCrashed,
            ErrorKind::SinkWriteFailed,
        ] {
            assert!(kind.is_retriable(), "{} should be retriable", kind);
        }
        // Never retried
        for kind in [
            ErrorKind::HashMismatch,
            ErrorKind::EnvPrepareFailed,
            ErrorKind::ParserError,
            ErrorKind::SchemaViolation,
            ErrorKind::LineageCollision,
            ErrorKind::Cancelled,
            ErrorKind::ExceededRetries,
            ErrorKind::ProtocolError,
        ] {
            assert!(!kind.is_retriable(), "{} should not be retriable", kind);
        }
    }

    #[test]
    fn test_error_kind_serde_spelling() {
        let json = serde_json::to_string(&ErrorKind::LineageCollision).unwrap();
        assert_eq!(json, "\"lineage_collision\"");
        let parsed: ErrorKind = serde_json::from_str("\"guest_crashed\"").unwrap();
        assert_eq!(parsed, ErrorKind::GuestCrashed);
    }

    #[test]
    fn test_conclude_payload_constructors() {
        let ok = ConcludePayload::succeeded("/out/1.parquet".into(), 2);
        assert_eq!(ok.outcome, JobOutcome::Succeeded);
        assert_eq!(ok.row_count, Some(2));

        let failed = ConcludePayload::failed(ErrorKind::ParserError, "boom");
        assert_eq!(failed.outcome, JobOutcome::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::ParserError));

        let cancelled = ConcludePayload::cancelled();
        assert_eq!(cancelled.outcome, JobOutcome::Cancelled);
        assert!(cancelled.output_path.is_none());
    }

    #[test]
    fn test_identify_tolerates_unknown_fields() {
        let json = r#"{"worker_id":"w1","capabilities":["*"],"max_inflight":2,"future_field":true}"#;
        let parsed: IdentifyPayload = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.worker_id, "w1");
        assert_eq!(parsed.max_inflight, 2);
    }

    #[test]
    fn test_deploy_source_hash_stable() {
        let contract = SchemaContract { columns: vec![] };
        let cmd = DeployCommand {
            parser_name: "p".into(),
            source_code: "def parse(path, config):\n    return []\n".into(),
            dependency_set: vec![],
            subscribed_tags: vec!["csv_tag".into()],
            schema_contract: contract,
            sink_spec: SinkSpec::Parquet {
                path_template: "{job_id}.parquet".into(),
            },
        };
        assert_eq!(cmd.source_hash(), cmd.source_hash());
        assert_eq!(parser_version_from_hash(&cmd.source_hash()).len(), 12);
    }
}
