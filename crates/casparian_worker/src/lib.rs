//! Worker node for the execution fabric.
//!
//! A worker keeps one DEALER session to the sentinel, provisions cached
//! per-parser environments, runs untrusted parser code in isolated guest
//! subprocesses, and streams lineage-stamped record batches into sinks.

pub mod bridge;
pub mod cancel;
pub mod env_manager;
pub mod runner;
pub mod schema_validation;
pub mod worker;

pub use cancel::CancellationToken;
pub use worker::{Worker, WorkerConfig};

use casparian_protocol::types::ErrorKind;
use thiserror::Error;

/// A job-level failure with its canonical error kind.
///
/// The kind decides retriability at the coordinator; the message is surfaced
/// verbatim on the job row.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type JobResult<T> = std::result::Result<T, JobError>;

/// Embedded guest shim, materialized into each job's temp directory.
pub const GUEST_SHIM_SOURCE: &str = include_str!("../shim/guest_shim.py");

/// Embedded fixture parser for end-to-end testing without real parsers.
/// Honors CF_FIXTURE_MODE (rows | sleep | collision | error).
pub const FIXTURE_PARSER_SOURCE: &str = include_str!("../shim/fixture_parser.py");
