//! Control API for the sentinel.
//!
//! A JSON request/response socket so external tooling can inspect and
//! cancel jobs without direct catalog access while the sentinel is running.
//!
//! # Protocol
//!
//! REP-style socket, one JSON `ControlRequest` in, one JSON
//! `ControlResponse` out.

use casparian_catalog::JobRecord;
use casparian_protocol::types::JobState;
use serde::{Deserialize, Serialize};

/// Control API request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlRequest {
    /// List jobs with optional status filter
    ListJobs {
        status: Option<JobState>,
        limit: Option<i64>,
        offset: Option<i64>,
    },
    /// Get a single job by ID
    GetJob { job_id: i64 },
    /// Request cancellation of a job
    CancelJob { job_id: i64 },
    /// Get queue statistics
    GetQueueStats,
    /// Ping/health check
    Ping,
}

/// Control API response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlResponse {
    Jobs(Vec<JobInfo>),
    Job(Option<JobInfo>),
    CancelResult { success: bool, message: String },
    QueueStats(QueueStatsInfo),
    Pong,
    Error { code: String, message: String },
}

/// Job information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: i64,
    pub file_id: i64,
    pub file_fingerprint: String,
    pub parser_binding_id: i64,
    pub status: JobState,
    pub retry_count: i64,
    pub worker_id: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub output_path: Option<String>,
    pub row_count: Option<i64>,
}

impl From<JobRecord> for JobInfo {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id,
            file_id: job.file_id,
            file_fingerprint: job.file_fingerprint,
            parser_binding_id: job.parser_binding_id,
            status: job.status,
            retry_count: job.retry_count,
            worker_id: job.worker_id,
            error_kind: job.error_kind,
            error_message: job.error_message,
            output_path: job.output_path,
            row_count: job.row_count,
        }
    }
}

/// Queue statistics for API responses
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStatsInfo {
    pub queued: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl ControlResponse {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = ControlRequest::ListJobs {
            status: Some(JobState::Queued),
            limit: Some(10),
            offset: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("ListJobs"));
        assert!(json.contains("QUEUED"));

        let parsed: ControlRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            ControlRequest::ListJobs { status, limit, .. } => {
                assert_eq!(status, Some(JobState::Queued));
                assert_eq!(limit, Some(10));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_cancel_request_roundtrip() {
        let req = ControlRequest::CancelJob { job_id: 42 };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: ControlRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            ControlRequest::CancelJob { job_id } => assert_eq!(job_id, 42),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_error_response() {
        let resp = ControlResponse::error("NOT_FOUND", "Job not found");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("Error"));
        assert!(json.contains("NOT_FOUND"));
    }
}
