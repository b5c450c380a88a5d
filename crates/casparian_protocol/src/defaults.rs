//! Canonical default values shared across control/data plane.

pub const DEFAULT_SENTINEL_BIND_ADDR: &str = "tcp://127.0.0.1:5555";
pub const DEFAULT_CONTROL_ADDR: &str = "tcp://127.0.0.1:5556";
pub const DEFAULT_CATALOG_URL: &str = "sqlite:casparian_flow.db";

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 15_000;
pub const DEFAULT_RETRY_CEILING: u32 = 3;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_MAX_INFLIGHT_JOBS: u32 = 1;
pub const DEFAULT_GUEST_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_GUEST_STARTUP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ENV_PREPARE_TIMEOUT_MS: u64 = 300_000;

/// Grace period between polite guest termination and SIGKILL.
pub const ABORT_GRACE_MS: u64 = 5_000;

/// Worker-local retries for transient sink/IO errors within one job.
pub const WORKER_LOCAL_RETRY_LIMIT: u32 = 2;

pub const DEFAULT_ROW_GROUP_ROWS: usize = 100_000;
/// Row-group flush also triggers at this much buffered decoded data.
pub const DEFAULT_ROW_GROUP_BYTES: usize = 128 * 1024 * 1024;

pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";
