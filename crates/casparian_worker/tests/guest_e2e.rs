//! End-to-end runner tests driving the embedded fixture parser through a
//! real guest subprocess.
//!
//! These need `python3` with `pyarrow` on PATH, so they are ignored by
//! default. Run them with:
//!     cargo test -p casparian_worker -- --ignored --test-threads=1
//! (single-threaded because the fixture modes are selected via env vars).

use casparian_protocol::schema::{ColumnSpec, LogicalType, SchemaContract};
use casparian_protocol::sink::SinkSpec;
use casparian_protocol::types::{DispatchCommand, ErrorKind, JobId, JobOutcome};
use casparian_worker::env_manager::EnvManager;
use casparian_worker::runner::{execute_job, RunnerConfig};
use casparian_worker::{CancellationToken, FIXTURE_PARSER_SOURCE};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn contract() -> SchemaContract {
    SchemaContract::new(vec![
        ColumnSpec::new("a", LogicalType::Int64, false),
        ColumnSpec::new("b", LogicalType::String, true),
    ])
}

fn dispatch(input: &Path, out_dir: &Path) -> DispatchCommand {
    DispatchCommand {
        parser_name: "fixture".to_string(),
        parser_version: "fixture000001".to_string(),
        source_hash: "f".repeat(64),
        file_fingerprint: "1".repeat(64),
        tag: "fixture_tag".to_string(),
        input_path: input.display().to_string(),
        parser_source: FIXTURE_PARSER_SOURCE.to_string(),
        dependency_set: vec![],
        schema_contract: contract(),
        sink_spec: SinkSpec::Parquet {
            path_template: out_dir.join("{job_id}.parquet").display().to_string(),
        },
    }
}

fn runner_config() -> RunnerConfig {
    RunnerConfig {
        output_root: None,
        guest_startup_timeout: Duration::from_secs(10),
        guest_idle_timeout: Duration::from_secs(20),
        env_prepare_timeout: Duration::from_secs(30),
        row_group_rows: 100_000,
    }
}

fn python_available() -> bool {
    which_python().is_some()
}

fn which_python() -> Option<std::path::PathBuf> {
    which::which("python3").or_else(|_| which::which("python")).ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires python3 with pyarrow"]
async fn test_fixture_rows_to_parquet() {
    assert!(python_available());
    std::env::set_var("CF_FIXTURE_MODE", "rows");
    std::env::set_var("CF_FIXTURE_ROWS", "4");

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, b"payload").unwrap();

    let env = Arc::new(EnvManager::new(Some(dir.path().join("envs"))).unwrap());
    let payload = execute_job(
        env,
        runner_config(),
        JobId::new(11),
        dispatch(&input, dir.path()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(payload.outcome, JobOutcome::Succeeded, "{:?}", payload.message);
    assert_eq!(payload.row_count, Some(4));
    let out = dir.path().join("11.parquet");
    assert!(out.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires python3 with pyarrow"]
async fn test_fixture_collision_fails_without_output() {
    assert!(python_available());
    std::env::set_var("CF_FIXTURE_MODE", "collision");
    std::env::set_var("CF_FIXTURE_ROWS", "2");

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, b"payload").unwrap();

    let env = Arc::new(EnvManager::new(Some(dir.path().join("envs"))).unwrap());
    let payload = execute_job(
        env,
        runner_config(),
        JobId::new(12),
        dispatch(&input, dir.path()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(payload.outcome, JobOutcome::Failed);
    assert_eq!(payload.error_kind, Some(ErrorKind::LineageCollision));
    assert!(!dir.path().join("12.parquet").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires python3 with pyarrow"]
async fn test_fixture_error_is_parser_error() {
    assert!(python_available());
    std::env::set_var("CF_FIXTURE_MODE", "error");
    std::env::set_var("CF_FIXTURE_MESSAGE", "deliberate fixture failure");

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, b"payload").unwrap();

    let env = Arc::new(EnvManager::new(Some(dir.path().join("envs"))).unwrap());
    let payload = execute_job(
        env,
        runner_config(),
        JobId::new(13),
        dispatch(&input, dir.path()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(payload.outcome, JobOutcome::Failed);
    assert_eq!(payload.error_kind, Some(ErrorKind::ParserError));
    assert!(payload
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("deliberate fixture failure"));
    assert!(!dir.path().join("13.parquet").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires python3 with pyarrow"]
async fn test_fixture_sleep_cancellation_leaves_no_output() {
    assert!(python_available());
    std::env::set_var("CF_FIXTURE_MODE", "sleep");
    std::env::set_var("CF_FIXTURE_SLEEP", "30");

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, b"payload").unwrap();

    let env = Arc::new(EnvManager::new(Some(dir.path().join("envs"))).unwrap());
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let start = std::time::Instant::now();
    let payload = execute_job(
        env,
        runner_config(),
        JobId::new(14),
        dispatch(&input, dir.path()),
        cancel,
    )
    .await;

    assert_eq!(payload.outcome, JobOutcome::Cancelled);
    // Cancellation plus the grace interval, well before the 30s sleep ends.
    assert!(start.elapsed() < Duration::from_secs(15));
    assert!(!dir.path().join("14.parquet").exists());
}
