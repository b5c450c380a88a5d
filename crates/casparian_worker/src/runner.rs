//! Per-job execution: environment, guest spawn, schema validation, lineage
//! stamping, sink writing, and the worker-local retry loop.

use casparian_protocol::defaults::WORKER_LOCAL_RETRY_LIMIT;
use casparian_protocol::types::{ConcludePayload, DispatchCommand, ErrorKind, JobId};
use casparian_sinks::{create_sink, stamp_lineage, stamped_schema, JobContext, LineageStamp, SinkTuning};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bridge::{run_guest, BridgeConfig};
use crate::cancel::CancellationToken;
use crate::env_manager::EnvManager;
use crate::schema_validation::{contract_arrow_schema, validate_batch};
use crate::{JobError, JobResult, GUEST_SHIM_SOURCE};

/// Knobs the runner needs beyond the dispatch itself.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub output_root: Option<PathBuf>,
    pub guest_startup_timeout: Duration,
    pub guest_idle_timeout: Duration,
    pub env_prepare_timeout: Duration,
    pub row_group_rows: usize,
}

/// Execute one dispatched job to a terminal CONCLUDE payload.
///
/// Worker-local policy: attempts with a transient kind (`sink_write_failed`,
/// `io_read`) are retried in place up to the local limit; every other kind
/// reports immediately. Cancellation always wins.
pub async fn execute_job(
    env_manager: Arc<EnvManager>,
    config: RunnerConfig,
    job_id: JobId,
    cmd: DispatchCommand,
    cancel: CancellationToken,
) -> ConcludePayload {
    // Implicit environment preparation; DISPATCH does not require a prior
    // PREPARE_ENV round trip.
    let prepare = tokio::time::timeout(
        config.env_prepare_timeout,
        env_manager.prepare(&cmd.dependency_set),
    )
    .await;
    let prepared = match prepare {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(e)) => {
            return ConcludePayload::failed(ErrorKind::EnvPrepareFailed, e.to_string());
        }
        Err(_) => {
            return ConcludePayload::failed(
                ErrorKind::EnvPrepareFailed,
                format!(
                    "environment preparation exceeded {:.0}s",
                    config.env_prepare_timeout.as_secs_f64()
                ),
            );
        }
    };

    let mut attempt: u32 = 0;
    loop {
        let interpreter = prepared.interpreter.clone();
        let attempt_config = config.clone();
        let attempt_cmd = cmd.clone();
        let attempt_cancel = cancel.clone();

        let result = tokio::task::spawn_blocking(move || {
            run_attempt(&attempt_config, &interpreter, job_id, &attempt_cmd, &attempt_cancel)
        })
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(join_err) => Err(JobError::new(
                ErrorKind::GuestCrashed,
                format!("job task panicked: {join_err}"),
            )),
        };

        match outcome {
            Ok((output_path, rows)) => {
                info!("[Job {}] Succeeded: {} rows -> {}", job_id, rows, output_path);
                return ConcludePayload::succeeded(output_path, rows);
            }
            Err(err) if err.kind == ErrorKind::Cancelled => {
                info!("[Job {}] Cancelled", job_id);
                return ConcludePayload::cancelled();
            }
            Err(err) => {
                let locally_retriable =
                    matches!(err.kind, ErrorKind::SinkWriteFailed | ErrorKind::IoRead);
                if locally_retriable && attempt < WORKER_LOCAL_RETRY_LIMIT && !cancel.is_cancelled()
                {
                    attempt += 1;
                    warn!(
                        "[Job {}] Attempt {} failed with {}, retrying locally: {}",
                        job_id, attempt, err.kind, err.message
                    );
                    continue;
                }
                warn!("[Job {}] Failed ({}): {}", job_id, err.kind, err.message);
                return ConcludePayload::failed(err.kind, err.message);
            }
        }
    }
}

/// One synchronous attempt: materialize, spawn, stream, commit.
fn run_attempt(
    config: &RunnerConfig,
    interpreter: &std::path::Path,
    job_id: JobId,
    cmd: &DispatchCommand,
    cancel: &CancellationToken,
) -> JobResult<(String, u64)> {
    let work_dir = tempfile::tempdir().map_err(|e| {
        JobError::new(ErrorKind::IoRead, format!("failed to create job temp dir: {e}"))
    })?;

    let shim_path = work_dir.path().join("guest_shim.py");
    let parser_path = work_dir.path().join("parser.py");
    let contract_path = work_dir.path().join("contract.json");
    let contract_json = serde_json::to_vec(&cmd.schema_contract).map_err(|e| {
        JobError::new(ErrorKind::ProtocolError, format!("unserializable contract: {e}"))
    })?;
    for (path, bytes) in [
        (&shim_path, GUEST_SHIM_SOURCE.as_bytes()),
        (&parser_path, cmd.parser_source.as_bytes()),
        (&contract_path, contract_json.as_slice()),
    ] {
        std::fs::write(path, bytes).map_err(|e| {
            JobError::new(
                ErrorKind::IoRead,
                format!("failed to materialize {}: {e}", path.display()),
            )
        })?;
    }

    let job_id_i64 = job_id
        .to_i64()
        .map_err(|e| JobError::new(ErrorKind::ProtocolError, e.to_string()))?;

    let declared = contract_arrow_schema(&cmd.schema_contract);
    let sink_schema = stamped_schema(&declared)
        .map_err(|e| JobError::new(ErrorKind::LineageCollision, e.to_string()))?;

    let ctx = JobContext {
        job_id,
        tag: cmd.tag.clone(),
        parser_name: cmd.parser_name.clone(),
        output_root: config.output_root.clone(),
    };
    let tuning = SinkTuning {
        row_group_rows: config.row_group_rows,
        ..Default::default()
    };
    let mut sink = create_sink(&cmd.sink_spec, &ctx, tuning)
        .map_err(|e| JobError::new(ErrorKind::SinkWriteFailed, e.to_string()))?;
    sink.open(sink_schema.clone())
        .map_err(|e| JobError::new(ErrorKind::SinkWriteFailed, e.to_string()))?;

    let stamp = LineageStamp::new(
        cmd.file_fingerprint.clone(),
        job_id_i64,
        cmd.parser_version.clone(),
    );

    let bridge_config = BridgeConfig {
        interpreter: interpreter.to_path_buf(),
        shim_path,
        parser_path,
        contract_path,
        input_path: cmd.input_path.clone(),
        job_id,
        work_dir: work_dir.path().to_path_buf(),
        startup_timeout: config.guest_startup_timeout,
        idle_timeout: config.guest_idle_timeout,
        cancel: cancel.clone(),
    };

    let contract = &cmd.schema_contract;
    let write_schema = sink_schema.clone();
    let stream_result = run_guest(&bridge_config, &mut |batch| {
        validate_batch(contract, &batch)?;
        let stamped = stamp_lineage(&batch, &stamp)
            .map_err(|e| JobError::new(ErrorKind::SinkWriteFailed, e.to_string()))?;
        // Align to the sink's schema: the guest may declare looser
        // nullability than the contract; validation already proved the data
        // fits.
        let aligned =
            arrow::array::RecordBatch::try_new(write_schema.clone(), stamped.columns().to_vec())
                .map_err(|e| JobError::new(ErrorKind::SchemaViolation, e.to_string()))?;
        sink.write_batch(&aligned)
            .map_err(|e| JobError::new(ErrorKind::SinkWriteFailed, e.to_string()))
    });

    match stream_result {
        Ok(()) => {
            let (path, rows) = sink
                .close()
                .map_err(|e| JobError::new(ErrorKind::SinkWriteFailed, e.to_string()))?;
            Ok((path.display().to_string(), rows))
        }
        Err(err) => {
            // Whatever happened, nothing of this attempt may stay visible.
            if let Err(abort_err) = sink.abort() {
                warn!("[Job {}] Sink abort failed: {}", job_id, abort_err);
            }
            Err(err)
        }
    }
}
