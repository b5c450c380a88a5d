//! Sentinel - control plane for the execution fabric.
//!
//! Owns the ROUTER socket to the worker pool, matches tagged files into
//! jobs, dispatches claimed jobs to workers with spare capacity, sweeps
//! orphans on the liveness window, and applies the retry policy on CONCLUDE.
//!
//! The sentinel holds no durable state: everything is reconstructible from
//! the catalog, so a restart only loses in-memory socket identities.

use anyhow::{Context, Result};
use casparian_catalog::{CancelOutcome, Catalog, ClaimedJob, RetryDecision};
use casparian_protocol::config::CoreConfig;
use casparian_protocol::error::ProtocolError;
use casparian_protocol::types::{
    ConcludePayload, DeployCommand, DispatchCommand, ErrorKind, ErrorPayload, HeartbeatPayload,
    IdentifyPayload, JobId, JobOutcome, JobReceipt,
};
use casparian_protocol::{Message, OpCode};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use zeromq::{RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::control::{ControlRequest, ControlResponse, QueueStatsInfo};

/// Dispatch backoff base (ms) when the queue is empty or blocked.
const DISPATCH_BACKOFF_BASE_MS: u64 = 50;
/// Dispatch backoff max (ms).
const DISPATCH_BACKOFF_MAX_MS: u64 = 1_000;
/// Dispatch backoff jitter cap (ms).
const DISPATCH_BACKOFF_JITTER_MS: u64 = 50;

/// How often the matching tick turns tagged files into queued jobs.
const MATCH_INTERVAL: Duration = Duration::from_millis(1_000);

/// Sentinel configuration.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub bind_addr: String,
    /// Optional control API bind address. None disables the control API.
    pub control_addr: Option<String>,
    pub catalog_url: String,
    pub sweep_interval: Duration,
    pub liveness_window_ms: i64,
    pub retry_ceiling: u32,
}

impl SentinelConfig {
    pub fn from_core(core: &CoreConfig, bind_addr: String, control_addr: Option<String>) -> Self {
        Self {
            bind_addr,
            control_addr,
            catalog_url: core.catalog.url.clone(),
            sweep_interval: Duration::from_millis(core.coordinator.sweep_interval_ms),
            liveness_window_ms: core.coordinator.liveness_window_ms as i64,
            retry_ceiling: core.coordinator.retry_ceiling,
        }
    }
}

/// Connected worker state (in-memory only; identity is the map key).
#[derive(Debug, Clone)]
pub struct ConnectedWorker {
    pub worker_id: String,
    /// Milliseconds since epoch of the last frame from this worker.
    pub last_seen: i64,
    pub capabilities: Vec<String>,
    pub max_inflight: u32,
    /// Jobs dispatched and not yet concluded (includes un-acked dispatches).
    pub active_jobs: HashSet<u64>,
}

impl ConnectedWorker {
    fn new(payload: IdentifyPayload) -> Self {
        Self {
            worker_id: payload.worker_id,
            last_seen: now_millis(),
            capabilities: payload.capabilities,
            max_inflight: payload.max_inflight.max(1),
            active_jobs: HashSet::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        (self.active_jobs.len() as u32) < self.max_inflight
    }
}

/// Main sentinel control plane.
pub struct Sentinel {
    config: SentinelConfig,
    socket: RouterSocket,
    control_socket: Option<RepSocket>,
    catalog: Catalog,
    workers: HashMap<Vec<u8>, ConnectedWorker>,
    running: bool,
    last_sweep: Instant,
    last_match: Instant,
    dispatch_backoff_ms: u64,
    dispatch_cooldown_until: Option<Instant>,
}

impl Sentinel {
    /// Open the catalog and bind the sockets.
    pub async fn bind(config: SentinelConfig) -> Result<Self> {
        let catalog = Catalog::open(&config.catalog_url)
            .await
            .context("Failed to open catalog")?;

        let mut socket = RouterSocket::new();
        socket
            .bind(&config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind ROUTER socket to {}", config.bind_addr))?;
        info!("Sentinel bound to {}", config.bind_addr);

        let control_socket = if let Some(addr) = &config.control_addr {
            let mut ctrl = RepSocket::new();
            ctrl.bind(addr)
                .await
                .with_context(|| format!("Failed to bind control socket to {addr}"))?;
            info!("Control API bound to {}", addr);
            Some(ctrl)
        } else {
            None
        };

        Ok(Self {
            config,
            socket,
            control_socket,
            catalog,
            workers: HashMap::new(),
            running: false,
            last_sweep: Instant::now(),
            last_match: Instant::now()
                .checked_sub(MATCH_INTERVAL)
                .unwrap_or_else(Instant::now),
            dispatch_backoff_ms: 0,
            dispatch_cooldown_until: None,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Main event loop.
    pub async fn run(&mut self) -> Result<()> {
        self.running = true;
        info!("Sentinel event loop started");

        while self.running {
            match self.recv_message().await {
                Ok(Some((identity, frames))) => {
                    if let Err(e) = self.handle_frames(identity, frames).await {
                        error!("Error handling message: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Recv error: {}", e);
                }
            }

            if let Err(e) = self.handle_control_request().await {
                error!("Control API error: {}", e);
            }

            if self.last_match.elapsed() >= MATCH_INTERVAL {
                self.last_match = Instant::now();
                match self.catalog.match_tagged_files().await {
                    Ok(created) if !created.is_empty() => {
                        info!("Matched {} new job(s)", created.len());
                        // Fresh work cancels any dispatch backoff.
                        self.dispatch_cooldown_until = None;
                        self.dispatch_backoff_ms = 0;
                    }
                    Ok(_) => {}
                    Err(e) => error!("Matching failed: {}", e),
                }
            }

            if self.last_sweep.elapsed() >= self.config.sweep_interval {
                self.last_sweep = Instant::now();
                if let Err(e) = self.sweep().await {
                    error!("Sweep failed: {}", e);
                }
            }

            if let Err(e) = self.dispatch_loop().await {
                error!("Dispatch error: {}", e);
            }
        }

        info!("Sentinel stopped");
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Receive next worker frame set with timeout.
    ///
    /// ROUTER receives multipart: [identity, header, payload].
    async fn recv_message(&mut self) -> Result<Option<(Vec<u8>, Vec<Vec<u8>>)>> {
        let timeout = Duration::from_millis(100);
        let multipart = match tokio::time::timeout(timeout, self.socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => return Err(anyhow::anyhow!("ZMQ error: {}", e)),
            Err(_) => return Ok(None),
        };

        let mut parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
        if parts.len() < 3 {
            warn!("Expected 3 frames [identity, header, payload], got {}", parts.len());
            return Ok(None);
        }
        let identity = parts.remove(0);
        Ok(Some((identity, parts)))
    }

    async fn handle_frames(&mut self, identity: Vec<u8>, frames: Vec<Vec<u8>>) -> Result<()> {
        let msg = match Message::unpack(&frames) {
            Ok(msg) => msg,
            Err(err) => {
                // Bad header or version byte: session-level protocol error.
                warn!("Protocol error from peer: {}", err);
                self.send_protocol_error(&identity, &err).await?;
                self.teardown_worker(&identity, "protocol error").await;
                return Ok(());
            }
        };

        match msg.header.opcode {
            OpCode::Identify => {
                let payload: IdentifyPayload = msg.decode()?;
                self.register_worker(identity, payload).await?;
            }

            OpCode::Heartbeat => {
                let payload: HeartbeatPayload = msg.decode()?;
                if let Some(worker) = self.workers.get_mut(&identity) {
                    worker.last_seen = now_millis();
                    let worker_id = worker.worker_id.clone();
                    let capabilities = worker.capabilities.clone();
                    debug!(
                        "Heartbeat from {} ({} in flight)",
                        worker_id, payload.in_flight
                    );
                    self.catalog
                        .record_heartbeat(&worker_id, now_millis(), &capabilities)
                        .await?;
                } else {
                    debug!("Heartbeat from unknown identity ({} bytes)", identity.len());
                }
            }

            OpCode::Receipt => {
                let receipt: JobReceipt = msg.decode()?;
                self.handle_receipt(identity, msg.header.job_id, receipt)
                    .await?;
            }

            OpCode::Conclude => {
                let payload: ConcludePayload = msg.decode()?;
                self.handle_conclude(identity, msg.header.job_id, payload)
                    .await?;
            }

            OpCode::EnvReady => {
                let payload: casparian_protocol::types::EnvReadyPayload = msg.decode()?;
                info!(
                    "ENV_READY {} (cached: {})",
                    payload.env_handle, payload.cached
                );
            }

            OpCode::Err => {
                let err: ErrorPayload = msg.decode()?;
                error!("Session ERR from worker ({}): {}", err.kind, err.message);
                if err.kind == ErrorKind::ProtocolError {
                    self.teardown_worker(&identity, "worker reported protocol error")
                        .await;
                }
            }

            OpCode::Deploy => {
                let cmd: DeployCommand = msg.decode()?;
                match self.handle_deploy(&cmd).await {
                    Ok(created) => {
                        info!(
                            "Deployed parser {} ({})",
                            cmd.parser_name,
                            if created { "new binding" } else { "already registered" }
                        );
                        let ack = JobReceipt {
                            accepted: true,
                            reason: if created {
                                None
                            } else {
                                Some("binding already registered".to_string())
                            },
                        };
                        self.send_to_worker(&identity, OpCode::Receipt, JobId::new(0), &ack)
                            .await?;
                    }
                    Err(e) => {
                        error!("Deploy failed: {}", e);
                        let payload = ErrorPayload {
                            kind: ErrorKind::ProtocolError,
                            message: e.to_string(),
                        };
                        self.send_to_worker(&identity, OpCode::Err, JobId::new(0), &payload)
                            .await?;
                    }
                }
            }

            _ => {
                warn!("Unhandled opcode: {:?}", msg.header.opcode);
            }
        }

        Ok(())
    }

    /// Register a worker from IDENTIFY.
    async fn register_worker(&mut self, identity: Vec<u8>, payload: IdentifyPayload) -> Result<()> {
        let worker = ConnectedWorker::new(payload);
        info!(
            "Worker joined [{}] (max_inflight {})",
            worker.worker_id, worker.max_inflight
        );
        self.catalog
            .record_heartbeat(&worker.worker_id, now_millis(), &worker.capabilities)
            .await?;
        self.workers.insert(identity, worker);
        Ok(())
    }

    /// RECEIPT handling: a rejected dispatch defers the job with no retry
    /// penalty; an accepted one leaves it running on the worker.
    async fn handle_receipt(
        &mut self,
        identity: Vec<u8>,
        job_id: JobId,
        receipt: JobReceipt,
    ) -> Result<()> {
        let Some(worker) = self.workers.get_mut(&identity) else {
            warn!("RECEIPT from unknown worker for job {}", job_id);
            return Ok(());
        };
        worker.last_seen = now_millis();

        if receipt.accepted {
            debug!("Job {} accepted by {}", job_id, worker.worker_id);
            return Ok(());
        }

        warn!(
            "Job {} rejected by {} ({}), deferring",
            job_id,
            worker.worker_id,
            receipt.reason.as_deref().unwrap_or("no reason")
        );
        worker.active_jobs.remove(&job_id.as_u64());
        let job_id = job_id
            .to_i64()
            .map_err(|e| anyhow::anyhow!("job id not representable: {e}"))?;
        self.catalog.defer_job(job_id).await?;
        Ok(())
    }

    /// CONCLUDE handling: apply the outcome and the retry policy.
    async fn handle_conclude(
        &mut self,
        identity: Vec<u8>,
        job_id: JobId,
        payload: ConcludePayload,
    ) -> Result<()> {
        if let Some(worker) = self.workers.get_mut(&identity) {
            worker.last_seen = now_millis();
            worker.active_jobs.remove(&job_id.as_u64());
        }

        let job_id_db = job_id
            .to_i64()
            .map_err(|e| anyhow::anyhow!("job id not representable: {e}"))?;

        apply_conclude(&self.catalog, job_id_db, &payload, self.config.retry_ceiling).await?;
        Ok(())
    }

    /// Register or look up a deployed binding.
    async fn handle_deploy(&self, cmd: &DeployCommand) -> Result<bool> {
        let (_, created) = self
            .catalog
            .register_binding(
                &cmd.parser_name,
                &cmd.source_code,
                &cmd.dependency_set,
                &cmd.subscribed_tags,
                &cmd.schema_contract,
                &cmd.sink_spec,
            )
            .await?;
        Ok(created)
    }

    /// Drop a worker's session. In-flight jobs are requeued as
    /// `guest_crashed` per the propagation policy.
    async fn teardown_worker(&mut self, identity: &[u8], reason: &str) {
        let Some(worker) = self.workers.remove(identity) else {
            return;
        };
        warn!("Tearing down worker [{}]: {}", worker.worker_id, reason);
        for job in worker.active_jobs {
            if let Ok(job_id) = i64::try_from(job) {
                if let Err(e) = self
                    .catalog
                    .retry_or_fail(
                        job_id,
                        ErrorKind::GuestCrashed,
                        &format!("worker session reset: {reason}"),
                        self.config.retry_ceiling,
                    )
                    .await
                {
                    error!("Failed to requeue job {} on teardown: {}", job_id, e);
                }
            }
        }
        if let Err(e) = self.catalog.remove_registration(&worker.worker_id).await {
            error!("Failed to remove registration: {}", e);
        }
    }

    /// Orphan sweep: catalog-side requeue plus in-memory cleanup.
    async fn sweep(&mut self) -> Result<()> {
        let now = now_millis();
        let report = self
            .catalog
            .sweep_stale(now, self.config.liveness_window_ms, self.config.retry_ceiling)
            .await?;

        if !report.is_empty() {
            warn!(
                "Sweep: {} requeued, {} exhausted",
                report.requeued.len(),
                report.exhausted.len()
            );
            let swept: HashSet<u64> = report
                .requeued
                .iter()
                .chain(report.exhausted.iter())
                .filter_map(|id| u64::try_from(*id).ok())
                .collect();
            for worker in self.workers.values_mut() {
                worker.active_jobs.retain(|job| !swept.contains(job));
            }
        }

        // Forget socket identities that have gone silent past the window.
        let cutoff = now - self.config.liveness_window_ms;
        let stale: Vec<Vec<u8>> = self
            .workers
            .iter()
            .filter(|(_, w)| w.last_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for identity in stale {
            if let Some(worker) = self.workers.remove(&identity) {
                info!("Removing stale worker [{}]", worker.worker_id);
            }
        }

        Ok(())
    }

    /// Assign claimed jobs to every worker with spare capacity.
    async fn dispatch_loop(&mut self) -> Result<()> {
        if let Some(cooldown_until) = self.dispatch_cooldown_until {
            if Instant::now() < cooldown_until {
                return Ok(());
            }
        }

        let candidates: Vec<Vec<u8>> = self
            .workers
            .iter()
            .filter(|(_, w)| w.has_capacity())
            .map(|(id, _)| id.clone())
            .collect();

        if candidates.is_empty() {
            return Ok(());
        }

        let mut dispatched_any = false;

        for identity in candidates {
            let Some(worker_id) = self.workers.get(&identity).map(|w| w.worker_id.clone()) else {
                continue;
            };
            let Some(claimed) = self.catalog.claim_next_job(&worker_id).await? else {
                continue;
            };

            match self.dispatch_job(&identity, &claimed).await {
                Ok(()) => {
                    dispatched_any = true;
                    if let Some(worker) = self.workers.get_mut(&identity) {
                        if let Ok(job) = u64::try_from(claimed.job_id) {
                            worker.active_jobs.insert(job);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to dispatch job {}: {}", claimed.job_id, e);
                    // The socket write failed; put the claim back.
                    self.catalog.defer_job(claimed.job_id).await?;
                }
            }
        }

        if dispatched_any {
            self.dispatch_backoff_ms = 0;
            self.dispatch_cooldown_until = None;
        } else {
            self.schedule_dispatch_backoff();
        }

        Ok(())
    }

    async fn dispatch_job(&mut self, identity: &[u8], claimed: &ClaimedJob) -> Result<()> {
        let job_id = JobId::try_from(claimed.job_id)
            .map_err(|e| anyhow::anyhow!("invalid job id from queue ({}): {e}", claimed.job_id))?;
        let cmd = dispatch_command_for(claimed);
        self.send_to_worker(identity, OpCode::Dispatch, job_id, &cmd)
            .await?;
        info!(
            "Dispatched job {} ({} -> {})",
            claimed.job_id, claimed.binding.name, claimed.input_path
        );
        Ok(())
    }

    fn schedule_dispatch_backoff(&mut self) {
        let next = if self.dispatch_backoff_ms == 0 {
            DISPATCH_BACKOFF_BASE_MS
        } else {
            (self.dispatch_backoff_ms * 2).min(DISPATCH_BACKOFF_MAX_MS)
        };
        self.dispatch_backoff_ms = next;

        let jitter_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 % DISPATCH_BACKOFF_JITTER_MS)
            .unwrap_or(0);
        self.dispatch_cooldown_until =
            Some(Instant::now() + Duration::from_millis(next + jitter_ms));
    }

    async fn send_protocol_error(&mut self, identity: &[u8], err: &ProtocolError) -> Result<()> {
        let payload = ErrorPayload {
            kind: ErrorKind::ProtocolError,
            message: err.to_string(),
        };
        self.send_to_worker(identity, OpCode::Err, JobId::new(0), &payload)
            .await
    }

    async fn send_to_worker<T: serde::Serialize>(
        &mut self,
        identity: &[u8],
        opcode: OpCode,
        job_id: JobId,
        payload: &T,
    ) -> Result<()> {
        let msg = Message::encode(opcode, job_id, payload)?;
        let (header, body) = msg.pack()?;

        let mut multipart = ZmqMessage::from(identity.to_vec());
        multipart.push_back(header.into());
        multipart.push_back(body.into());
        self.socket.send(multipart).await?;
        Ok(())
    }

    // ========================================================================
    // Control API
    // ========================================================================

    async fn handle_control_request(&mut self) -> Result<()> {
        let Some(ctrl) = self.control_socket.as_mut() else {
            return Ok(());
        };

        let request_bytes = match tokio::time::timeout(Duration::from_millis(10), ctrl.recv()).await
        {
            Ok(Ok(msg)) => msg
                .into_vec()
                .first()
                .map(|b| b.to_vec())
                .unwrap_or_default(),
            Ok(Err(e)) => return Err(anyhow::anyhow!("Control socket recv error: {}", e)),
            Err(_) => return Ok(()),
        };

        let response = match serde_json::from_slice::<ControlRequest>(&request_bytes) {
            Ok(request) => self.dispatch_control(request).await,
            Err(e) => ControlResponse::error("PARSE_ERROR", format!("Invalid request: {e}")),
        };

        let response_bytes = serde_json::to_vec(&response)?;
        let ctrl = self
            .control_socket
            .as_mut()
            .context("control socket vanished mid-request")?;
        ctrl.send(ZmqMessage::from(response_bytes))
            .await
            .context("Failed to send control response")?;
        Ok(())
    }

    async fn dispatch_control(&mut self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::ListJobs {
                status,
                limit,
                offset,
            } => match self
                .catalog
                .list_jobs(status, limit.unwrap_or(100), offset.unwrap_or(0))
                .await
            {
                Ok(jobs) => ControlResponse::Jobs(jobs.into_iter().map(Into::into).collect()),
                Err(e) => ControlResponse::error("DB_ERROR", format!("Failed to list jobs: {e}")),
            },
            ControlRequest::GetJob { job_id } => match self.catalog.get_job(job_id).await {
                Ok(job) => ControlResponse::Job(job.map(Into::into)),
                Err(e) => ControlResponse::error("DB_ERROR", format!("Failed to get job: {e}")),
            },
            ControlRequest::CancelJob { job_id } => self.handle_cancel_job(job_id).await,
            ControlRequest::GetQueueStats => match self.catalog.count_jobs_by_status().await {
                Ok(counts) => {
                    use casparian_protocol::types::JobState;
                    let get = |s: JobState| counts.get(&s).copied().unwrap_or(0);
                    let stats = QueueStatsInfo {
                        queued: get(JobState::Queued),
                        running: get(JobState::Running),
                        succeeded: get(JobState::Succeeded),
                        failed: get(JobState::Failed),
                        cancelled: get(JobState::Cancelled),
                        total: counts.values().sum(),
                    };
                    ControlResponse::QueueStats(stats)
                }
                Err(e) => ControlResponse::error("DB_ERROR", format!("Failed to get stats: {e}")),
            },
            ControlRequest::Ping => ControlResponse::Pong,
        }
    }

    /// Cancel: queued jobs cancel in the catalog; running jobs get an ABORT
    /// sent to their worker and conclude when the worker answers.
    async fn handle_cancel_job(&mut self, job_id: i64) -> ControlResponse {
        match self.catalog.cancel_job(job_id).await {
            Ok(CancelOutcome::CancelledQueued) => {
                info!("Job {} cancelled while queued", job_id);
                ControlResponse::CancelResult {
                    success: true,
                    message: "Job cancelled".to_string(),
                }
            }
            Ok(CancelOutcome::RunningOn(worker_id)) => {
                let identity = self
                    .workers
                    .iter()
                    .find(|(_, w)| w.worker_id == worker_id)
                    .map(|(id, _)| id.clone());
                let Some(identity) = identity else {
                    return ControlResponse::CancelResult {
                        success: false,
                        message: format!("Job is running on disconnected worker {worker_id}"),
                    };
                };
                let job = match JobId::try_from(job_id) {
                    Ok(job) => job,
                    Err(e) => {
                        return ControlResponse::error("BAD_ID", format!("Invalid job id: {e}"))
                    }
                };
                match self
                    .send_to_worker(&identity, OpCode::Abort, job, &serde_json::json!({}))
                    .await
                {
                    Ok(()) => {
                        info!("ABORT sent for job {} to {}", job_id, worker_id);
                        ControlResponse::CancelResult {
                            success: true,
                            message: "Abort signal sent to worker".to_string(),
                        }
                    }
                    Err(e) => ControlResponse::CancelResult {
                        success: false,
                        message: format!("Failed to send abort: {e}"),
                    },
                }
            }
            Ok(CancelOutcome::AlreadyTerminal) => ControlResponse::CancelResult {
                success: false,
                message: "Job already completed".to_string(),
            },
            Ok(CancelOutcome::NotFound) => ControlResponse::CancelResult {
                success: false,
                message: "Job not found".to_string(),
            },
            Err(e) => ControlResponse::error("DB_ERROR", format!("Failed to cancel job: {e}")),
        }
    }
}

/// Apply a worker CONCLUDE to the catalog, including the retry policy.
///
/// Failed outcomes with a retriable kind requeue up to the ceiling; every
/// other kind (or a missing kind) concludes terminally.
pub async fn apply_conclude(
    catalog: &Catalog,
    job_id: i64,
    payload: &ConcludePayload,
    retry_ceiling: u32,
) -> Result<()> {
    match payload.outcome {
        JobOutcome::Succeeded => {
            catalog
                .conclude_job(
                    job_id,
                    JobOutcome::Succeeded,
                    None,
                    None,
                    payload.output_path.as_deref(),
                    payload.row_count.map(|n| n as i64),
                )
                .await?;
        }
        JobOutcome::Cancelled => {
            catalog
                .conclude_job(
                    job_id,
                    JobOutcome::Cancelled,
                    Some(ErrorKind::Cancelled),
                    payload.message.as_deref(),
                    None,
                    None,
                )
                .await?;
        }
        JobOutcome::Failed => {
            // A failure without a kind is treated as a crash (retriable).
            let kind = payload.error_kind.unwrap_or(ErrorKind::GuestCrashed);
            let message = payload.message.as_deref().unwrap_or("unknown error");
            if kind.is_retriable() {
                match catalog
                    .retry_or_fail(job_id, kind, message, retry_ceiling)
                    .await?
                {
                    RetryDecision::Requeued(count) => {
                        info!("Job {} requeued after {} (retry {})", job_id, kind, count);
                    }
                    RetryDecision::Exhausted => {
                        warn!("Job {} exhausted retries after {}", job_id, kind);
                    }
                }
            } else {
                catalog
                    .conclude_job(
                        job_id,
                        JobOutcome::Failed,
                        Some(kind),
                        Some(message),
                        None,
                        None,
                    )
                    .await?;
            }
        }
    }
    Ok(())
}

/// Build the DISPATCH payload for a claimed job.
pub fn dispatch_command_for(claimed: &ClaimedJob) -> DispatchCommand {
    DispatchCommand {
        parser_name: claimed.binding.name.clone(),
        parser_version: claimed.binding.parser_version.clone(),
        source_hash: claimed.binding.source_hash.clone(),
        file_fingerprint: claimed.file_fingerprint.clone(),
        tag: claimed.tag.clone(),
        input_path: claimed.input_path.clone(),
        parser_source: claimed.binding.source_code.clone(),
        dependency_set: claimed.binding.dependency_set.clone(),
        schema_contract: claimed.binding.schema_contract.clone(),
        sink_spec: claimed.binding.sink_spec.clone(),
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
