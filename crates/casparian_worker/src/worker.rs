//! Worker session: one DEALER connection to the sentinel.
//!
//! The event loop owns the socket and the active-job table; job execution
//! happens on spawned tasks that report back through an outbound channel.

use anyhow::{Context, Result};
use casparian_protocol::config::CoreConfig;
use casparian_protocol::types::{
    self, ConcludePayload, DispatchCommand, EnvReadyPayload, ErrorKind, IdentifyPayload, JobId,
    JobReceipt, PrepareEnvCommand,
};
use casparian_protocol::{Message, OpCode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::cancel::CancellationToken;
use crate::env_manager::EnvManager;
use crate::runner::{self, RunnerConfig};

/// Worker configuration (plain data).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub sentinel_addr: String,
    pub worker_id: String,
    pub capabilities: Vec<String>,
    pub output_root: Option<PathBuf>,
    pub env_dir: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub max_inflight: u32,
    pub guest_startup_timeout: Duration,
    pub guest_idle_timeout: Duration,
    pub env_prepare_timeout: Duration,
    pub row_group_rows: usize,
}

impl WorkerConfig {
    /// Build from the recognized configuration object plus identity.
    pub fn from_core(core: &CoreConfig, sentinel_addr: String, worker_id: String) -> Self {
        Self {
            sentinel_addr,
            worker_id,
            capabilities: vec!["*".to_string()],
            output_root: core.paths.output_root.clone(),
            env_dir: core.worker.env_dir.clone(),
            heartbeat_interval: Duration::from_millis(core.worker.heartbeat_interval_ms),
            max_inflight: core.worker.max_inflight_jobs,
            guest_startup_timeout: Duration::from_millis(core.worker.guest_startup_timeout_ms),
            guest_idle_timeout: Duration::from_millis(core.worker.guest_idle_timeout_ms),
            env_prepare_timeout: Duration::from_millis(core.worker.env_prepare_timeout_ms),
            row_group_rows: core.sinks.default_row_group_rows,
        }
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_root: self.output_root.clone(),
            guest_startup_timeout: self.guest_startup_timeout,
            guest_idle_timeout: self.guest_idle_timeout,
            env_prepare_timeout: self.env_prepare_timeout,
            row_group_rows: self.row_group_rows,
        }
    }
}

/// Message queued by job tasks for the session loop to put on the wire.
enum Outbound {
    Conclude(JobId, ConcludePayload),
    EnvReady(EnvReadyPayload),
    SessionError(ErrorKind, String),
}

/// Active worker with a connected socket.
pub struct Worker {
    config: WorkerConfig,
    socket: DealerSocket,
    env_manager: Arc<EnvManager>,
    active: HashMap<u64, CancellationToken>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    running: bool,
}

impl Worker {
    /// Connect to the sentinel and send IDENTIFY.
    pub async fn connect(config: WorkerConfig) -> Result<Self> {
        let env_manager = Arc::new(EnvManager::new(config.env_dir.clone())?);
        let (count, bytes) = env_manager.stats();
        info!("EnvManager: {} cached envs, {} MB", count, bytes / 1_000_000);

        let mut socket = DealerSocket::new();
        socket
            .connect(&config.sentinel_addr)
            .await
            .with_context(|| format!("Failed to connect to {}", config.sentinel_addr))?;
        info!("Connected to sentinel: {}", config.sentinel_addr);

        let identify = IdentifyPayload {
            worker_id: config.worker_id.clone(),
            capabilities: config.capabilities.clone(),
            max_inflight: config.max_inflight,
        };
        send_message(&mut socket, OpCode::Identify, JobId::new(0), &identify).await?;
        info!("Sent IDENTIFY as {}", config.worker_id);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            socket,
            env_manager,
            active: HashMap::new(),
            outbound_tx,
            outbound_rx,
            running: false,
        })
    }

    /// Main event loop.
    pub async fn run(&mut self) -> Result<()> {
        self.running = true;
        let mut last_heartbeat = Instant::now();
        info!("Entering event loop...");

        while self.running {
            match self.recv_message().await {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_message(msg).await {
                        error!("Error handling message: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Recv error: {}", e);
                    break;
                }
            }

            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                last_heartbeat = Instant::now();
                let payload = types::HeartbeatPayload {
                    ts: chrono::Utc::now().timestamp_millis(),
                    in_flight: self.active.len() as u32,
                };
                if let Err(e) =
                    send_message(&mut self.socket, OpCode::Heartbeat, JobId::new(0), &payload).await
                {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }

            self.drain_outbound().await;
        }

        info!("Worker stopped");
        Ok(())
    }

    async fn drain_outbound(&mut self) {
        while let Ok(item) = self.outbound_rx.try_recv() {
            let result = match item {
                Outbound::Conclude(job_id, payload) => {
                    self.active.remove(&job_id.as_u64());
                    send_message(&mut self.socket, OpCode::Conclude, job_id, &payload).await
                }
                Outbound::EnvReady(payload) => {
                    send_message(&mut self.socket, OpCode::EnvReady, JobId::new(0), &payload).await
                }
                Outbound::SessionError(kind, message) => {
                    let payload = types::ErrorPayload { kind, message };
                    send_message(&mut self.socket, OpCode::Err, JobId::new(0), &payload).await
                }
            };
            if let Err(e) = result {
                error!("Failed to send outbound message: {}", e);
            }
        }
    }

    /// Receive next message with timeout (multipart: [header, payload]).
    async fn recv_message(&mut self) -> Result<Option<Message>> {
        let timeout = Duration::from_millis(100);

        let multipart = match tokio::time::timeout(timeout, self.socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => return Err(anyhow::anyhow!("ZMQ error: {}", e)),
            Err(_) => return Ok(None),
        };

        let parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
        if parts.len() < 2 {
            warn!("Expected 2 frames [header, payload], got {}", parts.len());
            return Ok(None);
        }

        let msg = Message::unpack(&[parts[0].clone(), parts[1].clone()])?;
        Ok(Some(msg))
    }

    async fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg.header.opcode {
            OpCode::Dispatch => {
                let cmd: DispatchCommand = msg.decode()?;
                self.handle_dispatch(msg.header.job_id, cmd).await?;
            }

            OpCode::Abort => {
                let job_id = msg.header.job_id;
                if let Some(token) = self.active.get(&job_id.as_u64()) {
                    warn!("ABORT job {}", job_id);
                    token.cancel();
                } else {
                    warn!("ABORT for unknown job {} (already concluded?)", job_id);
                }
            }

            OpCode::PrepareEnv => {
                let cmd: PrepareEnvCommand = msg.decode()?;
                info!("PREPARE_ENV for {}", cmd.parser_name);
                let env_manager = Arc::clone(&self.env_manager);
                let timeout = self.config.env_prepare_timeout;
                let outbound = self.outbound_tx.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, env_manager.prepare(&cmd.dependency_set))
                        .await
                    {
                        Ok(Ok(prepared)) => {
                            let _ = outbound.send(Outbound::EnvReady(EnvReadyPayload {
                                env_handle: prepared.env_key,
                                cached: prepared.cached,
                            }));
                        }
                        Ok(Err(e)) => {
                            let _ = outbound.send(Outbound::SessionError(
                                ErrorKind::EnvPrepareFailed,
                                e.to_string(),
                            ));
                        }
                        Err(_) => {
                            let _ = outbound.send(Outbound::SessionError(
                                ErrorKind::EnvPrepareFailed,
                                "environment preparation timed out".to_string(),
                            ));
                        }
                    }
                });
            }

            OpCode::Reload => {
                info!("RELOAD received (soft restart hint)");
            }

            OpCode::Err => {
                let err: types::ErrorPayload = msg.decode()?;
                error!("Received session ERR ({}): {}", err.kind, err.message);
            }

            _ => {
                warn!("Unhandled opcode: {:?}", msg.header.opcode);
            }
        }
        Ok(())
    }

    async fn handle_dispatch(&mut self, job_id: JobId, cmd: DispatchCommand) -> Result<()> {
        info!("DISPATCH job {} -> {}", job_id, cmd.parser_name);

        if self.active.len() >= self.config.max_inflight as usize {
            let receipt = JobReceipt {
                accepted: false,
                reason: Some(format!(
                    "at capacity ({}/{})",
                    self.active.len(),
                    self.config.max_inflight
                )),
            };
            send_message(&mut self.socket, OpCode::Receipt, job_id, &receipt).await?;
            return Ok(());
        }

        let receipt = JobReceipt {
            accepted: true,
            reason: None,
        };
        send_message(&mut self.socket, OpCode::Receipt, job_id, &receipt).await?;

        let cancel = CancellationToken::new();
        self.active.insert(job_id.as_u64(), cancel.clone());

        let env_manager = Arc::clone(&self.env_manager);
        let runner_config = self.config.runner_config();
        let outbound = self.outbound_tx.clone();
        tokio::spawn(async move {
            let payload = runner::execute_job(env_manager, runner_config, job_id, cmd, cancel).await;
            let _ = outbound.send(Outbound::Conclude(job_id, payload));
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }
}

/// Send a protocol message as multipart (header + body in one ZMQ message).
async fn send_message<T: serde::Serialize>(
    socket: &mut DealerSocket,
    opcode: OpCode,
    job_id: JobId,
    payload: &T,
) -> Result<()> {
    let msg = Message::encode(opcode, job_id, payload)?;
    let (header, body) = msg.pack()?;

    // Multipart so the ROUTER side receives [identity, header, body].
    let mut multipart = ZmqMessage::from(header);
    multipart.push_back(body.into());
    socket.send(multipart).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_from_core_defaults() {
        let core = CoreConfig::default();
        let config = WorkerConfig::from_core(
            &core,
            "tcp://127.0.0.1:5555".to_string(),
            "w-test".to_string(),
        );
        assert_eq!(config.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(config.max_inflight, 1);
        assert_eq!(config.guest_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.guest_startup_timeout, Duration::from_secs(10));
        assert_eq!(config.row_group_rows, 100_000);
    }
}
