//! Casparian Flow Worker
//!
//! Usage:
//!     casparian-worker --connect tcp://127.0.0.1:5555 --output ./output

use casparian_logging::{init_logging, LogConfig};
use casparian_protocol::config::CoreConfig;
use casparian_protocol::defaults;
use casparian_worker::{Worker, WorkerConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "casparian-worker", about = "Worker node for Casparian Flow")]
struct Args {
    /// Sentinel address
    #[arg(long, default_value_t = defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string())]
    connect: String,

    /// Output root for relative sink path templates
    #[arg(long)]
    output: Option<PathBuf>,

    /// Environment cache directory (default: ~/.casparian_flow/envs)
    #[arg(long)]
    env_dir: Option<PathBuf>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Maximum concurrent jobs
    #[arg(long, default_value_t = defaults::DEFAULT_MAX_INFLIGHT_JOBS)]
    max_inflight: u32,

    /// Verbose console logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "casparian-worker",
        verbose: args.verbose,
    })?;

    let worker_id = args.worker_id.unwrap_or_else(|| {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("worker-{}", &suffix[..8])
    });

    let mut core = CoreConfig::default();
    core.worker.max_inflight_jobs = args.max_inflight;
    core.worker.env_dir = args.env_dir.clone();
    core.paths.output_root = args.output.clone();

    let config = WorkerConfig::from_core(&core, args.connect.clone(), worker_id.clone());

    tracing::info!("Starting Casparian Flow worker");
    tracing::info!("  Sentinel: {}", args.connect);
    tracing::info!("  Worker ID: {}", worker_id);

    let mut worker = Worker::connect(config).await?;
    worker.run().await?;

    Ok(())
}
