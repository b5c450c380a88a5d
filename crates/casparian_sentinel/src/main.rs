//! Casparian Flow Sentinel
//!
//! Control plane for job orchestration and worker management.
//!
//! Usage:
//!     casparian-sentinel --bind tcp://127.0.0.1:5555 --catalog sqlite:/path/to/catalog.db

use casparian_logging::{init_logging, LogConfig};
use casparian_protocol::config::CoreConfig;
use casparian_protocol::defaults;
use casparian_sentinel::{Sentinel, SentinelConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "casparian-sentinel", about = "Control plane for Casparian Flow")]
struct Args {
    /// ZMQ bind address for workers
    #[arg(long, default_value_t = defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string())]
    bind: String,

    /// Control API bind address (pass "off" to disable)
    #[arg(long, default_value_t = defaults::DEFAULT_CONTROL_ADDR.to_string())]
    control: String,

    /// Catalog URL
    #[arg(long)]
    catalog: Option<String>,

    /// Verbose console logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "casparian-sentinel",
        verbose: args.verbose,
    })?;

    let mut core = CoreConfig::default();
    if let Some(catalog) = &args.catalog {
        core.catalog.url = catalog.clone();
    } else {
        let home = casparian_logging::casparian_home();
        core.catalog.url = format!("sqlite:{}", home.join("casparian_flow.db").display());
    }

    let control_addr = if args.control == "off" {
        None
    } else {
        Some(args.control.clone())
    };

    tracing::info!("Starting Casparian Flow sentinel");
    tracing::info!("  Bind: {}", args.bind);
    tracing::info!("  Catalog: {}", core.catalog.url);

    let config = SentinelConfig::from_core(&core, args.bind.clone(), control_addr);
    let mut sentinel = Sentinel::bind(config).await?;
    sentinel.run().await?;

    Ok(())
}
