//! Casparian Flow Scanner
//!
//! Usage:
//!     casparian-scan --catalog sqlite:casparian_flow.db --root /data/in

use casparian_catalog::Catalog;
use casparian_logging::{init_logging, LogConfig};
use casparian_protocol::defaults;
use casparian_scout::{ScanCancelToken, ScanConfig, Scout};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "casparian-scan", about = "Filesystem scanner for Casparian Flow")]
struct Args {
    /// Catalog URL
    #[arg(long, default_value_t = defaults::DEFAULT_CATALOG_URL.to_string())]
    catalog: String,

    /// Scan roots (repeatable)
    #[arg(long, required = true)]
    root: Vec<PathBuf>,

    /// Include globs (repeatable; empty = everything)
    #[arg(long)]
    include: Vec<String>,

    /// Exclude globs (repeatable; honored before descending)
    #[arg(long)]
    exclude: Vec<String>,

    /// Parallel hashing tasks (0 = 2x logical CPUs)
    #[arg(long, default_value_t = 0)]
    parallelism: usize,

    /// Verbose console logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "casparian-scan",
        verbose: args.verbose,
    })?;

    let catalog = Catalog::open(&args.catalog).await?;
    let config = ScanConfig {
        parallelism: args.parallelism,
        include: args.include.clone(),
        exclude: args.exclude.clone(),
        ..Default::default()
    };
    let scout = Scout::with_config(catalog, config);

    let cancel = ScanCancelToken::new();
    {
        let cancel = cancel.clone();
        ctrl_c_handler(cancel);
    }

    for root in &args.root {
        let stats = scout.scan_root(root, None, &cancel).await?;
        println!(
            "{}: {} new, {} changed, {} unchanged, {} tagged, {} errors ({} ms)",
            root.display(),
            stats.files_new,
            stats.files_changed,
            stats.files_unchanged,
            stats.files_tagged,
            stats.errors,
            stats.duration_ms
        );
        if stats.cancelled {
            println!("scan interrupted");
            break;
        }
    }

    Ok(())
}

fn ctrl_c_handler(cancel: ScanCancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping scan");
            cancel.cancel();
        }
    });
}
