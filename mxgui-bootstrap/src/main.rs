//! mxgui-bootstrap - MXGUI appliance bootstrapper
//!
//! One run per invocation: probe the mixer inventory, back up live mixers,
//! provision every appliance image found in the image directory, print a
//! summary. Exits non-zero only when the run cannot start (configuration,
//! inventory or work directory problems).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mxgui_common::config::{load_config, resolve_config_source};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mxgui_bootstrap::{load_inventory, BootstrapPipeline, RunContext};

/// Time left to blocking transfer workers after the run returns
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command-line arguments for mxgui-bootstrap
#[derive(Parser, Debug)]
#[command(name = "mxgui-bootstrap")]
#[command(about = "Bootstraps MXGUI host appliances for a fleet of mixers")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory relative paths are resolved against
    #[arg(short, long, env = "MXGUI_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Mixer inventory (YAML)
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Mixers probed and backed up at the same time
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let source = resolve_config_source(args.config.as_deref());
    let mut config = load_config(&source).context("Failed to load configuration")?;
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(inventory) = args.inventory {
        config.inventory = inventory;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.probe.max_concurrency = max_concurrency;
    }
    config.validate().context("Invalid configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting mxgui-bootstrap (git: {}, built: {}, profile: {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match source.path() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    config.work_dir = config
        .work_dir
        .canonicalize()
        .with_context(|| format!("Work directory {} unusable", config.work_dir.display()))?;
    info!("Work directory: {}", config.work_dir.display());

    let inventory = load_inventory(&config).context("Failed to load inventory")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let cancel = CancellationToken::new();
    runtime.spawn(cancel_on_ctrl_c(cancel.clone()));

    let ctx = RunContext::production(config, inventory).with_cancellation(cancel);
    let result = runtime.block_on(BootstrapPipeline::new(ctx).run());
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    let report = result.context("Bootstrap run failed")?;

    if let Some(path) = args.report {
        let json = report.to_json().context("Failed to serialize run report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write run report {}", path.display()))?;
        info!("Run report written to {}", path.display());
    }

    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Received Ctrl+C, cancelling run");
            cancel.cancel();
        }
        Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
    }
}
