//! eswitchd entry point.
//!
//! Registers the configured fabrics, rebuilds allocations from the running
//! domains and serves control channel requests until interrupted.

use clap::Parser;
use eswitch_common::logging::init_logging;
use eswitch_common::{EswitchConfig, DEFAULT_CONFIG_PATH};
use eswitchd::{serve, EswitchDaemon, PciUtils, ResourceManager, VirshDomains};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SR-IOV device pool daemon
#[derive(Parser, Debug)]
#[command(name = "eswitchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overrides `daemon.listen`
    #[arg(long)]
    listen: Option<String>,

    /// Log level, overrides `daemon.log_level`
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Sysfs root, overrides `daemon.sysfs_root`
    #[arg(long)]
    sysfs_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match EswitchConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("eswitchd: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(listen) = args.listen {
        config.daemon.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    if let Some(root) = args.sysfs_root {
        config.daemon.sysfs_root = root;
    }

    if let Err(e) = init_logging(&config.daemon.log_level) {
        eprintln!("eswitchd: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            info!("eswitchd exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("eswitchd exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EswitchConfig) -> anyhow::Result<()> {
    let mappings = config.interface_mappings()?;

    let daemon = EswitchDaemon::new(ResourceManager::new(PciUtils::new(config.daemon.sysfs_root.clone())));
    let registered = daemon.register_fabrics(&mappings);
    info!(registered, configured = mappings.len(), "Fabrics registered");

    if config.daemon.scan_attached {
        // pool state does not survive restarts
        if let Err(e) = daemon.restore_from(&VirshDomains::default()).await {
            warn!(error = %e, "Cannot scan attached devices, starting with an empty pool state");
        }
    }

    let listener = TcpListener::bind(config.daemon.listen.as_str()).await?;
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, shutting down");
        }
        signal.cancel();
    });

    serve(listener, Arc::new(daemon), shutdown).await;
    Ok(())
}
