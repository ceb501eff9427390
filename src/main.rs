//! MCP aggregator.
//!
//! Mounts every downstream MCP server named in the config file behind one
//! endpoint, each under its own namespace prefix, and rebuilds the whole
//! downstream topology when the file changes.
//!
//! # Architecture Overview
//!
//! ```text
//!   mcp_config.toml ──▶ FileWatcher (own thread)
//!          │                  │ ReloadRequest
//!          ▼                  ▼
//!     ConfigStore ──▶ LifecycleController ──▶ Topology
//!                                              │
//!                      ┌───────────────────────┴──────────────┐
//!                      ▼                                      ▼
//!              ConnectionManager ──▶ build_transport ──▶ AggregatorEndpoint
//!                      │              (stdio/sse/ws)       (namespaced catalog,
//!                      ▼                                    HTTP surface)
//!               downstream servers
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use mcp_aggregator::client::McpConnector;
use mcp_aggregator::config::{ConfigStore, FileWatcher};
use mcp_aggregator::lifecycle::{interruptible, LifecycleController, LifecycleError};
use mcp_aggregator::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "mcp-aggregator")]
#[command(about = "Aggregate MCP servers behind one endpoint", long_about = None)]
struct Cli {
    /// Configuration file to load and watch.
    #[arg(short, long, default_value = "mcp_config.toml")]
    config: PathBuf,

    /// Do not reload when the configuration file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut store = ConfigStore::new(&cli.config);
    let config = match store.get() {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging("info");
            tracing::error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("mcp-aggregator v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut controller = match LifecycleController::create(store, Arc::new(McpConnector)) {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create lifecycle controller");
            return ExitCode::FAILURE;
        }
    };

    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let mut watcher = FileWatcher::new(&cli.config);
    if cli.no_watch {
        tracing::info!("Configuration watching disabled");
    } else if let Err(e) = watcher.start(reload_tx) {
        tracing::warn!(error = %e, "Failed to watch configuration file, reload disabled");
    }

    let stop = controller.shutdown_handle();
    match interruptible(controller.start(), &stop).await {
        Ok(_) => {}
        Err(LifecycleError::ShuttingDown) => {
            tracing::info!("Startup interrupted");
            watcher.stop();
            controller.stop().await;
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            watcher.stop();
            controller.stop().await;
            return ExitCode::FAILURE;
        }
    }

    controller.run(reload_rx).await;
    watcher.stop();

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
