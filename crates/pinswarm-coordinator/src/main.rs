//! pinswarm coordinator binary.
//!
//! Usage:
//!   pinswarm-coordinator                          # defaults, empty directory
//!   pinswarm-coordinator --config pinswarm.toml
//!   pinswarm-coordinator --listen 127.0.0.1:3000 --seed directory.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pinswarm_coordinator::{AppState, CoordinatorConfig, CoordinatorServer};
use pinswarm_state::MemoryDirectory;

#[derive(Parser)]
#[command(name = "pinswarm-coordinator", about = "Provider liveness and replication coordinator")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides `server.listen_addr`
    #[arg(long)]
    listen: Option<String>,

    /// Directory seed file, overrides `directory.seed_path`
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(seed) = cli.seed {
        config.directory.seed_path = Some(seed);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    let directory = match &config.directory.seed_path {
        Some(path) => MemoryDirectory::load_seed(path)?,
        None => {
            tracing::warn!("No directory seed configured; every agent will be rejected");
            MemoryDirectory::new()
        }
    };
    let state = AppState::new(&config, Arc::new(directory));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(state.liveness_monitor(&config).run(shutdown_rx.clone()));
    let server = CoordinatorServer::new(config.server.listen_addr.clone(), state);
    let mut server_task = tokio::spawn(server.run(shutdown_rx));

    let finished = tokio::select! {
        result = &mut server_task => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            None
        }
    };
    let _ = shutdown_tx.send(true);
    let server_result = match finished {
        Some(result) => result,
        None => server_task.await,
    };
    monitor_task.await?;
    server_result??;
    Ok(())
}
