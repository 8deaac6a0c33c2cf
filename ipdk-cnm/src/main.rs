use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipdk_cnm::rest::{AppState, create_router};
use ipdk_cnm::{CliProvisioner, Ledger, NetworkDriver, ProvisionerConfig, StateStore};

#[derive(Parser)]
#[command(name = "ipdk-cnm")]
#[command(about = "Docker network and IPAM plugin for the IPDK vhost-user dataplane")]
struct Args {
    /// Listen address for the plugin API
    #[arg(short, long, default_value = "127.0.0.1:9075")]
    listen: SocketAddr,

    /// Path to the state ledger
    #[arg(long, default_value = "/var/lib/ipdk-cnm/ledger.redb")]
    db_path: PathBuf,

    /// Parent directory of the per-endpoint vhost-user socket directories
    #[arg(long, default_value = "/tmp")]
    socket_dir: PathBuf,

    /// Container running the dataplane tools
    #[arg(long, default_value = "ipdk")]
    container: String,

    /// Dataplane bridge forwarding rules are installed on
    #[arg(long, default_value = "br0")]
    bridge: String,

    /// Compile and load the L3 pipeline before serving
    #[arg(long)]
    program_pipeline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ipdk_cnm=info".parse()?))
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    info!(
        "Starting ipdk-cnm - API: {}, ledger: {}",
        args.listen,
        args.db_path.display()
    );

    let ledger = Ledger::open(&args.db_path)
        .with_context(|| format!("Failed to open ledger {}", args.db_path.display()))?;
    let store = StateStore::load(Arc::new(ledger)).context("Failed to load state")?;

    let provisioner = CliProvisioner::new(ProvisionerConfig {
        socket_dir: args.socket_dir,
        container: args.container,
        bridge: args.bridge.clone(),
        ..Default::default()
    });

    if args.program_pipeline {
        info!("Programming dataplane pipeline");
        provisioner
            .program_pipeline()
            .context("Failed to program pipeline")?;
    }

    let driver = NetworkDriver::new(Arc::new(store), Arc::new(provisioner), args.bridge);
    let router = create_router(Arc::new(AppState::new(Arc::new(driver))));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Plugin API listening on {}", args.listen);

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
