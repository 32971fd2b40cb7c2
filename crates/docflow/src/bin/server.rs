//! Docflow server binary
//!
//! Run with: cargo run -p docflow --bin docflow-server -- --config docflow.toml

use clap::Parser;
use docflow::{
    config::DocflowConfig,
    processing::{OrchestratorOptions, TaskOrchestrator},
    providers::{MemoryIndexer, TextFileConverter},
    server::{state::AppState, DocflowServer},
    NotificationHub, RecordStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docflow-server", version, about = "Document pipeline server")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "DOCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docflow=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DocflowConfig::from_file(path)?,
        None => DocflowConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.storage.database_path.display());
    tracing::info!("  - Uploads: {}", config.storage.upload_dir.display());
    tracing::info!("  - Output: {}", config.storage.output_dir.display());
    tracing::info!(
        "  - Budgets: soft {}s, hard {}s",
        config.processing.soft_time_limit_secs,
        config.processing.hard_time_limit_secs
    );

    let store = Arc::new(RecordStore::new(
        &config.storage.database_path,
        config.storage.upload_dir.clone(),
    )?);
    let hub = Arc::new(NotificationHub::new(config.hub.outbound_buffer));
    let orchestrator = Arc::new(TaskOrchestrator::start(
        OrchestratorOptions::from_config(&config),
        store.clone(),
        Arc::new(TextFileConverter::new()),
        Arc::new(MemoryIndexer::new()),
        hub.clone(),
    ));

    let server = DocflowServer::new(AppState::new(config, store, hub, orchestrator));

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  WebSocket: ws://{}/ws", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
