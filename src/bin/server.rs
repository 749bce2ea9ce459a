//! Streaming Server Application
//!
//! Runs the sender pipeline on demand and exposes start/stop/status over HTTP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_control::{
    config::{AppConfig, DriverKind},
    server::{ControlServer, StreamController},
};

#[derive(Parser, Debug)]
#[command(name = "server", about = "Media streaming server with an HTTP control API")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, e.g. 127.0.0.1:8079
    #[arg(short, long)]
    bind: Option<String>,

    /// Use the simulated pipeline driver instead of launching a pipeline process
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting streaming server");

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = &args.bind {
        config.server.set_bind(bind)?;
    }
    if args.simulate {
        config.pipeline.driver = DriverKind::Simulated;
    }

    match config.pipeline.driver {
        DriverKind::Process => tracing::info!(
            "Sender pipeline: {} \"{}\"",
            config.pipeline.program,
            config.pipeline.sender_description
        ),
        DriverKind::Simulated => tracing::info!("Using simulated sender pipeline"),
    }

    let controller = Arc::new(StreamController::new(config.pipeline.sender_driver()));
    let _watcher = controller.spawn_event_watcher();

    let server = ControlServer::new(config.server.clone(), controller.clone());
    let listener = server.bind().await?;
    println!("Server is running. Access the API at http://{}", listener.local_addr()?);

    server.serve(listener, shutdown_signal()).await?;

    tracing::info!("Shutting down...");
    if let Some(error) = controller.last_error() {
        tracing::warn!("Last pipeline failure: {}", error);
    }
    tokio::task::spawn_blocking(move || controller.shutdown()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
