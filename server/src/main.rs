use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stemsplit::{init_logging, load_config, Config, JobService};
use stemsplit_server::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "stemsplit-server", version, about = "Audio stem separation server")]
struct Args {
    /// Path to the JSON config file; defaults apply when omitted.
    #[arg(long, env = "STEMSPLIT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind_address`.
    #[arg(long, env = "STEMSPLIT_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    init_logging(&config.logging)?;
    log::info!("Starting stemsplit-server {}", env!("CARGO_PKG_VERSION"));
    log::info!("Jobs directory: {}", config.jobs_directory.display());

    let service = JobService::from_config(&config)?;
    let reaper = service.reaper();
    let reaper_handle = reaper.start();

    let app = build_router(AppState::new(service.clone()));
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    log::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down");
    service.shutdown();
    reaper.stop();
    if let Err(e) = reaper_handle.await {
        log::warn!("Retention reaper ended abnormally: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}
