//! Matte worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use matte_storage::StorageConfig;
use matte_store::StoreConfig;
use matte_worker::{
    check_media_tools, HandlerRegistry, JobExecutor, KeyingHandler, PipelineConfig, StitchHandler, WorkerConfig,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting matte-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        matte_worker::metrics::init_metrics(addr)?;
        info!("Metrics exporter listening on {}", addr);
    }

    let config = WorkerConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    info!("Worker config: {:?}", config);

    let (ffmpeg, ffprobe) = check_media_tools().context("ffmpeg and ffprobe must be installed")?;
    info!("Using {} and {}", ffmpeg.display(), ffprobe.display());

    let store = matte_store::connect(StoreConfig::from_env())
        .await
        .context("Failed to connect to job store")?;
    let results = matte_storage::open(StorageConfig::from_env()?)
        .await
        .context("Failed to open result storage")?;
    info!("Storing results with {}", results.name());

    let handlers = HandlerRegistry::new()
        .register(Arc::new(KeyingHandler::new(pipeline.clone(), Arc::clone(&results))))
        .register(Arc::new(StitchHandler::new(pipeline, results)));
    let executor = Arc::new(JobExecutor::new(config, store, handlers));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,matte_worker=info,matte_media=info,matte_store=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
