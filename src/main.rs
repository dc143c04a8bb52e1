//! CodeJudge - worker entry point
//!
//! Reads submissions as JSON lines on stdin and writes verdicts as JSON
//! lines on stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codejudge::config::{Config, LogFormat, SandboxBackend};
use codejudge::harness::LanguageRegistry;
use codejudge::judge::Judge;
use codejudge::metrics::{self, MetricsServer};
use codejudge::sandbox::ContainerSandbox;
use codejudge::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "codejudge=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.worker.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    tracing::info!("Starting CodeJudge worker");
    tracing::info!(
        backend = ?config.sandbox.backend,
        test_workers = config.worker.test_workers,
        submission_concurrency = config.worker.submission_concurrency,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.sandbox.scratch_root).await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Setup signal handlers
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, cancelling in-flight submissions...");
        let _ = shutdown_tx.send(true);
    });

    // Start metrics server
    metrics::init_metrics();
    let metrics_port = config.worker.metrics_port;
    if metrics_port != 0 {
        tokio::spawn(async move {
            if let Err(e) = MetricsServer::run(metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Pull images up front so the first submission is not charged for it
    if config.sandbox.backend == SandboxBackend::Docker {
        let sandbox = ContainerSandbox::new(config.sandbox.clone());
        let registry = LanguageRegistry::with_defaults(&config.toolchain);
        for language in registry.languages() {
            if let Some(adapter) = registry.resolve(language) {
                sandbox.ensure_image(adapter.container_image()).await;
            }
        }
    }

    let concurrency = config.worker.submission_concurrency;
    let judge = Arc::new(Judge::from_config(config)?);
    tracing::info!(
        languages = ?judge.registry().languages(),
        "CodeJudge ready, reading submissions from stdin"
    );

    let worker = Worker::new(judge, concurrency);
    let stats = worker
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), shutdown_rx)
        .await?;

    tracing::info!(judged = stats.judged, "CodeJudge shutdown complete");
    Ok(())
}
