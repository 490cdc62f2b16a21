use anyhow::{Context, Result};
use sorter_service::batch_io::{load_images, read_selection, write_report};
use sorter_service::{
    ArchiveBuilder, BatchOrchestrator, Config, SortPipeline, SortRequest, VisionClassifier,
    CATALOG,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Photosort Sorter Service"
    );

    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    // Initialize components
    let classifier = Arc::new(
        VisionClassifier::new(config.classifier.clone())
            .context("Failed to initialize vision classifier")?,
    );

    let orchestrator = BatchOrchestrator::new(
        classifier,
        config.batch.max_concurrent_requests,
        config.request_timeout(),
    );

    let mut archives = ArchiveBuilder::new(&config.archive.output_dir, config.archive.compression);
    if config.archive.append_run_id {
        archives = archives.with_run_id(chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string());
    }

    let pipeline = SortPipeline::new(orchestrator, archives);

    // Load the batch
    let images = load_images(&config.input.uploads_dir).await?;

    let selection = match read_selection(&config.input.params_file).await? {
        Some(codes) => codes,
        None => {
            info!(
                params_file = %config.input.params_file.display(),
                "No parameters file, selecting every category"
            );
            CATALOG.codes().map(|code| code.to_string()).collect()
        }
    };

    // Stop scheduling new calls on shutdown
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, cancelling remaining classifications");
        signal_token.cancel();
    });

    let result = pipeline.run(SortRequest { images, selection }, &cancel).await;
    signal_handle.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, request_error = e.is_request_error(), "Sort run failed");
            return Err(e.into());
        }
    };

    let report_path = write_report(&config.archive.output_dir, &report).await?;

    info!(
        success = report.success,
        total_images = report.total_images,
        archives = report.zip_files.len(),
        failures = report.failures.len(),
        report = %report_path.display(),
        "Sorter service finished"
    );

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
