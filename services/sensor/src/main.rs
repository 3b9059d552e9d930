use anyhow::{Context, Result};
use sensor_service::api::{start_api_server, AppState};
use sensor_service::config::{Config, ServiceConfig};
use sensor_service::{RedisTimeSeriesStore, SensorService, TimestampNormalizer};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting sensor service"
    );

    // Initialize metrics
    if config.service.metrics_port == 0 {
        warn!("Metrics exporter disabled");
    } else {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store = RedisTimeSeriesStore::connect(&config.store)
        .await
        .context("Failed to initialize time-series store")?;

    let normalize_options = config.timestamps.normalize_options()?;
    let service = SensorService::new(Arc::new(store), TimestampNormalizer::new(normalize_options));

    let api_state = AppState {
        service,
        max_batch_size: config.api.max_batch_size,
    };

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Sensor service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "pretty" {
        subscriber.with(fmt::layer().pretty()).init();
    } else {
        subscriber.with(fmt::layer().json()).init();
    }
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
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutting down sensor service");
}
