use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xgoals_inference::config::Config;
use xgoals_inference::metrics_store::PgMetricsStore;
use xgoals_inference::model::Predictor;
use xgoals_inference::registry::ModelRegistry;
use xgoals_inference::server::{self, AppState};
use xgoals_inference::service::InferenceService;
use xgoals_inference::sink::KinesisSink;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting xGoals inference service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Resolve the production model; the service cannot start without one
    let registry = ModelRegistry::new(&config.model).await;
    let resolved = registry
        .resolve_production()
        .await
        .context("Failed to resolve production model")?;

    // Metrics store, with its schema in place before traffic flows
    let store = Arc::new(
        PgMetricsStore::connect(&config.database)
            .await
            .context("Failed to initialize metrics store")?,
    );
    store
        .ensure_schema()
        .await
        .context("Failed to ensure drift metrics schema")?;

    let mut builder = InferenceService::builder(
        Predictor::new(resolved.scorer),
        resolved.reference,
        store.clone(),
    )
    .buffer_threshold(config.drift.buffer_threshold);

    if let Some(version) = resolved.version {
        builder = builder.model_version(version);
    }

    if config.stream.test_run {
        info!("TEST_RUN is set; predictions will not be forwarded");
    } else {
        builder = builder.sink(Arc::new(KinesisSink::new(&config.stream).await));
    }

    let state = AppState {
        service: Arc::new(builder.build()),
        store,
    };

    info!("Inference service started successfully");

    tokio::select! {
        result = server::serve(state, &config.server) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutting down inference service");
        }
    }

    info!("Inference service stopped");

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
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
