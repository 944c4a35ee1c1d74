//! Service configuration.
//!
//! Configuration is layered: built-in defaults, optional config files,
//! `XGOALS__`-prefixed environment variables, and finally the bare
//! variable names the deployment environment sets directly
//! (`PREDICTIONS_STREAM_NAME`, `TEST_RUN` and friends).

use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the inference service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service-level configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Predictions stream configuration
    #[serde(default)]
    pub stream: StreamConfig,
    /// Model resolution configuration
    #[serde(default)]
    pub model: ModelConfig,
    /// Metrics database configuration
    pub database: DatabaseConfig,
    /// Drift monitoring configuration
    #[serde(default)]
    pub drift: DriftConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP server configuration for the invocation boundary
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Predictions stream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Target stream for produced prediction events
    #[serde(default = "default_stream_name")]
    pub name: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack)
    pub endpoint_url: Option<String>,
    /// When true, no output sink is registered and predictions are not
    /// forwarded
    #[serde(default)]
    pub test_run: bool,
}

/// Model resolution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Registered model identifier in the registry
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Bucket holding registry manifests and run artifacts
    #[serde(default = "default_model_bucket")]
    pub bucket: String,
    /// Experiment the production runs belong to
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,
    /// Direct artifact location overriding the registry lookup
    /// (`s3://bucket/prefix` or a local path)
    pub location: Option<String>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack)
    pub endpoint_url: Option<String>,
}

/// Metrics database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Drift monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DriftConfig {
    /// Number of buffered samples that triggers a drift evaluation
    #[serde(default = "default_buffer_threshold")]
    pub buffer_threshold: usize,
}

// Default value functions
fn default_service_name() -> String {
    "inference-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_stream_name() -> String {
    "shot_predictions".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_model_name() -> String {
    "xgoals".to_string()
}

fn default_model_bucket() -> String {
    "xgoals-test-exp".to_string()
}

fn default_experiment_id() -> String {
    "1".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_buffer_threshold() -> usize {
    10
}

impl Config {
    /// Load configuration from defaults, config files, and environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            // Config file if present
            .add_source(config::File::with_name("config/inference").required(false))
            .add_source(config::File::with_name("/etc/xgoals/inference").required(false))
            // Structured environment overrides
            // XGOALS__STREAM__NAME -> stream.name
            .add_source(
                config::Environment::with_prefix("XGOALS")
                    .separator("__")
                    .try_parsing(true),
            );

        // Bare variable names set by the deployment environment take
        // precedence over the prefixed form.
        for (var, key) in [
            ("PREDICTIONS_STREAM_NAME", "stream.name"),
            ("KINESIS_ENDPOINT_URL", "stream.endpoint_url"),
            ("MODEL_LOCATION", "model.location"),
            ("MODEL_BUCKET", "model.bucket"),
            ("MLFLOW_EXPERIMENT_ID", "model.experiment_id"),
        ] {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }
        if let Ok(value) = std::env::var("TEST_RUN") {
            builder = builder.set_override("stream.test_run", parse_flag(&value))?;
        }

        builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Database connection timeout as a Duration.
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }
}

/// Parse the boolean flags the deployment environment sets as text.
fn parse_flag(value: &str) -> bool {
    matches!(value, "True" | "true" | "1")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: default_stream_name(),
            region: default_region(),
            endpoint_url: None,
            test_run: false,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            bucket: default_model_bucket(),
            experiment_id: default_experiment_id(),
            location: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            buffer_threshold: default_buffer_threshold(),
        }
    }
}
