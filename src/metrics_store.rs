//! Persistence of drift evaluation results.
//!
//! One row per evaluation, append-only. The schema is created on startup
//! if absent; the service never reads the rows back.

use crate::config::DatabaseConfig;
use crate::drift::DriftMetrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while persisting drift metrics.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only store for drift evaluation rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Append one evaluation result.
    async fn append(&self, metrics: &DriftMetrics) -> Result<(), StoreError>;
}

/// PostgreSQL-backed metrics store.
pub struct PgMetricsStore {
    pool: PgPool,
}

impl PgMetricsStore {
    /// Connect to PostgreSQL with a bounded pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL metrics database");

        Ok(Self { pool })
    }

    /// Create the drift metrics table if it does not exist. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_DRIFT_METRICS_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create drift_metrics table")?;

        debug!("drift_metrics table is present");
        Ok(())
    }

    /// Connection pool handle for readiness checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const CREATE_DRIFT_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS drift_metrics (
    timestamp TIMESTAMPTZ NOT NULL,
    prediction_drift_share DOUBLE PRECISION NOT NULL,
    num_drifted_columns INTEGER NOT NULL,
    share_missing_values DOUBLE PRECISION NOT NULL,
    distance_to_goal_median DOUBLE PRECISION NOT NULL
)
"#;

#[async_trait]
impl MetricsStore for PgMetricsStore {
    async fn append(&self, metrics: &DriftMetrics) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO drift_metrics (
                timestamp, prediction_drift_share, num_drifted_columns,
                share_missing_values, distance_to_goal_median
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(metrics.timestamp)
        .bind(metrics.prediction_drift_share)
        .bind(metrics.num_drifted_columns)
        .bind(metrics.share_missing_values)
        .bind(metrics.distance_to_goal_median)
        .execute(&self.pool)
        .await?;

        debug!(timestamp = %metrics.timestamp, "Appended drift metrics row");
        Ok(())
    }
}
