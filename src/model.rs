//! Scoring model capability and the prediction adapter.
//!
//! The scoring model is opaque to the service: it accepts a tabular input
//! and returns one score per row. [`Predictor`] marshals a single
//! [`FeatureVector`] into that shape and unwraps the single resulting
//! scalar. The artifact-backed model the registry reconstructs at startup
//! lives alongside.

use crate::features::FeatureVector;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the prediction path.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// The underlying scorer failed.
    #[error("model scoring failed: {0}")]
    Model(String),

    /// The scorer returned no rows for a one-row input.
    #[error("model returned no prediction")]
    EmptyOutput,

    /// The scorer returned a non-numeric value.
    #[error("model returned a non-numeric prediction: {0}")]
    NonNumeric(f64),

    /// A feature required by the model was absent from the input row.
    #[error("missing feature: {0}")]
    MissingFeature(String),
}

/// Tabular-in, scores-out capability of an opaque trained model.
///
/// Implementations are assumed stable for the service's lifetime; a
/// scoring failure is surfaced, never retried.
#[cfg_attr(test, mockall::automock)]
pub trait ScoringModel: Send + Sync {
    /// Score a batch of feature rows, one output per row.
    fn score(&self, rows: &[FeatureVector]) -> Result<Vec<f64>, PredictionError>;
}

/// Adapter between the service's feature vectors and the scorer's
/// tabular shape.
pub struct Predictor {
    model: Arc<dyn ScoringModel>,
}

impl Predictor {
    pub fn new(model: Arc<dyn ScoringModel>) -> Self {
        Self { model }
    }

    /// Predict the shot-quality score for one feature vector.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, PredictionError> {
        let rows = [features.clone()];
        let outputs = self.model.score(&rows)?;

        let prediction = *outputs.first().ok_or(PredictionError::EmptyOutput)?;
        if !prediction.is_finite() {
            return Err(PredictionError::NonNumeric(prediction));
        }

        debug!(prediction, "Computed shot prediction");

        Ok(prediction)
    }
}

/// Serialized regression artifact produced by the training pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArtifact {
    /// Per-feature coefficients.
    pub coefficients: BTreeMap<String, f64>,
    /// Intercept term.
    #[serde(default)]
    pub intercept: f64,
    /// When true, scores pass through the logistic link so they land in
    /// (0, 1).
    #[serde(default)]
    pub logistic: bool,
}

/// Scorer reconstructed from a registry artifact.
#[derive(Debug)]
pub struct ArtifactModel {
    artifact: ModelArtifact,
}

impl ArtifactModel {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    /// Parse an artifact from its serialized JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, PredictionError> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)
            .map_err(|e| PredictionError::Model(format!("invalid model artifact: {e}")))?;
        Ok(Self::new(artifact))
    }

    fn score_row(&self, row: &FeatureVector) -> Result<f64, PredictionError> {
        let mut score = self.artifact.intercept;

        for (name, coefficient) in &self.artifact.coefficients {
            let value = row
                .get(name)
                .ok_or_else(|| PredictionError::MissingFeature(name.clone()))?;
            score += coefficient * value;
        }

        if self.artifact.logistic {
            score = 1.0 / (1.0 + (-score).exp());
        }

        Ok(score)
    }
}

impl ScoringModel for ArtifactModel {
    fn score(&self, rows: &[FeatureVector]) -> Result<Vec<f64>, PredictionError> {
        rows.iter().map(|row| self.score_row(row)).collect()
    }
}
