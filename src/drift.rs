//! Drift buffer and evaluation.
//!
//! Every processed record contributes one [`BufferSample`] to an in-memory
//! window. When the window reaches the configured threshold it is drained
//! atomically and compared against the training-time reference dataset,
//! and the resulting [`DriftMetrics`] row is persisted through the metrics
//! store. A persistence failure is logged and swallowed so that serving
//! never blocks on a monitoring-store outage.

use crate::metrics_store::MetricsStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Default number of buffered samples that triggers a drift evaluation.
pub const DEFAULT_BUFFER_THRESHOLD: usize = 10;

/// Two-sided KS critical coefficient at the 0.05 significance level.
const KS_COEFFICIENT_P05: f64 = 1.358;

/// Errors raised by drift evaluation.
#[derive(Debug, Error)]
pub enum DriftError {
    /// The current window had no samples to compare.
    #[error("drift evaluation requires a non-empty current window")]
    EmptyWindow,

    /// The reference dataset had no rows.
    #[error("reference dataset is empty")]
    EmptyReference,
}

/// One observation of the live input distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferSample {
    pub distance_to_goal: f64,
    pub angle_to_goal: f64,
    pub prediction: f64,
}

/// Column of the drift comparison table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftColumn {
    DistanceToGoal,
    AngleToGoal,
    Prediction,
}

impl DriftColumn {
    /// All compared columns.
    pub const ALL: [DriftColumn; 3] = [
        DriftColumn::DistanceToGoal,
        DriftColumn::AngleToGoal,
        DriftColumn::Prediction,
    ];

    fn value(self, sample: &BufferSample) -> f64 {
        match self {
            DriftColumn::DistanceToGoal => sample.distance_to_goal,
            DriftColumn::AngleToGoal => sample.angle_to_goal,
            DriftColumn::Prediction => sample.prediction,
        }
    }
}

/// Immutable tabular snapshot captured at training time.
///
/// Loaded once at service start and used as the stationary baseline for
/// every drift comparison; only the current window changes between
/// evaluations.
#[derive(Debug, Clone)]
pub struct ReferenceDataset {
    samples: Vec<BufferSample>,
}

impl ReferenceDataset {
    pub fn new(samples: Vec<BufferSample>) -> Self {
        Self { samples }
    }

    /// Parse a reference dataset from its serialized JSON rows.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let samples: Vec<BufferSample> = serde_json::from_slice(bytes)?;
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn column(&self, column: DriftColumn) -> Vec<f64> {
        self.samples.iter().map(|s| column.value(s)).collect()
    }
}

/// Result of one drift evaluation, persisted as a single row.
#[derive(Debug, Clone, Serialize)]
pub struct DriftMetrics {
    /// Evaluation time.
    pub timestamp: DateTime<Utc>,
    /// KS distance between the current and reference prediction
    /// distributions.
    pub prediction_drift_share: f64,
    /// Number of compared columns classified as drifted.
    pub num_drifted_columns: i32,
    /// Share of non-finite cells in the current window.
    pub share_missing_values: f64,
    /// Median distance_to_goal in the current window.
    pub distance_to_goal_median: f64,
}

/// Statistical comparison between the live window and the reference.
///
/// The detection algorithm itself is a capability; the service only
/// depends on this contract.
#[cfg_attr(test, mockall::automock)]
pub trait DriftEvaluator: Send + Sync {
    /// Compare the current window against the reference dataset.
    fn evaluate(
        &self,
        current: &[BufferSample],
        reference: &ReferenceDataset,
    ) -> Result<DriftMetrics, DriftError>;
}

/// Drift evaluator based on the two-sample Kolmogorov-Smirnov test.
///
/// A column counts as drifted when its KS statistic exceeds the critical
/// value derived from the significance coefficient and both sample sizes.
pub struct KsDriftEvaluator {
    critical_coefficient: f64,
}

impl KsDriftEvaluator {
    pub fn new() -> Self {
        Self {
            critical_coefficient: KS_COEFFICIENT_P05,
        }
    }

    /// Override the critical coefficient. Lower values flag drift sooner.
    pub fn with_critical_coefficient(coefficient: f64) -> Self {
        Self {
            critical_coefficient: coefficient,
        }
    }

    fn is_drifted(&self, statistic: f64, n: usize, m: usize) -> bool {
        let critical =
            self.critical_coefficient * (((n + m) as f64) / ((n * m) as f64)).sqrt();
        statistic > critical
    }
}

impl Default for KsDriftEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftEvaluator for KsDriftEvaluator {
    fn evaluate(
        &self,
        current: &[BufferSample],
        reference: &ReferenceDataset,
    ) -> Result<DriftMetrics, DriftError> {
        if current.is_empty() {
            return Err(DriftError::EmptyWindow);
        }
        if reference.is_empty() {
            return Err(DriftError::EmptyReference);
        }

        let mut num_drifted_columns = 0;
        let mut prediction_drift_share = 0.0;

        for column in DriftColumn::ALL {
            let live: Vec<f64> = current.iter().map(|s| column.value(s)).collect();
            let baseline = reference.column(column);

            let statistic = ks_statistic(&live, &baseline);
            if self.is_drifted(statistic, live.len(), baseline.len()) {
                num_drifted_columns += 1;
            }
            if column == DriftColumn::Prediction {
                prediction_drift_share = statistic;
            }
        }

        let distances: Vec<f64> = current.iter().map(|s| s.distance_to_goal).collect();

        Ok(DriftMetrics {
            timestamp: Utc::now(),
            prediction_drift_share,
            num_drifted_columns,
            share_missing_values: missing_share(current),
            distance_to_goal_median: median(&distances),
        })
    }
}

/// Two-sample KS statistic: the supremum distance between the empirical
/// CDFs of `a` and `b`. Non-finite values are excluded before comparison.
pub fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let mut a: Vec<f64> = a.iter().copied().filter(|v| v.is_finite()).collect();
    let mut b: Vec<f64> = b.iter().copied().filter(|v| v.is_finite()).collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut statistic: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        let delta = (i as f64 / na - j as f64 / nb).abs();
        statistic = statistic.max(delta);
    }

    statistic
}

/// Share of non-finite cells across all columns of the window.
fn missing_share(window: &[BufferSample]) -> f64 {
    let total = window.len() * DriftColumn::ALL.len();
    if total == 0 {
        return 0.0;
    }

    let missing = window
        .iter()
        .flat_map(|s| DriftColumn::ALL.iter().map(move |c| c.value(s)))
        .filter(|v| !v.is_finite())
        .count();

    missing as f64 / total as f64
}

/// Median of a sample, midpoint-interpolated for even lengths.
/// Non-finite values are excluded.
fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Bounded sample window with threshold-triggered evaluation.
///
/// Appending and the threshold check-and-drain run under one mutex, so
/// concurrent invocations can neither double-evaluate nor lose samples.
/// The window is drained before evaluation runs; an evaluator failure
/// never leaves the buffer at or above the threshold.
pub struct DriftMonitor {
    buffer: Mutex<Vec<BufferSample>>,
    threshold: usize,
    reference: ReferenceDataset,
    evaluator: Arc<dyn DriftEvaluator>,
    store: Arc<dyn MetricsStore>,
}

impl DriftMonitor {
    pub fn new(
        threshold: usize,
        reference: ReferenceDataset,
        evaluator: Arc<dyn DriftEvaluator>,
        store: Arc<dyn MetricsStore>,
    ) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            threshold,
            reference,
            evaluator,
            store,
        }
    }

    /// Append one sample to the window.
    pub fn record(&self, sample: BufferSample) {
        self.buffer.lock().push(sample);
    }

    /// Current window length.
    pub fn window_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Atomically drain the window if it has reached the threshold.
    fn drain_if_full(&self) -> Option<Vec<BufferSample>> {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.threshold {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    }

    /// Run a drift evaluation if the window has reached the threshold.
    ///
    /// Returns the metrics when an evaluation ran. Evaluation and
    /// persistence run outside the buffer lock, on the drained snapshot.
    pub async fn evaluate_if_ready(&self) -> Result<Option<DriftMetrics>, DriftError> {
        let Some(window) = self.drain_if_full() else {
            return Ok(None);
        };

        let report = self.evaluator.evaluate(&window, &self.reference)?;

        info!(
            window_len = window.len(),
            prediction_drift_share = report.prediction_drift_share,
            num_drifted_columns = report.num_drifted_columns,
            "Drift evaluation completed"
        );
        metrics::counter!("inference.drift.evaluations").increment(1);

        if let Err(e) = self.store.append(&report).await {
            warn!(error = %e, "Failed to persist drift metrics");
            metrics::counter!("inference.drift.persist_failures").increment(1);
        }

        Ok(Some(report))
    }
}
