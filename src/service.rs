//! The inference service: per-invocation orchestration.
//!
//! Each invocation carries a batch of encoded records. For every record
//! the service decodes, extracts features, predicts, appends a drift
//! sample, and dispatches the prediction event to every registered sink.
//! After the batch, a drift evaluation runs if the window has reached its
//! threshold. Any failure anywhere in the batch is converted into the
//! invocation-level error payload; partial results are discarded.

use crate::codec::{self, DecodeError, InvocationEvent};
use crate::drift::{
    BufferSample, DriftError, DriftEvaluator, DriftMonitor, KsDriftEvaluator, ReferenceDataset,
    DEFAULT_BUFFER_THRESHOLD,
};
use crate::features;
use crate::metrics_store::MetricsStore;
use crate::model::{PredictionError, Predictor};
use crate::sink::{OutputSink, SinkError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, instrument};

/// Model identifier stamped on every prediction event.
pub const MODEL_NAME: &str = "xgoals_prediction_model";

/// Any failure within one invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Drift(#[from] DriftError),
}

/// Prediction produced for one input record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionEvent {
    pub model: String,
    pub version: Option<String>,
    pub prediction: PredictionPayload,
}

/// Scored payload of a prediction event. `shot_id` always equals the
/// `shot_id` of the record that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionPayload {
    pub shot_xgoals: f64,
    pub shot_id: i64,
}

/// Invocation result: predictions on success, a message on failure.
///
/// Callers inspect the payload shape; the transport always reports
/// success.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InvocationResponse {
    Success { predictions: Vec<PredictionEvent> },
    Failure { error: String },
}

/// Long-lived inference service holding the drift window across
/// invocations.
pub struct InferenceService {
    predictor: Predictor,
    model_version: Option<String>,
    sinks: Vec<Arc<dyn OutputSink>>,
    monitor: DriftMonitor,
}

impl InferenceService {
    /// Start building a service around a predictor, the training-time
    /// reference, and a metrics store.
    pub fn builder(
        predictor: Predictor,
        reference: ReferenceDataset,
        store: Arc<dyn MetricsStore>,
    ) -> InferenceServiceBuilder {
        InferenceServiceBuilder {
            predictor,
            reference,
            store,
            model_version: None,
            sinks: Vec::new(),
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
            evaluator: None,
        }
    }

    /// Handle one batched invocation.
    ///
    /// Never panics or propagates: any failure becomes the error payload,
    /// so the hosting runtime observes a successful invocation either way.
    #[instrument(skip(self, event), fields(records = event.records.len()))]
    pub async fn handle(&self, event: InvocationEvent) -> InvocationResponse {
        match self.process(event).await {
            Ok(predictions) => {
                metrics::counter!("inference.predictions.served")
                    .increment(predictions.len() as u64);
                InvocationResponse::Success { predictions }
            }
            Err(e) => {
                error!(error = %e, "Invocation failed");
                metrics::counter!("inference.invocations.failed").increment(1);
                InvocationResponse::Failure {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn process(
        &self,
        event: InvocationEvent,
    ) -> Result<Vec<PredictionEvent>, InvocationError> {
        let mut predictions = Vec::with_capacity(event.records.len());

        for record in &event.records {
            let shot_event = codec::decode(&record.kinesis.data)?;
            let features = features::extract(&shot_event.shot);
            let prediction = self.predictor.predict(&features)?;

            self.monitor.record(BufferSample {
                distance_to_goal: shot_event.shot.distance_to_goal,
                angle_to_goal: shot_event.shot.angle_to_goal,
                prediction,
            });

            let prediction_event = PredictionEvent {
                model: MODEL_NAME.to_string(),
                version: self.model_version.clone(),
                prediction: PredictionPayload {
                    shot_xgoals: prediction,
                    shot_id: shot_event.shot_id,
                },
            };

            for sink in &self.sinks {
                sink.publish(&prediction_event).await?;
            }

            predictions.push(prediction_event);
        }

        self.monitor.evaluate_if_ready().await?;

        Ok(predictions)
    }

    /// Number of samples currently buffered.
    pub fn buffered_samples(&self) -> usize {
        self.monitor.window_len()
    }
}

/// Builder assembling an [`InferenceService`].
pub struct InferenceServiceBuilder {
    predictor: Predictor,
    reference: ReferenceDataset,
    store: Arc<dyn MetricsStore>,
    model_version: Option<String>,
    sinks: Vec<Arc<dyn OutputSink>>,
    buffer_threshold: usize,
    evaluator: Option<Arc<dyn DriftEvaluator>>,
}

impl InferenceServiceBuilder {
    /// Version identifier stamped on produced events.
    pub fn model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Register an output sink. Sinks receive every produced event in
    /// registration order.
    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of buffered samples that triggers a drift evaluation.
    pub fn buffer_threshold(mut self, threshold: usize) -> Self {
        self.buffer_threshold = threshold;
        self
    }

    /// Replace the default KS evaluator.
    pub fn evaluator(mut self, evaluator: Arc<dyn DriftEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> InferenceService {
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(KsDriftEvaluator::new()));

        InferenceService {
            predictor: self.predictor,
            model_version: self.model_version,
            sinks: self.sinks,
            monitor: DriftMonitor::new(self.buffer_threshold, self.reference, evaluator, self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RecordPayload, StreamRecord};
    use crate::drift::DriftMetrics;
    use crate::metrics_store::MockMetricsStore;
    use crate::model::ScoringModel;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scorer returning a fixed value for every row.
    struct FixedModel {
        value: f64,
    }

    impl ScoringModel for FixedModel {
        fn score(
            &self,
            rows: &[crate::features::FeatureVector],
        ) -> Result<Vec<f64>, PredictionError> {
            Ok(vec![self.value; rows.len()])
        }
    }

    /// Sink recording every published event.
    struct RecordingSink {
        events: Mutex<Vec<PredictionEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OutputSink for RecordingSink {
        async fn publish(&self, event: &PredictionEvent) -> Result<(), SinkError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    /// Sink failing on every publish.
    struct BrokenSink;

    #[async_trait]
    impl OutputSink for BrokenSink {
        async fn publish(&self, _event: &PredictionEvent) -> Result<(), SinkError> {
            Err(SinkError::Publish {
                stream: "shot_predictions".to_string(),
                message: "stream unavailable".to_string(),
            })
        }
    }

    /// Evaluator counting how often it ran.
    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    impl CountingEvaluator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DriftEvaluator for CountingEvaluator {
        fn evaluate(
            &self,
            current: &[BufferSample],
            _reference: &ReferenceDataset,
        ) -> Result<DriftMetrics, DriftError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DriftMetrics {
                timestamp: Utc::now(),
                prediction_drift_share: 0.0,
                num_drifted_columns: 0,
                share_missing_values: 0.0,
                distance_to_goal_median: current[0].distance_to_goal,
            })
        }
    }

    fn encode_shot(shot_id: i64, distance: f64, angle: f64) -> String {
        STANDARD.encode(format!(
            r#"{{"shot": {{"distance_to_goal": {distance}, "angle_to_goal": {angle}}}, "shot_id": {shot_id}}}"#
        ))
    }

    fn envelope(shot_ids: &[i64]) -> InvocationEvent {
        InvocationEvent {
            records: shot_ids
                .iter()
                .map(|id| StreamRecord {
                    kinesis: RecordPayload {
                        data: encode_shot(*id, 5.1, 1.2),
                    },
                })
                .collect(),
        }
    }

    fn reference() -> ReferenceDataset {
        ReferenceDataset::new(vec![
            BufferSample {
                distance_to_goal: 5.0,
                angle_to_goal: 1.0,
                prediction: 0.5,
            };
            20
        ])
    }

    fn quiet_store() -> Arc<MockMetricsStore> {
        let mut store = MockMetricsStore::new();
        store.expect_append().returning(|_| Ok(()));
        Arc::new(store)
    }

    fn service_with(value: f64) -> InferenceService {
        InferenceService::builder(
            Predictor::new(Arc::new(FixedModel { value })),
            reference(),
            quiet_store(),
        )
        .model_version("Test123")
        .buffer_threshold(100)
        .build()
    }

    #[tokio::test]
    async fn test_single_record_produces_expected_event() {
        let service = service_with(10.0);

        let response = service.handle(envelope(&[123])).await;

        let InvocationResponse::Success { predictions } = response else {
            panic!("expected success response");
        };
        assert_eq!(
            predictions,
            vec![PredictionEvent {
                model: MODEL_NAME.to_string(),
                version: Some("Test123".to_string()),
                prediction: PredictionPayload {
                    shot_xgoals: 10.0,
                    shot_id: 123,
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_response_serialization_shapes() {
        let success = InvocationResponse::Success {
            predictions: vec![PredictionEvent {
                model: MODEL_NAME.to_string(),
                version: None,
                prediction: PredictionPayload {
                    shot_xgoals: 0.4,
                    shot_id: 7,
                },
            }],
        };
        let failure = InvocationResponse::Failure {
            error: "malformed shot event".to_string(),
        };

        let success_json = serde_json::to_value(&success).unwrap();
        let failure_json = serde_json::to_value(&failure).unwrap();

        assert!(success_json.get("predictions").is_some());
        assert_eq!(
            failure_json,
            serde_json::json!({"error": "malformed shot event"})
        );
    }

    #[tokio::test]
    async fn test_predictions_preserve_input_order() {
        let service = service_with(0.3);

        let response = service.handle(envelope(&[1, 2, 3])).await;

        let InvocationResponse::Success { predictions } = response else {
            panic!("expected success response");
        };
        let ids: Vec<i64> = predictions.iter().map(|p| p.prediction.shot_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_malformed_record_discards_whole_batch() {
        let service = service_with(0.3);

        let mut event = envelope(&[1, 2]);
        event.records.insert(
            1,
            StreamRecord {
                kinesis: RecordPayload {
                    data: "!!! not base64 !!!".to_string(),
                },
            },
        );

        let response = service.handle(event).await;

        let InvocationResponse::Failure { error } = response else {
            panic!("expected failure response");
        };
        assert!(!error.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_fails_the_invocation() {
        let service = InferenceService::builder(
            Predictor::new(Arc::new(FixedModel { value: 0.3 })),
            reference(),
            quiet_store(),
        )
        .sink(Arc::new(BrokenSink))
        .buffer_threshold(100)
        .build();

        let response = service.handle(envelope(&[1])).await;

        let InvocationResponse::Failure { error } = response else {
            panic!("expected failure response");
        };
        assert!(error.contains("shot_predictions"));
    }

    #[tokio::test]
    async fn test_sinks_receive_every_event_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let service = InferenceService::builder(
            Predictor::new(Arc::new(FixedModel { value: 0.3 })),
            reference(),
            quiet_store(),
        )
        .sink(sink.clone())
        .buffer_threshold(100)
        .build();

        service.handle(envelope(&[1, 2])).await;
        service.handle(envelope(&[3])).await;

        let ids: Vec<i64> = sink
            .events
            .lock()
            .iter()
            .map(|e| e.prediction.shot_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_no_sinks_still_produces_predictions() {
        // TEST_RUN deployments register no sink at all.
        let service = service_with(0.3);

        for i in 0..3i64 {
            let response = service.handle(envelope(&[i])).await;
            let InvocationResponse::Success { predictions } = response else {
                panic!("expected success response");
            };
            assert_eq!(predictions.len(), 1);
        }
    }

    fn drift_service(
        threshold: usize,
        evaluator: Arc<CountingEvaluator>,
    ) -> InferenceService {
        InferenceService::builder(
            Predictor::new(Arc::new(FixedModel { value: 0.3 })),
            reference(),
            quiet_store(),
        )
        .buffer_threshold(threshold)
        .evaluator(evaluator)
        .build()
    }

    #[tokio::test]
    async fn test_tenth_sample_triggers_exactly_one_evaluation() {
        let evaluator = Arc::new(CountingEvaluator::new());
        let service = drift_service(10, evaluator.clone());

        for i in 0..9i64 {
            service.handle(envelope(&[i])).await;
        }
        assert_eq!(evaluator.calls(), 0);
        assert_eq!(service.buffered_samples(), 9);

        service.handle(envelope(&[9])).await;

        assert_eq!(evaluator.calls(), 1);
        assert_eq!(service.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn test_consecutive_threshold_crossings_each_evaluate_once() {
        let evaluator = Arc::new(CountingEvaluator::new());
        let service = drift_service(10, evaluator.clone());

        for i in 0..20i64 {
            service.handle(envelope(&[i])).await;
        }

        assert_eq!(evaluator.calls(), 2);
        assert_eq!(service.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn test_buffer_stays_below_threshold_after_every_invocation() {
        let evaluator = Arc::new(CountingEvaluator::new());
        let service = drift_service(3, evaluator.clone());

        for i in 0..10i64 {
            service.handle(envelope(&[i])).await;
            assert!(service.buffered_samples() < 3);
        }
    }

    #[tokio::test]
    async fn test_evaluator_failure_fails_the_invocation() {
        let mut evaluator = crate::drift::MockDriftEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Err(DriftError::EmptyReference));

        let service = InferenceService::builder(
            Predictor::new(Arc::new(FixedModel { value: 0.3 })),
            reference(),
            quiet_store(),
        )
        .buffer_threshold(1)
        .evaluator(Arc::new(evaluator))
        .build();

        let response = service.handle(envelope(&[1])).await;

        assert!(matches!(response, InvocationResponse::Failure { .. }));
        // The window was drained before the evaluator ran.
        assert_eq!(service.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn test_threshold_is_checked_after_the_whole_batch() {
        let evaluator = Arc::new(CountingEvaluator::new());
        let service = drift_service(2, evaluator.clone());

        // Five records in one batch cross the threshold mid-batch, but
        // evaluation runs once, after the batch.
        service.handle(envelope(&[1, 2, 3, 4, 5])).await;

        assert_eq!(evaluator.calls(), 1);
        assert_eq!(service.buffered_samples(), 0);
    }
}
