//! xGoals Inference Service
//!
//! Real-time shot-quality prediction service for a streaming pipeline.
//! The service receives batched stream records, decodes each into a shot
//! event, computes an expected-goals prediction per record, forwards every
//! prediction to the registered output sinks, and monitors the live input
//! distribution for drift against the training-time reference dataset.
//!
//! ## Features
//!
//! - **Per-record prediction pipeline**: base64/JSON decoding, feature
//!   extraction, and scoring through an opaque model capability
//! - **Pluggable output sinks**: every produced prediction event goes to
//!   each registered sink in order; the default sink publishes to a
//!   Kinesis stream partitioned by shot id
//! - **Bounded drift window**: recent samples accumulate until a
//!   threshold, then a Kolmogorov-Smirnov comparison runs against the
//!   reference dataset and the metrics row is persisted to PostgreSQL
//! - **Crash-free invocation boundary**: any failure inside a batch is
//!   converted into a structured error payload
//!
//! ## Architecture
//!
//! ```text
//! Invocation                  Inference Service            PostgreSQL
//! ┌──────────────┐           ┌──────────────────┐          ┌───────────────┐
//! │ {"Records":  │           │ decode           │          │ drift_metrics │
//! │   [base64]}  │──────────▶│  extract         │          └───────────────┘
//! └──────────────┘           │   predict        │                 ▲
//!                            │    buffer sample │                 │
//!                            └──────────────────┘                 │
//!                               │            │                    │
//!                               ▼            ▼                    │
//!                        ┌──────────┐ ┌──────────────┐            │
//!                        │ Output   │ │ Drift window │────────────┘
//!                        │ Sinks    │ │ ≥ threshold? │  evaluate + persist
//!                        └──────────┘ └──────────────┘
//!                               │
//!                               ▼
//!                        predictions stream
//! ```

pub mod codec;
pub mod config;
pub mod drift;
pub mod features;
pub mod metrics_store;
pub mod model;
pub mod registry;
pub mod server;
pub mod service;
pub mod sink;

pub use codec::{decode, DecodeError, InvocationEvent, Shot, ShotEvent};
pub use config::Config;
pub use drift::{
    BufferSample, DriftError, DriftEvaluator, DriftMetrics, DriftMonitor, KsDriftEvaluator,
    ReferenceDataset, DEFAULT_BUFFER_THRESHOLD,
};
pub use features::{extract, FeatureVector};
pub use metrics_store::{MetricsStore, PgMetricsStore, StoreError};
pub use model::{ArtifactModel, ModelArtifact, PredictionError, Predictor, ScoringModel};
pub use registry::{ModelRegistry, ResolvedModel};
pub use server::AppState;
pub use service::{
    InferenceService, InferenceServiceBuilder, InvocationError, InvocationResponse,
    PredictionEvent, PredictionPayload, MODEL_NAME,
};
pub use sink::{KinesisSink, OutputSink, SinkError};
