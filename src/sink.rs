//! Output sinks for produced prediction events.
//!
//! Sinks are registered once at service construction and invoked in
//! registration order for every produced event. A failing sink fails the
//! invocation; failures are not isolated per sink, since a broken sink is
//! a configuration error the operator should observe.

use crate::config::StreamConfig;
use crate::service::PredictionEvent;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kinesis::config::Builder as KinesisConfigBuilder;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::Client as KinesisClient;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised while publishing a prediction event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize prediction event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish to stream {stream}: {message}")]
    Publish { stream: String, message: String },
}

/// Downstream consumer of produced prediction events.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Publish one prediction event.
    async fn publish(&self, event: &PredictionEvent) -> Result<(), SinkError>;
}

/// Sink publishing prediction events to a Kinesis stream.
///
/// Records are partitioned by the string form of `shot_id`, preserving
/// per-shot ordering downstream.
pub struct KinesisSink {
    client: KinesisClient,
    stream_name: String,
}

impl KinesisSink {
    /// Create a sink for the configured predictions stream.
    pub async fn new(config: &StreamConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = KinesisConfigBuilder::from(&aws_config);

        // Custom endpoint for LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        let client = KinesisClient::from_conf(builder.build());

        info!(stream = %config.name, "Kinesis sink initialized");

        Self {
            client,
            stream_name: config.name.clone(),
        }
    }
}

#[async_trait]
impl OutputSink for KinesisSink {
    #[instrument(skip(self, event), fields(stream = %self.stream_name, shot_id = event.prediction.shot_id))]
    async fn publish(&self, event: &PredictionEvent) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(event)?;
        let partition_key = event.prediction.shot_id.to_string();

        self.client
            .put_record()
            .stream_name(&self.stream_name)
            .partition_key(&partition_key)
            .data(Blob::new(payload))
            .send()
            .await
            .map_err(|e| SinkError::Publish {
                stream: self.stream_name.clone(),
                message: e.to_string(),
            })?;

        debug!(partition_key = %partition_key, "Published prediction event");
        Ok(())
    }
}
