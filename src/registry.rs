//! Model resolution from the training registry.
//!
//! The training pipeline lays the registry out in S3: a stage manifest
//! under `registry/{model}/production.json` names the run currently
//! promoted to production, and each run's artifacts live under
//! `{experiment_id}/{run_id}/artifacts/`. A configured model location
//! bypasses the stage lookup and points directly at an artifact
//! directory, either `s3://bucket/prefix` or a local path.
//!
//! Everything here runs once at startup; failures are fatal because the
//! service cannot serve without a model.

use crate::config::ModelConfig;
use crate::drift::ReferenceDataset;
use crate::model::{ArtifactModel, ScoringModel};
use anyhow::{bail, Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Object names inside a run's artifact directory.
const MODEL_ARTIFACT: &str = "model/model.json";
const REFERENCE_ARTIFACT: &str = "reference/reference.json";

/// Stage manifest written by the training pipeline on promotion.
#[derive(Debug, Deserialize)]
struct StageManifest {
    run_id: String,
}

/// A fully resolved production model.
pub struct ResolvedModel {
    /// Scoring capability reconstructed from the artifact.
    pub scorer: Arc<dyn ScoringModel>,
    /// Version identifier (the producing run), when known.
    pub version: Option<String>,
    /// Training-time reference snapshot for drift comparison.
    pub reference: ReferenceDataset,
}

/// Registry client resolving the production model at startup.
pub struct ModelRegistry {
    client: S3Client,
    config: ModelConfig,
}

impl ModelRegistry {
    pub async fn new(config: &ModelConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoints (LocalStack, MinIO) need path-style access
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url).force_path_style(true);
        }

        let client = S3Client::from_conf(builder.build());

        Self {
            client,
            config: config.clone(),
        }
    }

    /// Resolve the production-stage model: the scorer, its version, and
    /// the reference dataset.
    pub async fn resolve_production(&self) -> Result<ResolvedModel> {
        let (location, version) = match self.config.location {
            Some(ref location) => (location.clone(), None),
            None => {
                let run_id = self.production_run_id().await?;
                let location = format!(
                    "s3://{}/{}/{}/artifacts",
                    self.config.bucket, self.config.experiment_id, run_id
                );
                (location, Some(run_id))
            }
        };

        info!(location = %location, version = ?version, "Loading production model");

        let (model_bytes, reference_bytes) = futures::future::try_join(
            self.fetch(&location, MODEL_ARTIFACT),
            self.fetch(&location, REFERENCE_ARTIFACT),
        )
        .await?;

        let scorer =
            ArtifactModel::from_json(&model_bytes).context("Failed to parse model artifact")?;
        let reference = ReferenceDataset::from_json(&reference_bytes)
            .context("Failed to parse reference dataset")?;

        if reference.is_empty() {
            bail!("reference dataset has no rows");
        }

        info!(reference_rows = reference.len(), "Production model loaded");

        Ok(ResolvedModel {
            scorer: Arc::new(scorer),
            version,
            reference,
        })
    }

    /// Look up the run currently promoted to the production stage.
    async fn production_run_id(&self) -> Result<String> {
        let key = format!("registry/{}/production.json", self.config.name);
        let bytes = self
            .get_object(&self.config.bucket, &key)
            .await
            .with_context(|| format!("Failed to fetch stage manifest {key}"))?;

        let manifest: StageManifest =
            serde_json::from_slice(&bytes).context("Failed to parse stage manifest")?;

        Ok(manifest.run_id)
    }

    /// Fetch one artifact relative to a model location.
    async fn fetch(&self, location: &str, name: &str) -> Result<Vec<u8>> {
        match split_s3_location(location) {
            Some((bucket, prefix)) => {
                let key = artifact_key(prefix, name);
                self.get_object(bucket, &key)
                    .await
                    .with_context(|| format!("Failed to fetch artifact s3://{bucket}/{key}"))
            }
            None => {
                let path = Path::new(location).join(name);
                std::fs::read(&path)
                    .with_context(|| format!("Failed to read artifact {}", path.display()))
            }
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;

        Ok(data.into_bytes().to_vec())
    }
}

/// Split an `s3://bucket/prefix` location into bucket and prefix.
/// Returns `None` for local paths.
fn split_s3_location(location: &str) -> Option<(&str, &str)> {
    let remainder = location.strip_prefix("s3://")?;
    let (bucket, prefix) = remainder.split_once('/')?;
    Some((bucket, prefix.trim_end_matches('/')))
}

fn artifact_key(prefix: &str, name: &str) -> String {
    format!("{prefix}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_s3_location() {
        assert_eq!(
            split_s3_location("s3://xgoals-test-exp/1/run42/artifacts"),
            Some(("xgoals-test-exp", "1/run42/artifacts"))
        );
        assert_eq!(
            split_s3_location("s3://bucket/prefix/"),
            Some(("bucket", "prefix"))
        );
        assert_eq!(split_s3_location("/var/lib/xgoals/model"), None);
    }

    #[test]
    fn test_artifact_key_joins_prefix_and_name() {
        assert_eq!(
            artifact_key("1/run42/artifacts", MODEL_ARTIFACT),
            "1/run42/artifacts/model/model.json"
        );
    }

    #[test]
    fn test_stage_manifest_parses_run_id() {
        let manifest: StageManifest =
            serde_json::from_slice(br#"{"run_id": "e1efc53e9bd149078b0c12aeaa6365df"}"#).unwrap();
        assert_eq!(manifest.run_id, "e1efc53e9bd149078b0c12aeaa6365df");
    }

    #[test]
    fn test_local_artifacts_load_from_disk() {
        let dir = std::env::temp_dir().join("xgoals-registry-test");
        let model_dir = dir.join("model");
        let reference_dir = dir.join("reference");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(&reference_dir).unwrap();
        std::fs::write(
            model_dir.join("model.json"),
            br#"{"coefficients": {"distance_to_goal": 1.0, "angle_to_goal": 1.0}}"#,
        )
        .unwrap();
        std::fs::write(
            reference_dir.join("reference.json"),
            br#"[{"distance_to_goal": 5.0, "angle_to_goal": 1.0, "prediction": 0.5}]"#,
        )
        .unwrap();

        let model_bytes = std::fs::read(Path::new(&dir).join(MODEL_ARTIFACT)).unwrap();
        let reference = ReferenceDataset::from_json(
            &std::fs::read(Path::new(&dir).join(REFERENCE_ARTIFACT)).unwrap(),
        )
        .unwrap();

        assert!(ArtifactModel::from_json(&model_bytes).is_ok());
        assert_eq!(reference.len(), 1);
    }
}
