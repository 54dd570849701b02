//! Pipeline and per-request configuration

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{Result, VrdfError};
use crate::types::LabelSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of study directories
pub const DEFAULT_STORAGE_ROOT: &str = "storage/studies";

/// Default per-request configuration file
pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Optional per-request configuration.
///
/// Only `transfer_function` is interpreted; it is handed to the encoder
/// untouched. Unknown fields are kept so they survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_function: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserConfig {
    /// Load a configuration file. A missing file means "no configuration".
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No user config, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(VrdfError::io(path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            VrdfError::Configuration(format!("{}: {}", path.display(), e))
        })
    }
}

/// Settings shared by every conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per study
    pub storage_root: PathBuf,

    /// Labels to decompose, in channel order
    pub labels: LabelSet,

    /// Upper bound on the channel volume allocation, in bytes
    pub memory_budget: Option<usize>,

    pub compression: CompressionMethod,

    pub compression_level: CompressionLevel,
}

impl PipelineConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    pub fn with_compression(mut self, method: CompressionMethod, level: CompressionLevel) -> Self {
        self.compression = method;
        self.compression_level = level;
        self
    }

    /// Directory of a study, without checking that it exists
    pub fn study_dir(&self, study: &str) -> PathBuf {
        self.storage_root.join(study)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            labels: LabelSet::default(),
            memory_budget: None,
            compression: CompressionMethod::default(),
            compression_level: CompressionLevel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_config_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = UserConfig::load(&dir.path().join("config.json")).await.unwrap();
        assert_eq!(config, UserConfig::default());
        assert!(config.transfer_function.is_none());
    }

    #[tokio::test]
    async fn test_transfer_function_passthrough() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            br#"{"transfer_function": {"0": [0, 0, 0, 0], "1": [255, 0, 0, 128]}, "debug": true}"#,
        )
        .await
        .unwrap();

        let config = UserConfig::load(&path).await.unwrap();
        let tf = config.transfer_function.unwrap();
        assert_eq!(tf["1"][3], 128);
        assert_eq!(config.extra["debug"], true);
    }

    #[tokio::test]
    async fn test_config_without_transfer_function() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, br#"{"quality": "high"}"#).await.unwrap();

        let config = UserConfig::load(&path).await.unwrap();
        assert!(config.transfer_function.is_none());
    }

    #[tokio::test]
    async fn test_malformed_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = UserConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, VrdfError::Configuration(_)));
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"labels": [0, 1, 2, 4]}"#).unwrap();
        assert_eq!(config.storage_root, PathBuf::from(DEFAULT_STORAGE_ROOT));
        assert_eq!(config.labels.as_slice(), &[0, 1, 2, 4]);
        assert_eq!(config.compression, CompressionMethod::Zstd);

        let config = PipelineConfig::new("/data/studies").with_memory_budget(1 << 20);
        assert_eq!(config.study_dir("S1"), PathBuf::from("/data/studies/S1"));
        assert_eq!(config.memory_budget, Some(1 << 20));
    }
}
