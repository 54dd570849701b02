//! Conversion pipeline - main API for turning a study volume into a VRDF file
//!
//! A run moves through `Validated -> Decomposed -> Encoded -> CleanedUp ->
//! Completed` and can fail at any stage. The intermediate channel volume is
//! written into a scratch directory owned by the run, so concurrent runs on
//! the same study and input never share files. It is deleted only once the
//! encoder has succeeded; after an encoder failure it stays on disk for
//! inspection.

use crate::config::{PipelineConfig, UserConfig};
use crate::decompose::decompose;
use crate::encoder::{EncodeRequest, Encoder, VrdfEncoder};
use crate::error::{ErrorKind, Result, VrdfError};
use crate::loader::{write_channels, LoadedVolume, VolumeLoader};
use crate::naming::{Modality, VolumeName};
use crate::types::{ChannelVolume, LabelSet, Labelmap};
use crate::utils::format_bytes;
use futures::future::try_join;
use nifti::NiftiHeader;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Prefix of the per-run scratch directory inside a study directory
pub const SCRATCH_PREFIX: &str = ".vrdf-work-";

/// Stage a failure originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Decompose,
    Encode,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Decompose => "decompose",
            Stage::Encode => "encode",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Validated,
    Decomposed,
    Encoded,
    CleanedUp,
    Completed,
    Failed(Stage),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Validated => f.write_str("validated"),
            PipelineState::Decomposed => f.write_str("decomposed"),
            PipelineState::Encoded => f.write_str("encoded"),
            PipelineState::CleanedUp => f.write_str("cleaned-up"),
            PipelineState::Completed => f.write_str("completed"),
            PipelineState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// A fatal pipeline error tagged with its stage
#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: VrdfError,
    /// Intermediate file left on disk by a failed encode
    pub intermediate: Option<PathBuf>,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// One conversion request
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub study: String,
    pub input_filename: String,
    pub segmentation_filename: String,
    /// Optional user configuration file; a missing file is not an error
    pub config_path: Option<PathBuf>,
}

impl ConversionRequest {
    pub fn new(
        study: impl Into<String>,
        input_filename: impl Into<String>,
        segmentation_filename: impl Into<String>,
    ) -> Self {
        Self {
            study: study.into(),
            input_filename: input_filename.into(),
            segmentation_filename: segmentation_filename.into(),
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct ConversionReport {
    /// File name of the artifact the encoder actually wrote
    pub artifact_name: String,
    pub artifact_path: PathBuf,
    pub modality: Modality,
    /// Channel volume shape `[H, W, Z, S]`
    pub shape: [usize; 4],
    pub labels: LabelSet,
}

struct Validated {
    study_dir: PathBuf,
    name: VolumeName,
    input_path: PathBuf,
    segmentation_path: PathBuf,
    user_config: UserConfig,
}

/// The intermediate file and the scratch directory this run owns
struct Intermediate {
    scratch_dir: PathBuf,
    path: PathBuf,
    shape: [usize; 4],
}

/// Orchestrates validation, decomposition, encoding and cleanup
pub struct ConversionPipeline {
    config: PipelineConfig,
    encoder: Arc<dyn Encoder>,
}

impl ConversionPipeline {
    pub fn new(config: PipelineConfig, encoder: Arc<dyn Encoder>) -> Self {
        Self { config, encoder }
    }

    /// Pipeline using the reference VRDF encoder
    pub fn with_vrdf_encoder(config: PipelineConfig) -> Self {
        let encoder = VrdfEncoder::new(config.compression, config.compression_level);
        Self::new(config, Arc::new(encoder))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one conversion and report the final artifact
    pub async fn run(
        &self,
        request: &ConversionRequest,
    ) -> std::result::Result<ConversionReport, PipelineError> {
        let span = info_span!(
            "convert",
            study = %request.study,
            input = %request.input_filename,
            seg = %request.segmentation_filename,
        );
        self.run_stages(request).instrument(span).await
    }

    async fn run_stages(
        &self,
        request: &ConversionRequest,
    ) -> std::result::Result<ConversionReport, PipelineError> {
        let validated = self
            .validate(request)
            .await
            .map_err(|e| fail(Stage::Validate, e, None))?;
        enter(PipelineState::Validated);

        let intermediate = self
            .decompose(&validated)
            .await
            .map_err(|e| fail(Stage::Decompose, e, None))?;
        enter(PipelineState::Decomposed);

        let artifact_path = match self.encode(&validated, &intermediate).await {
            Ok(path) => path,
            Err(e) => {
                warn!(
                    path = %intermediate.path.display(),
                    "Keeping intermediate file after failed encode"
                );
                return Err(fail(Stage::Encode, e, Some(intermediate.path)));
            }
        };
        enter(PipelineState::Encoded);

        cleanup(&intermediate).await;
        enter(PipelineState::CleanedUp);

        let artifact_name = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact_path.display().to_string());
        info!(artifact = %artifact_name, "Pipeline completed");
        enter(PipelineState::Completed);

        Ok(ConversionReport {
            artifact_name,
            artifact_path,
            modality: validated.name.modality(),
            shape: intermediate.shape,
            labels: self.config.labels.clone(),
        })
    }

    async fn validate(&self, request: &ConversionRequest) -> Result<Validated> {
        ensure_plain_name(&request.study)?;
        ensure_plain_name(&request.input_filename)?;
        ensure_plain_name(&request.segmentation_filename)?;

        let name = VolumeName::parse(&request.input_filename)?;
        debug!(modality = %name.modality(), "Extracted modality");

        let study_dir = self.config.study_dir(&request.study);
        if !is_dir(&study_dir).await {
            return Err(VrdfError::NotFound {
                what: "Study directory",
                path: study_dir,
            });
        }

        let input_path = study_dir.join(&request.input_filename);
        if !is_file(&input_path).await {
            return Err(VrdfError::NotFound {
                what: "Input file",
                path: input_path,
            });
        }

        let segmentation_path = study_dir.join(&request.segmentation_filename);
        if !is_file(&segmentation_path).await {
            return Err(VrdfError::NotFound {
                what: "Segmentation file",
                path: segmentation_path,
            });
        }

        let user_config = match &request.config_path {
            Some(path) => UserConfig::load(path).await?,
            None => UserConfig::default(),
        };

        Ok(Validated {
            study_dir,
            name,
            input_path,
            segmentation_path,
            user_config,
        })
    }

    async fn decompose(&self, validated: &Validated) -> Result<Intermediate> {
        let (volume, segmentation) = try_join(
            load_blocking(validated.input_path.clone()),
            load_blocking(validated.segmentation_path.clone()),
        )
        .await?;

        let labels = self.config.labels.clone();
        let required = ChannelVolume::estimated_bytes(volume.volume.dim(), labels.len());
        info!(
            shape = ?volume.volume.dim(),
            spacing_mm = ?volume.volume.spacing(),
            labels = %labels,
            channel_volume = %format_bytes(required),
            "Decomposing volume"
        );
        if let Some(budget) = self.config.memory_budget {
            if required > budget {
                return Err(VrdfError::BudgetExceeded { required, budget });
            }
        }

        let scratch_dir = validated
            .study_dir
            .join(format!("{}{}", SCRATCH_PREFIX, Uuid::new_v4()));
        let path = scratch_dir.join(validated.name.segmented_name());
        let segmentation_path = validated.segmentation_path.clone();

        let intermediate = Intermediate {
            scratch_dir: scratch_dir.clone(),
            path: path.clone(),
            shape: [0; 4],
        };

        let task = tokio::task::spawn_blocking(move || -> Result<[usize; 4]> {
            let labelmap = Labelmap::from_volume(&segmentation.volume, &segmentation_path)?;
            let channels = decompose(&volume.volume, &labelmap, &labels)?;
            materialize_intermediate(&scratch_dir, &path, &channels, &segmentation.header)?;
            Ok(channels.shape())
        });

        let shape = match task.await {
            Ok(result) => result?,
            Err(e) => {
                discard_scratch(&intermediate.scratch_dir).await;
                return Err(e.into());
            }
        };

        info!(path = %intermediate.path.display(), shape = ?shape, "Saved segmented file");
        Ok(Intermediate { shape, ..intermediate })
    }

    async fn encode(&self, validated: &Validated, intermediate: &Intermediate) -> Result<PathBuf> {
        let path = intermediate.path.clone();
        let (data, affine) =
            tokio::task::spawn_blocking(move || VolumeLoader::load_channels(&path)).await??;
        let channels = ChannelVolume::new(data, self.config.labels.clone())?;
        let spacing_mm = affine.spacing();
        let output_path = validated
            .study_dir
            .join(validated.name.requested_output_name());

        info!(
            output = %output_path.display(),
            spacing_mm = ?spacing_mm,
            transfer_function = validated.user_config.transfer_function.is_some(),
            "Starting conversion"
        );

        self.encoder
            .encode(EncodeRequest {
                channels,
                affine,
                spacing_mm,
                transfer_function: validated.user_config.transfer_function.clone(),
                output_path,
            })
            .await
    }
}

/// Best-effort removal of the intermediate file and its scratch directory
async fn cleanup(intermediate: &Intermediate) {
    match fs::try_exists(&intermediate.path).await {
        Ok(true) => match fs::remove_file(&intermediate.path).await {
            Ok(()) => info!(path = %intermediate.path.display(), "Deleted intermediate segmented file"),
            Err(e) => warn!(
                path = %intermediate.path.display(),
                error = %e,
                "Failed to delete intermediate file"
            ),
        },
        Ok(false) => debug!(path = %intermediate.path.display(), "Intermediate file already gone"),
        Err(e) => warn!(
            path = %intermediate.path.display(),
            error = %e,
            "Could not check intermediate file"
        ),
    }

    if let Err(e) = fs::remove_dir(&intermediate.scratch_dir).await {
        warn!(
            path = %intermediate.scratch_dir.display(),
            error = %e,
            "Failed to remove scratch directory"
        );
    }
}

/// Create the scratch directory and write the channel volume into it. On a
/// failed write the directory is removed again.
fn materialize_intermediate(
    scratch_dir: &Path,
    path: &Path,
    channels: &ChannelVolume,
    reference: &NiftiHeader,
) -> Result<()> {
    std::fs::create_dir(scratch_dir).map_err(|e| VrdfError::io(scratch_dir, e))?;
    if let Err(e) = write_channels(path, channels, reference) {
        if let Err(remove_err) = std::fs::remove_dir_all(scratch_dir) {
            warn!(path = %scratch_dir.display(), error = %remove_err, "Failed to remove scratch directory");
        }
        return Err(e);
    }
    Ok(())
}

/// Remove a scratch directory left by an aborted decompose task, if any
async fn discard_scratch(scratch_dir: &Path) {
    match fs::remove_dir_all(scratch_dir).await {
        Ok(()) => info!(path = %scratch_dir.display(), "Removed scratch directory of aborted run"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %scratch_dir.display(), error = %e, "Failed to remove scratch directory"),
    }
}

async fn load_blocking(path: PathBuf) -> Result<LoadedVolume> {
    tokio::task::spawn_blocking(move || VolumeLoader::load(&path)).await?
}

fn enter(state: PipelineState) {
    debug!(state = %state, "Pipeline state");
}

fn fail(stage: Stage, source: VrdfError, intermediate: Option<PathBuf>) -> PipelineError {
    error!(state = %PipelineState::Failed(stage), error = %source, "Segmentation and conversion failed");
    PipelineError {
        stage,
        source,
        intermediate,
    }
}

/// Names resolved inside the storage root must be a single path component
fn ensure_plain_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(VrdfError::InvalidFileName {
            name: name.to_string(),
        }),
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert!(ensure_plain_name("patientA-t1n.nii.gz").is_ok());
        assert!(ensure_plain_name("BraTS-GLI-00000-000").is_ok());
        for name in ["", "..", ".", "../x-t1n.nii.gz", "a/b-t1n.nii.gz", "/etc/passwd", "a/"] {
            assert!(
                matches!(ensure_plain_name(name), Err(VrdfError::InvalidFileName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    fn channels() -> ChannelVolume {
        let data = ndarray::Array4::<f32>::ones((2, 2, 2, 4));
        ChannelVolume::new(data, LabelSet::default()).unwrap()
    }

    #[test]
    fn test_failed_intermediate_write_removes_scratch_dir() {
        let study = tempfile::TempDir::new().unwrap();
        let scratch = study.path().join(format!("{}{}", SCRATCH_PREFIX, Uuid::new_v4()));
        // Parent of the target does not exist, so the NIfTI writer cannot create it
        let path = scratch.join("missing").join("p-segmented-t1n.nii.gz");

        let err = materialize_intermediate(&scratch, &path, &channels(), &NiftiHeader::default())
            .unwrap_err();
        assert!(matches!(err, VrdfError::Io { .. }));
        assert!(!scratch.exists());
    }

    #[test]
    fn test_intermediate_written_inside_scratch_dir() {
        let study = tempfile::TempDir::new().unwrap();
        let scratch = study.path().join(format!("{}{}", SCRATCH_PREFIX, Uuid::new_v4()));
        let path = scratch.join("p-segmented-t1n.nii.gz");

        materialize_intermediate(&scratch, &path, &channels(), &NiftiHeader::default()).unwrap();
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn test_discard_scratch() {
        let study = tempfile::TempDir::new().unwrap();
        let scratch = study.path().join(format!("{}{}", SCRATCH_PREFIX, Uuid::new_v4()));
        std::fs::create_dir(&scratch).unwrap();
        std::fs::write(scratch.join("partial.nii.gz"), b"half").unwrap();

        discard_scratch(&scratch).await;
        assert!(!scratch.exists());

        // Nothing to remove is not an error
        discard_scratch(&scratch).await;
    }

    #[test]
    fn test_stage_and_state_display() {
        assert_eq!(Stage::Decompose.to_string(), "decompose");
        assert_eq!(PipelineState::Failed(Stage::Encode).to_string(), "failed(encode)");

        let err = PipelineError {
            stage: Stage::Validate,
            source: VrdfError::ModalityUnresolved {
                filename: "x-t3z.nii.gz".to_string(),
            },
            intermediate: None,
        };
        assert_eq!(
            err.to_string(),
            "validate stage failed: Could not extract modality from filename: x-t3z.nii.gz"
        );
        assert_eq!(err.kind().status_code(), 400);
    }
}
