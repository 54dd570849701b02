//! VRDF - label-channel conversion of medical volumes
//!
//! Converts a 3D NIfTI volume plus a co-registered integer segmentation into a
//! per-label channel volume, then serializes it together with its spatial
//! metadata and an optional transfer function for a rendering pipeline.
//!
//! # Features
//!
//! - Channel decomposition over an injected, ordered label set
//! - Filename grammar for BraTS-style modalities (`t1n`, `t1c`, `t2w`, `t2f`)
//! - Encoder boundary as a trait, with a reference VRDF encoder
//!   (None, Deflate or Zstd payloads)
//! - Per-run scratch ownership of the intermediate file, removed only after a
//!   successful encode
//!
//! # Example
//!
//! ```rust,ignore
//! use vrdf::{ConversionPipeline, ConversionRequest, PipelineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = ConversionPipeline::with_vrdf_encoder(PipelineConfig::default());
//! let request = ConversionRequest::new("study-001", "patientA-t1n.nii.gz", "patientA-seg.nii.gz")
//!     .with_config_path("./config.json");
//! let report = pipeline.run(&request).await?;
//! println!("wrote {}", report.artifact_name);
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod config;
pub mod decompose;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod types;
pub mod utils;

// Re-exports
pub use compression::{CompressionLevel, CompressionMethod, Compressor};
pub use config::{PipelineConfig, UserConfig};
pub use decompose::decompose;
pub use encoder::{EncodeRequest, Encoder, VrdfEncoder};
pub use error::{ErrorKind, Result, VrdfError};
pub use loader::{LoadedVolume, VolumeLoader};
pub use metadata::VrdfHeader;
pub use naming::{extract_modality, Modality, VolumeName};
pub use pipeline::{
    ConversionPipeline, ConversionReport, ConversionRequest, PipelineError, PipelineState, Stage,
};
pub use types::{Affine, ChannelVolume, LabelSet, Labelmap, Volume};

/// Version of this crate
pub const VRDF_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic number for VRDF files
pub const VRDF_MAGIC: &[u8; 4] = b"VRDF";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VRDF_VERSION.is_empty());
    }
}
