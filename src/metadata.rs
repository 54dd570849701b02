//! VRDF header metadata

use crate::compression::CompressionMethod;
use crate::types::Affine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// VRDF file format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrdfVersion {
    pub major: u16,
    pub minor: u16,
}

impl VrdfVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for VrdfVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Header written in front of the channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrdfHeader {
    pub version: VrdfVersion,

    /// Channel volume shape `[H, W, Z, S]`
    pub shape: [usize; 4],

    pub affine: Affine,

    pub spacing_mm: [f64; 3],

    /// Label value of each channel, in channel order
    pub labels: Vec<i32>,

    pub compression: CompressionMethod,

    /// CRC32 of the uncompressed payload
    pub payload_checksum: u32,

    pub compressed_size: usize,

    pub uncompressed_size: usize,

    pub created_at: DateTime<Utc>,

    /// Opaque transfer function, stored verbatim
    pub transfer_function: Option<serde_json::Value>,

    pub custom_metadata: HashMap<String, String>,
}

impl VrdfHeader {
    pub fn new(shape: [usize; 4], affine: Affine, spacing_mm: [f64; 3], labels: Vec<i32>) -> Self {
        Self {
            version: VrdfVersion::default(),
            shape,
            affine,
            spacing_mm,
            labels,
            compression: CompressionMethod::default(),
            payload_checksum: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            created_at: Utc::now(),
            transfer_function: None,
            custom_metadata: HashMap::new(),
        }
    }

    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn with_transfer_function(mut self, transfer_function: Option<serde_json::Value>) -> Self {
        self.transfer_function = transfer_function;
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_metadata.insert(key.into(), value.into());
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_size == 0 {
            0.0
        } else {
            self.uncompressed_size as f64 / self.compressed_size as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = VrdfVersion::new(1, 0);
        let v1_3 = VrdfVersion::new(1, 3);
        let v2_0 = VrdfVersion::new(2, 0);

        assert!(v1_0.is_compatible(&v1_3));
        assert!(!v1_0.is_compatible(&v2_0));
    }

    #[test]
    fn test_header_json_round_trip() {
        let tf = serde_json::json!({ "points": [[0.0, 0.0], [1.0, 0.8]] });
        let mut header = VrdfHeader::new([4, 4, 4, 4], Affine::identity(), [1.0, 1.0, 1.0], vec![0, 1, 2, 3])
            .with_compression(CompressionMethod::Deflate)
            .with_transfer_function(Some(tf.clone()));
        header.add_metadata("modality", "t1n");
        header.uncompressed_size = 1024;
        header.compressed_size = 256;

        let json = serde_json::to_vec(&header).unwrap();
        let parsed: VrdfHeader = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.transfer_function, Some(tf));
        assert_eq!(parsed.custom_metadata.get("modality").map(String::as_str), Some("t1n"));
        assert_eq!(parsed.compression_ratio(), 4.0);
    }
}
