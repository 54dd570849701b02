//! Payload compression for encoded channel volumes

use crate::error::{Result, VrdfError};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression methods for the channel payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Raw float32 payload
    None,
    /// Deflate/ZIP compression
    Deflate,
    /// Zstandard compression
    #[default]
    Zstd,
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionMethod::None => "none",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionMethod {
    type Err = VrdfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionMethod::None),
            "deflate" => Ok(CompressionMethod::Deflate),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(VrdfError::Configuration(format!(
                "Unknown compression method: {}",
                other
            ))),
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Block codec applied to the serialized float32 payload
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    fn method(&self) -> CompressionMethod;
}

#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let out = Vec::with_capacity(data.len() / 4);
        let mut encoder = DeflateEncoder::new(out, FlateCompression::new(level.value() as u32));
        encoder
            .write_all(data)
            .map_err(|e| VrdfError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| VrdfError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = Vec::with_capacity(expected_size.unwrap_or_default());
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| VrdfError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(data, level.value() as i32)
            .map_err(|e| VrdfError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| VrdfError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Deflate => Box::new(DeflateCompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mostly-zero payloads, like sparse label channels
    fn sparse_payload() -> Vec<u8> {
        let mut data = vec![0u8; 4096];
        for i in (0..data.len()).step_by(97) {
            data[i] = (i % 251) as u8;
        }
        data
    }

    #[test]
    fn test_methods_shrink_sparse_payload() {
        let data = sparse_payload();
        for method in [CompressionMethod::Deflate, CompressionMethod::Zstd] {
            let compressor = get_compressor(method);
            assert_eq!(compressor.method(), method);
            let compressed = compressor.compress(&data, CompressionLevel::default()).unwrap();
            assert!(compressed.len() < data.len(), "{method} did not shrink payload");
            let restored = compressor.decompress(&compressed, Some(data.len())).unwrap();
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_none_is_passthrough() {
        let data = sparse_payload();
        let compressed = NoneCompressor.compress(&data, CompressionLevel::new(9)).unwrap();
        assert_eq!(compressed, data);
    }

    #[test]
    fn test_corrupt_zstd_payload() {
        let err = ZstdCompressor.decompress(b"not zstd", None).unwrap_err();
        assert!(matches!(err, VrdfError::Decompression(_)));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("zstd".parse::<CompressionMethod>().unwrap(), CompressionMethod::Zstd);
        assert_eq!("none".parse::<CompressionMethod>().unwrap(), CompressionMethod::None);
        assert!("rle".parse::<CompressionMethod>().is_err());
        assert_eq!(CompressionLevel::new(42).value(), 9);
        assert_eq!(CompressionMethod::default().to_string(), "zstd");
    }
}
