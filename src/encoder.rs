//! Encoder boundary and the reference VRDF encoder
//!
//! A VRDF file is laid out as
//!
//! ```text
//! "VRDF" | header length (u32 LE) | JSON header | payload
//! ```
//!
//! where the payload is the channel volume as little-endian float32 in
//! column-major order (x fastest, channel slowest), compressed with the
//! method recorded in the header.

use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{Result, VrdfError};
use crate::metadata::{VrdfHeader, VrdfVersion};
use crate::types::{Affine, ChannelVolume};
use crate::utils::{calculate_checksum, f32_to_le_bytes, format_bytes, le_bytes_to_f32, verify_checksum};
use crate::VRDF_MAGIC;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ndarray::{Array4, ShapeBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix the reference encoder appends to the requested file stem
pub const LABELMAP_WEIGHTED_SUFFIX: &str = "_lw";

/// Everything an encoder needs to serialize one channel volume
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub channels: ChannelVolume,
    pub affine: Affine,
    pub spacing_mm: [f64; 3],
    pub transfer_function: Option<serde_json::Value>,
    /// Requested output path; the encoder may write elsewhere
    pub output_path: PathBuf,
}

/// Serializes channel volumes into the rendering format
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode the request and return the path actually written
    async fn encode(&self, request: EncodeRequest) -> Result<PathBuf>;
}

/// Insert the labelmap-weighted suffix before the extension:
/// `dir/p-t1n.vrdf` becomes `dir/p-t1n_lw.vrdf`
pub fn labelmap_weighted_path(requested: &Path) -> PathBuf {
    let stem = requested
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match requested.extension() {
        Some(ext) => format!("{}{}.{}", stem, LABELMAP_WEIGHTED_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, LABELMAP_WEIGHTED_SUFFIX),
    };
    requested.with_file_name(name)
}

/// Reference encoder writing labelmap-weighted VRDF files
#[derive(Debug, Clone, Default)]
pub struct VrdfEncoder {
    compression: CompressionMethod,
    level: CompressionLevel,
}

impl VrdfEncoder {
    pub fn new(compression: CompressionMethod, level: CompressionLevel) -> Self {
        Self { compression, level }
    }

    /// Build the complete file contents for a request
    pub fn encode_to_bytes(&self, request: &EncodeRequest) -> Result<Bytes> {
        let output = &request.output_path;
        if let Some(tf) = &request.transfer_function {
            if !(tf.is_object() || tf.is_array()) {
                return Err(VrdfError::encoder(
                    output,
                    "malformed transfer function: expected a JSON object or array",
                ));
            }
        }

        let channels = request.channels.data();
        // Reversed-axis view iterates x fastest
        let payload = f32_to_le_bytes(channels.t().iter());
        let compressor = get_compressor(self.compression);
        let compressed = compressor
            .compress(&payload, self.level)
            .map_err(|e| VrdfError::encoder(output, e))?;

        let mut header = VrdfHeader::new(
            request.channels.shape(),
            request.affine,
            request.spacing_mm,
            request.channels.labels().as_slice().to_vec(),
        )
        .with_compression(compressor.method())
        .with_transfer_function(request.transfer_function.clone());
        header.add_metadata("weighting", "labelmap");
        header.payload_checksum = calculate_checksum(&payload);
        header.uncompressed_size = payload.len();
        header.compressed_size = compressed.len();

        let header_json = serde_json::to_vec(&header).map_err(|e| VrdfError::encoder(output, e))?;
        let header_len = u32::try_from(header_json.len())
            .map_err(|_| VrdfError::encoder(output, "header too large"))?;

        let mut buf = BytesMut::with_capacity(VRDF_MAGIC.len() + 4 + header_json.len() + compressed.len());
        buf.put_slice(VRDF_MAGIC);
        buf.put_u32_le(header_len);
        buf.put_slice(&header_json);
        buf.put_slice(&compressed);

        debug!(
            shape = ?header.shape,
            compression = %self.compression,
            ratio = header.compression_ratio(),
            "Encoded channel payload"
        );
        Ok(buf.freeze())
    }
}

#[async_trait]
impl Encoder for VrdfEncoder {
    async fn encode(&self, request: EncodeRequest) -> Result<PathBuf> {
        let actual = labelmap_weighted_path(&request.output_path);
        let encoder = self.clone();
        let bytes = tokio::task::spawn_blocking(move || encoder.encode_to_bytes(&request)).await??;

        tokio::fs::write(&actual, &bytes)
            .await
            .map_err(|e| VrdfError::encoder(&actual, e))?;

        info!(path = %actual.display(), size = %format_bytes(bytes.len()), "Wrote VRDF file");
        Ok(actual)
    }
}

/// Split a VRDF buffer into its header and the compressed payload
fn parse_header(path: &Path, mut bytes: Bytes) -> Result<(VrdfHeader, Bytes)> {
    if bytes.len() < VRDF_MAGIC.len() + 4 || &bytes[..VRDF_MAGIC.len()] != VRDF_MAGIC {
        return Err(VrdfError::format(path, "missing VRDF magic"));
    }
    bytes.advance(VRDF_MAGIC.len());

    let header_len = bytes.get_u32_le() as usize;
    if bytes.len() < header_len {
        return Err(VrdfError::format(path, "truncated header"));
    }
    let header_json = bytes.split_to(header_len);
    let header: VrdfHeader =
        serde_json::from_slice(&header_json).map_err(|e| VrdfError::format(path, e))?;

    if !header.version.is_compatible(&VrdfVersion::CURRENT) {
        return Err(VrdfError::format(
            path,
            format!("unsupported version {}.{}", header.version.major, header.version.minor),
        ));
    }
    Ok((header, bytes))
}

/// Read only the header of a VRDF file
pub async fn read_header(path: &Path) -> Result<VrdfHeader> {
    let bytes = tokio::fs::read(path).await.map_err(|e| VrdfError::io(path, e))?;
    parse_header(path, Bytes::from(bytes)).map(|(header, _)| header)
}

/// Read a VRDF file back into its header and channel data
pub async fn read_vrdf(path: &Path) -> Result<(VrdfHeader, Array4<f32>)> {
    let bytes = tokio::fs::read(path).await.map_err(|e| VrdfError::io(path, e))?;
    let (header, compressed) = parse_header(path, Bytes::from(bytes))?;

    if compressed.len() != header.compressed_size {
        return Err(VrdfError::format(
            path,
            format!(
                "payload size {} does not match header ({})",
                compressed.len(),
                header.compressed_size
            ),
        ));
    }

    let payload = get_compressor(header.compression)
        .decompress(&compressed, Some(header.uncompressed_size))?;
    if !verify_checksum(&payload, header.payload_checksum) {
        return Err(VrdfError::format(path, "payload checksum mismatch"));
    }

    let values = le_bytes_to_f32(&payload)?;
    let [h, w, z, s] = header.shape;
    let data = Array4::from_shape_vec((h, w, z, s).f(), values)
        .map_err(|e| VrdfError::format(path, e))?;
    Ok((header, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelSet;
    use tempfile::TempDir;

    fn request(output_path: PathBuf, transfer_function: Option<serde_json::Value>) -> EncodeRequest {
        let data = Array4::from_shape_fn((3, 2, 2, 4), |(i, j, k, s)| {
            if s == (i + j + k) % 4 {
                (i * 4 + j * 2 + k) as f32 + 0.25
            } else {
                0.0
            }
        });
        EncodeRequest {
            channels: ChannelVolume::new(data, LabelSet::default()).unwrap(),
            affine: Affine::diagonal([1.0, 1.0, 2.0]),
            spacing_mm: [1.0, 1.0, 2.0],
            transfer_function,
            output_path,
        }
    }

    #[test]
    fn test_labelmap_weighted_path() {
        assert_eq!(
            labelmap_weighted_path(Path::new("storage/studies/S1/patientA-t1n.vrdf")),
            PathBuf::from("storage/studies/S1/patientA-t1n_lw.vrdf")
        );
        assert_eq!(labelmap_weighted_path(Path::new("out")), PathBuf::from("out_lw"));
    }

    #[tokio::test]
    async fn test_encode_writes_suffixed_file() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("patientA-t1n.vrdf");
        let tf = serde_json::json!([{ "label": 1, "rgba": [255, 0, 0, 200] }]);
        let req = request(requested.clone(), Some(tf.clone()));
        let expected = req.channels.data().clone();

        for method in [CompressionMethod::None, CompressionMethod::Deflate, CompressionMethod::Zstd] {
            let encoder = VrdfEncoder::new(method, CompressionLevel::default());
            let actual = encoder.encode(req.clone()).await.unwrap();

            assert_eq!(actual, dir.path().join("patientA-t1n_lw.vrdf"));
            assert!(!requested.exists());

            let (header, data) = read_vrdf(&actual).await.unwrap();
            assert_eq!(header.compression, method);
            assert_eq!(header.shape, [3, 2, 2, 4]);
            assert_eq!(header.labels, vec![0, 1, 2, 3]);
            assert_eq!(header.spacing_mm, [1.0, 1.0, 2.0]);
            assert_eq!(header.transfer_function, Some(tf.clone()));
            assert_eq!(data, expected);
        }
    }

    #[tokio::test]
    async fn test_malformed_transfer_function() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path().join("p-t2f.vrdf"), Some(serde_json::json!("ramp")));

        let err = VrdfEncoder::default().encode(req).await.unwrap_err();
        assert!(matches!(err, VrdfError::Encoder { .. }));
        assert!(!dir.path().join("p-t2f_lw.vrdf").exists());
    }

    #[tokio::test]
    async fn test_unwritable_output() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path().join("missing").join("p-t1c.vrdf"), None);

        let err = VrdfEncoder::default().encode(req).await.unwrap_err();
        assert!(matches!(err, VrdfError::Encoder { .. }));
    }

    #[tokio::test]
    async fn test_corrupted_payload_detected() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path().join("p-t1n.vrdf"), None);
        let encoder = VrdfEncoder::new(CompressionMethod::None, CompressionLevel::default());
        let actual = encoder.encode(req).await.unwrap();

        let mut bytes = std::fs::read(&actual).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&actual, &bytes).unwrap();

        assert!(read_header(&actual).await.is_ok());
        let err = read_vrdf(&actual).await.unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[tokio::test]
    async fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.vrdf");
        std::fs::write(&path, b"VDS\0 something else").unwrap();
        assert!(matches!(
            read_header(&path).await,
            Err(VrdfError::Format { .. })
        ));
    }
}
