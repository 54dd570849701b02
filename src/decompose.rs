//! Label-channel decomposition
//!
//! Splits a volume into one channel per label: channel `s` holds the source
//! intensity wherever the labelmap equals `labels[s]` and zero elsewhere.
//! Voxels whose label is not in the set are dropped from every channel, so
//! at most one channel is non-zero at any voxel.

use crate::error::{Result, VrdfError};
use crate::types::{ChannelVolume, LabelSet, Labelmap, Volume};
use ndarray::{Array4, Axis, Zip};
use tracing::debug;

/// Decompose `volume` into one channel per entry of `labels`.
///
/// A label with no matching voxels yields an all-zero channel.
pub fn decompose(volume: &Volume, labelmap: &Labelmap, labels: &LabelSet) -> Result<ChannelVolume> {
    if volume.dim() != labelmap.dim() {
        return Err(VrdfError::ShapeMismatch {
            volume: volume.data().shape().to_vec(),
            labelmap: labelmap.data().shape().to_vec(),
        });
    }

    let (h, w, z) = volume.dim();
    let mut out = Array4::<f32>::zeros((h, w, z, labels.len()));

    for (s, &label) in labels.iter().enumerate() {
        let mut matched = 0usize;
        Zip::from(out.index_axis_mut(Axis(3), s))
            .and(volume.data())
            .and(labelmap.data())
            .for_each(|dst, &value, &voxel_label| {
                if voxel_label == label {
                    *dst = value;
                    matched += 1;
                }
            });
        debug!(label, channel = s, voxels = matched, "Filled label channel");
    }

    ChannelVolume::new(out, labels.clone())
}
