//! Core data types for label-channel conversion

use crate::error::{Result, VrdfError};
use ndarray::{Array3, Array4};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Label values used for BraTS-style segmentations
pub const DEFAULT_LABELS: [i32; 4] = [0, 1, 2, 3];

/// Voxel-to-world transform (row-major 4x4)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine([[f64; 4]; 4]);

impl Affine {
    pub fn new(rows: [[f64; 4]; 4]) -> Self {
        Self(rows)
    }

    pub fn identity() -> Self {
        Self::diagonal([1.0, 1.0, 1.0])
    }

    /// Pure scaling transform
    pub fn diagonal(zooms: [f64; 3]) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, zoom) in zooms.iter().enumerate() {
            rows[i][i] = *zoom;
        }
        rows[3][3] = 1.0;
        Self(rows)
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// Voxel spacing in mm: the Euclidean norm of each of the first three columns
    pub fn spacing(&self) -> [f64; 3] {
        let mut spacing = [0.0; 3];
        for (col, value) in spacing.iter_mut().enumerate() {
            *value = (0..3)
                .map(|row| self.0[row][col] * self.0[row][col])
                .sum::<f64>()
                .sqrt();
        }
        spacing
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

/// Ordered label values; the index of a label is its output channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct LabelSet(Vec<i32>);

impl LabelSet {
    pub fn new(labels: Vec<i32>) -> Result<Self> {
        if labels.is_empty() {
            return Err(VrdfError::EmptyLabelSet);
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(VrdfError::DuplicateLabel(*label));
            }
        }
        Ok(Self(labels))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &i32> {
        self.0.iter()
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self(DEFAULT_LABELS.to_vec())
    }
}

impl TryFrom<Vec<i32>> for LabelSet {
    type Error = VrdfError;

    fn try_from(labels: Vec<i32>) -> Result<Self> {
        Self::new(labels)
    }
}

impl From<LabelSet> for Vec<i32> {
    fn from(set: LabelSet) -> Self {
        set.0
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Dense 3D intensity field with its spatial transform
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    affine: Affine,
}

impl Volume {
    pub fn new(data: Array3<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Dimensions (H, W, Z)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.affine.spacing()
    }
}

/// Dense 3D integer label field, co-registered with a [`Volume`]
#[derive(Debug, Clone)]
pub struct Labelmap {
    data: Array3<i32>,
}

impl Labelmap {
    pub fn new(data: Array3<i32>) -> Self {
        Self { data }
    }

    /// Cast a floating label volume to integers, truncating toward zero.
    ///
    /// `source` is only used for error reporting.
    pub fn from_volume(volume: &Volume, source: &Path) -> Result<Self> {
        let mut data = Array3::<i32>::zeros(volume.dim());
        for ((index, value), label) in volume.data().indexed_iter().zip(data.iter_mut()) {
            *label = value.to_i32().ok_or_else(|| {
                VrdfError::format(
                    source,
                    format!("label value {} at voxel {:?} is not an integer", value, index),
                )
            })?;
        }
        Ok(Self { data })
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<i32> {
        &self.data
    }
}

/// Per-label channel decomposition of a volume, shape (H, W, Z, S)
#[derive(Debug, Clone)]
pub struct ChannelVolume {
    data: Array4<f32>,
    labels: LabelSet,
}

impl ChannelVolume {
    /// Wrap channel data, checking that the channel axis matches the label set
    pub fn new(data: Array4<f32>, labels: LabelSet) -> Result<Self> {
        let channels = data.dim().3;
        if channels != labels.len() {
            return Err(VrdfError::ShapeMismatch {
                volume: data.shape().to_vec(),
                labelmap: vec![labels.len()],
            });
        }
        Ok(Self { data, labels })
    }

    /// Bytes needed to hold a channel volume of the given shape
    pub fn estimated_bytes(dim: (usize, usize, usize), channels: usize) -> usize {
        dim.0
            .saturating_mul(dim.1)
            .saturating_mul(dim.2)
            .saturating_mul(channels)
            .saturating_mul(std::mem::size_of::<f32>())
    }

    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn shape(&self) -> [usize; 4] {
        let (h, w, z, s) = self.data.dim();
        [h, w, z, s]
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_from_column_norms() {
        let affine = Affine::new([
            [0.0, 2.0, 0.0, 10.0],
            [3.0, 0.0, 0.0, 20.0],
            [4.0, 0.0, 1.5, 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_eq!(affine.spacing(), [5.0, 2.0, 1.5]);
        assert_eq!(Affine::identity().spacing(), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_label_set_validation() {
        assert_eq!(LabelSet::default().as_slice(), &[0, 1, 2, 3]);
        assert!(matches!(
            LabelSet::new(vec![0, 1, 1]),
            Err(VrdfError::DuplicateLabel(1))
        ));
        assert!(matches!(LabelSet::new(vec![]), Err(VrdfError::EmptyLabelSet)));

        let set = LabelSet::new(vec![4, 2, 7]).unwrap();
        assert_eq!(set.as_slice(), &[4, 2, 7]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_label_set_serde() {
        let set: LabelSet = serde_json::from_str("[0, 2, 5]").unwrap();
        assert_eq!(set.as_slice(), &[0, 2, 5]);
        assert!(serde_json::from_str::<LabelSet>("[1, 1]").is_err());
        assert_eq!(serde_json::to_string(&set).unwrap(), "[0,2,5]");
    }

    #[test]
    fn test_labelmap_from_volume_truncates() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![0.0, 1.9, -2.5]).unwrap();
        let volume = Volume::new(data, Affine::identity());
        let labelmap = Labelmap::from_volume(&volume, Path::new("seg.nii.gz")).unwrap();
        assert_eq!(labelmap.data().as_slice().unwrap(), &[0, 1, -2]);
    }

    #[test]
    fn test_labelmap_rejects_nan() {
        let data = Array3::from_shape_vec((1, 1, 2), vec![0.0, f32::NAN]).unwrap();
        let volume = Volume::new(data, Affine::identity());
        let err = Labelmap::from_volume(&volume, Path::new("seg.nii.gz")).unwrap_err();
        assert!(matches!(err, VrdfError::Format { .. }));
    }

    #[test]
    fn test_channel_volume_budget_estimate() {
        assert_eq!(ChannelVolume::estimated_bytes((4, 4, 4), 4), 4 * 4 * 4 * 4 * 4);
        assert_eq!(
            ChannelVolume::estimated_bytes((usize::MAX, 2, 1), 4),
            usize::MAX
        );
    }

    #[test]
    fn test_channel_volume_requires_matching_labels() {
        let data = Array4::<f32>::zeros((2, 2, 2, 3));
        assert!(ChannelVolume::new(data.clone(), LabelSet::default()).is_err());
        let labels = LabelSet::new(vec![0, 1, 2]).unwrap();
        let channels = ChannelVolume::new(data, labels).unwrap();
        assert_eq!(channels.shape(), [2, 2, 2, 3]);
    }
}
