//! NIfTI volume loading and writing

use crate::error::{Result, VrdfError};
use crate::types::{Affine, ChannelVolume, Volume};
use ndarray::{ArrayD, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;
use tracing::debug;

/// A volume together with the header it was read from
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub volume: Volume,
    pub header: NiftiHeader,
}

/// Loads scalar fields from NIfTI-1 files (`.nii` or `.nii.gz`)
pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a 3D float volume.
    ///
    /// Fields with more than three dimensions keep only the first 3D slab
    /// along each trailing axis.
    pub fn load(path: &Path) -> Result<LoadedVolume> {
        let (data, header) = Self::read(path)?;
        if data.ndim() < 3 {
            return Err(VrdfError::format(
                path,
                format!("expected at least 3 dimensions, got {}", data.ndim()),
            ));
        }

        let mut data = data;
        while data.ndim() > 3 {
            let trailing = data.ndim() - 1;
            debug!(
                path = %path.display(),
                discarded = data.len_of(Axis(trailing)) - 1,
                "Keeping first slab of trailing axis"
            );
            data = data.index_axis_move(Axis(trailing), 0);
        }

        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|e| VrdfError::format(path, e))?;
        let affine = affine_from_header(&header);

        Ok(LoadedVolume {
            volume: Volume::new(data, affine),
            header,
        })
    }

    /// Load a 4D channel volume without dropping any slab
    pub fn load_channels(path: &Path) -> Result<(ndarray::Array4<f32>, Affine)> {
        let (data, header) = Self::read(path)?;
        let shape = data.shape().to_vec();
        let data = data.into_dimensionality::<Ix4>().map_err(|_| {
            VrdfError::format(path, format!("expected a 4D channel volume, got shape {:?}", shape))
        })?;
        Ok((data, affine_from_header(&header)))
    }

    fn read(path: &Path) -> Result<(ArrayD<f32>, NiftiHeader)> {
        if !path.exists() {
            return Err(VrdfError::NotFound {
                what: "Volume file",
                path: path.to_path_buf(),
            });
        }

        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| VrdfError::format(path, e))?;
        let header = object.header().clone();
        let data = object
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| VrdfError::format(path, e))?;

        debug!(path = %path.display(), shape = ?data.shape(), "Loaded volume");
        Ok((data, header))
    }
}

/// Write a channel volume, keeping the spatial metadata of `reference` but
/// storing float32 voxels without scaling. Gzip is used for `.gz` paths.
pub fn write_channels(path: &Path, channels: &ChannelVolume, reference: &NiftiHeader) -> Result<()> {
    let mut header = reference.clone();
    header.datatype = nifti::NiftiType::Float32 as i16;
    header.bitpix = 32;
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(channels.data())
        .map_err(|e| VrdfError::io(path, std::io::Error::other(e.to_string())))?;

    debug!(path = %path.display(), shape = ?channels.shape(), "Wrote channel volume");
    Ok(())
}

/// Resolve the voxel-to-world transform: sform, then qform, then the base
/// affine derived from `dim` and `pixdim`
pub fn affine_from_header(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let row = |r: &[f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
        return Affine::new([
            row(&header.srow_x),
            row(&header.srow_y),
            row(&header.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let zooms = [
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    ];

    if header.qform_code > 0 {
        return qform_affine(header, zooms);
    }

    base_affine(header, zooms)
}

/// Fallback for headers without an orientation: x flipped, origin at the
/// centre of the voxel grid
fn base_affine(header: &NiftiHeader, zooms: [f64; 3]) -> Affine {
    let ndim = usize::from(header.dim[0]);
    let mut rows = [[0.0; 4]; 4];
    for axis in 0..3 {
        let extent = if axis < ndim {
            f64::from(header.dim[axis + 1].max(1))
        } else {
            1.0
        };
        let zoom = if axis == 0 { -zooms[axis] } else { zooms[axis] };
        rows[axis][axis] = zoom;
        rows[axis][3] = -zoom * (extent - 1.0) / 2.0;
    }
    rows[3][3] = 1.0;
    Affine::new(rows)
}

fn qform_affine(header: &NiftiHeader, zooms: [f64; 3]) -> Affine {
    let (b, c, d) = (
        header.quatern_b as f64,
        header.quatern_c as f64,
        header.quatern_d as f64,
    );
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

    let rotation = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    let scale = [zooms[0], zooms[1], zooms[2] * qfac];
    let offset = [
        header.quatern_x as f64,
        header.quatern_y as f64,
        header.quatern_z as f64,
    ];

    let mut rows = [[0.0; 4]; 4];
    for r in 0..3 {
        for col in 0..3 {
            rows[r][col] = rotation[r][col] * scale[col];
        }
        rows[r][3] = offset[r];
    }
    rows[3][3] = 1.0;
    Affine::new(rows)
}
