//! Intensity projections along a spatial axis.

use ndarray::{Array3, Axis};

use crate::volume::Volume3D;
use crate::{Result, VolumeError};

/// Maximum intensity projection along one spatial axis.
///
/// Keeps, for every ray along `axis`, the maximum voxel value. The result
/// stays three-dimensional with extent 1 along the collapsed axis and keeps
/// the input affine, so downstream geometry (spacing, orientation) is
/// preserved.
pub fn maximum_intensity_projection(vol: &Volume3D, axis: usize) -> Result<Volume3D> {
    if axis > 2 {
        return Err(VolumeError::InvalidAxis(axis));
    }
    let data: Array3<f32> = vol
        .data()
        .fold_axis(Axis(axis), f32::NEG_INFINITY, |acc, v| acc.max(*v))
        .insert_axis(Axis(axis));

    Volume3D::new(data, *vol.affine())
}
