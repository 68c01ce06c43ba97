//! Digital reference objects for testing and demonstrations.

use nalgebra::Matrix4;
use ndarray::Array3;

use crate::volume::Volume3D;
use crate::{Result, VolumeError};

/// Generate an ellipsoid volume with half-widths `a`, `b`, `c` (mm) on a
/// grid with the given voxel spacing.
///
/// The grid is the bounding box of the ellipsoid padded by one sample in
/// every direction, centred on the ellipsoid, and the affine places the
/// ellipsoid centre at the patient-space origin.
///
/// With `levelset` set to `false` the voxels are a binary mask (1 inside,
/// 0 outside). With `levelset` set to `true` the voxels hold the signed
/// level function `(x/a)^2 + (y/b)^2 + (z/c)^2 - 1`, negative inside.
pub fn ellipsoid(a: f64, b: f64, c: f64, spacing: [f64; 3], levelset: bool) -> Result<Volume3D> {
    if a <= 0.0 || b <= 0.0 || c <= 0.0 {
        return Err(VolumeError::shape(format!(
            "ellipsoid half-widths must be positive, got ({a}, {b}, {c})"
        )));
    }
    if spacing.iter().any(|s| *s <= 0.0) {
        return Err(VolumeError::shape(format!(
            "voxel spacing must be positive, got {spacing:?}"
        )));
    }

    let half = [a, b, c];
    // Samples on each side of the centre, plus one sample of padding
    let n: Vec<usize> = (0..3)
        .map(|i| (half[i] / spacing[i]).ceil() as usize + 1)
        .collect();
    let shape = (2 * n[0] + 1, 2 * n[1] + 1, 2 * n[2] + 1);

    let data = Array3::from_shape_fn(shape, |(i, j, k)| {
        let x = (i as f64 - n[0] as f64) * spacing[0];
        let y = (j as f64 - n[1] as f64) * spacing[1];
        let z = (k as f64 - n[2] as f64) * spacing[2];
        let level = (x / a).powi(2) + (y / b).powi(2) + (z / c).powi(2) - 1.0;
        if levelset {
            level as f32
        } else if level <= 0.0 {
            1.0
        } else {
            0.0
        }
    });

    let mut affine = Matrix4::identity();
    for i in 0..3 {
        affine[(i, i)] = spacing[i];
        affine[(i, 3)] = -(n[i] as f64) * spacing[i];
    }
    Volume3D::new(data, affine)
}
