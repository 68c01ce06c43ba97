//! Volume rotation by resampling.

use nalgebra::{Matrix4, Point3, Rotation3, Vector3};
use ndarray::Array3;

use crate::interpolate::{sample, Boundary, Interpolation};
use crate::volume::Volume3D;
use crate::Result;

/// Rotate a volume in patient space and resample it onto a regular grid.
///
/// `rotation` is a rotation vector (axis times angle, in radians). The
/// rotation is applied about `center` in patient-space millimetres, or
/// about the volume centre when `center` is `None`.
///
/// With `reshape` set to `false` the output keeps the input grid and
/// affine, and content that rotates out of the field of view is lost to
/// the boundary mode. With `reshape` set to `true` the grid is enlarged
/// (and its origin shifted) so that the rotated input fits entirely.
///
/// Every output voxel is mapped back through the inverse rotation and
/// sampled from the input, so a zero rotation without reshape returns the
/// input data unchanged.
pub fn rotate(
    vol: &Volume3D,
    rotation: [f64; 3],
    center: Option<Point3<f64>>,
    reshape: bool,
    interpolation: Interpolation,
    boundary: Boundary,
) -> Result<Volume3D> {
    let rot = Rotation3::from_scaled_axis(Vector3::new(rotation[0], rotation[1], rotation[2]));
    let center = center.unwrap_or_else(|| vol.center());
    let affine = *vol.affine();
    let inv_affine = affine
        .try_inverse()
        .unwrap_or_else(Matrix4::identity);

    let (out_shape, out_affine) = if reshape {
        rotated_extent(vol, &rot, &center)
    } else {
        (vol.shape(), affine)
    };

    tracing::debug!(
        angle = rot.angle(),
        reshape,
        out_shape = ?out_shape,
        "rotating volume"
    );

    let inv_rot = rot.inverse();
    let data = Array3::from_shape_fn(out_shape, |(i, j, k)| {
        let world = out_affine.transform_point(&Point3::new(i as f64, j as f64, k as f64));
        let source_world = inv_rot * (world - center) + center.coords;
        let source = inv_affine.transform_point(&Point3::from(source_world));
        sample(
            vol.data(),
            [source.x, source.y, source.z],
            interpolation,
            boundary,
        )
    });

    Volume3D::new(data, out_affine)
}

/// Grid that covers the rotated input: transform the corner voxels, express
/// them in the input index frame, and take the bounding box.
fn rotated_extent(
    vol: &Volume3D,
    rot: &Rotation3<f64>,
    center: &Point3<f64>,
) -> ((usize, usize, usize), Matrix4<f64>) {
    let affine = *vol.affine();
    let inv_affine = affine
        .try_inverse()
        .unwrap_or_else(Matrix4::identity);

    let mut min = Vector3::repeat(f64::INFINITY);
    let mut max = Vector3::repeat(f64::NEG_INFINITY);
    for corner in vol.corner_indices() {
        let world = affine.transform_point(&corner);
        let moved = rot * (world - center) + center.coords;
        let index = inv_affine.transform_point(&Point3::from(moved));
        for i in 0..3 {
            min[i] = min[i].min(index[i]);
            max[i] = max[i].max(index[i]);
        }
    }

    let shape = (
        (max[0] - min[0]).ceil() as usize + 1,
        (max[1] - min[1]).ceil() as usize + 1,
        (max[2] - min[2]).ceil() as usize + 1,
    );

    // Same step vectors, origin shifted to the bounding box minimum
    let new_origin = affine.transform_point(&Point3::from(min));
    let mut out_affine = affine;
    out_affine[(0, 3)] = new_origin.x;
    out_affine[(1, 3)] = new_origin.y;
    out_affine[(2, 3)] = new_origin.z;
    (shape, out_affine)
}
