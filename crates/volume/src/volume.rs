use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use ndarray::Array3;

use crate::{Result, VolumeError};

/// A 3D image volume with patient-space geometry.
///
/// Voxel data is stored in (x, y, z) index order. The affine maps a voxel
/// index `(i, j, k)` to a patient-space position in millimetres:
/// `p = A * (i, j, k, 1)`. Its first three columns are the step vectors
/// along each array axis, its fourth column is the position of voxel
/// (0, 0, 0).
#[derive(Debug, Clone)]
pub struct Volume3D {
    data: Array3<f32>,
    affine: Matrix4<f64>,
}

impl Volume3D {
    /// Create a volume from voxel data and an affine.
    ///
    /// Fails if the affine is not invertible, since every operation that
    /// maps between index and patient space needs the inverse.
    pub fn new(data: Array3<f32>, affine: Matrix4<f64>) -> Result<Self> {
        if affine.try_inverse().is_none() {
            return Err(VolumeError::SingularAffine(format!("{:?}", affine)));
        }
        Ok(Self { data, affine })
    }

    /// Create a zero-filled volume with the given shape and affine.
    pub fn zeros(shape: (usize, usize, usize), affine: Matrix4<f64>) -> Result<Self> {
        Self::new(Array3::zeros(shape), affine)
    }

    /// Create a zero-filled volume with axis-aligned geometry from a voxel
    /// spacing in millimetres, with voxel (0, 0, 0) at the patient origin.
    pub fn zeros_with_spacing(shape: (usize, usize, usize), spacing: [f64; 3]) -> Result<Self> {
        let mut affine = Matrix4::identity();
        for (i, s) in spacing.iter().enumerate() {
            affine[(i, i)] = *s;
        }
        Self::zeros(shape, affine)
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel spacing in millimetres: the lengths of the affine columns.
    pub fn spacing(&self) -> [f64; 3] {
        let mut spacing = [0.0; 3];
        for (i, s) in spacing.iter_mut().enumerate() {
            *s = self.affine.fixed_view::<3, 1>(0, i).norm();
        }
        spacing
    }

    /// Patient-space position of voxel (0, 0, 0).
    pub fn origin(&self) -> Point3<f64> {
        Point3::new(self.affine[(0, 3)], self.affine[(1, 3)], self.affine[(2, 3)])
    }

    /// Direction cosines: the affine columns normalized to unit length.
    pub fn direction(&self) -> Matrix3<f64> {
        let spacing = self.spacing();
        let mut dir = Matrix3::identity();
        for i in 0..3 {
            if spacing[i] > 0.0 {
                let col = self.affine.fixed_view::<3, 1>(0, i) / spacing[i];
                dir.set_column(i, &col);
            }
        }
        dir
    }

    /// Map a continuous voxel index to a patient-space position.
    pub fn index_to_world(&self, index: Point3<f64>) -> Point3<f64> {
        self.affine.transform_point(&index)
    }

    /// Map a patient-space position to a continuous voxel index.
    pub fn world_to_index(&self, point: Point3<f64>) -> Point3<f64> {
        // new() guarantees invertibility
        let inv = self
            .affine
            .try_inverse()
            .unwrap_or_else(Matrix4::identity);
        inv.transform_point(&point)
    }

    /// Patient-space position of the volume centre.
    pub fn center(&self) -> Point3<f64> {
        let (nx, ny, nz) = self.shape();
        self.index_to_world(Point3::new(
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        ))
    }

    /// The eight corner voxel indices of the volume.
    pub(crate) fn corner_indices(&self) -> [Point3<f64>; 8] {
        let (nx, ny, nz) = self.shape();
        let (mx, my, mz) = (nx as f64 - 1.0, ny as f64 - 1.0, nz as f64 - 1.0);
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(mx, 0.0, 0.0),
            Point3::new(0.0, my, 0.0),
            Point3::new(0.0, 0.0, mz),
            Point3::new(mx, my, 0.0),
            Point3::new(mx, 0.0, mz),
            Point3::new(0.0, my, mz),
            Point3::new(mx, my, mz),
        ]
    }

    /// Axis-aligned patient-space bounding box of the voxel corners,
    /// returned as (min, max) positions.
    pub fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for corner in self.corner_indices() {
            let p = self.index_to_world(corner);
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        (Point3::from(min), Point3::from(max))
    }
}
