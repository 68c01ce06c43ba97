//! Geometry-aware 3D volumes for DICOM series data.
//!
//! A [`Volume3D`] couples an `ndarray` block of voxel values (x, y, z index
//! order) with a 4x4 affine that maps voxel indices to patient-space
//! coordinates in millimetres. On top of that sit the array operations used
//! when working with series as volumes: rotation with resampling
//! ([`rotate`]), maximum intensity projection ([`maximum_intensity_projection`]),
//! mosaic rendering ([`Volume3D::mosaic`]) and digital reference objects
//! ([`dro`]).

pub mod dro;
mod interpolate;
mod mosaic;
mod project;
mod rotate;
mod volume;

pub use interpolate::{Boundary, Interpolation};
pub use project::maximum_intensity_projection;
pub use rotate::rotate;
pub use volume::Volume3D;

use thiserror::Error;

/// Result type alias for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;

/// Error types that can occur during volume operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Affine matrix is not invertible: {0}")]
    SingularAffine(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid axis {0}: a volume has axes 0, 1 and 2")]
    InvalidAxis(usize),

    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),
}

impl VolumeError {
    /// Create a new shape mismatch error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }
}
