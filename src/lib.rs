//! A DICOM folder database with a coordinate-indexed series view.
//!
//! A folder of DICOM files is opened as a [`DataBaseDicom`] exposing the
//! Patient → Study → Series hierarchy. A series can be read as an
//! N-dimensional array sorted along named acquisition dimensions
//! (`SliceLocation`, `FlipAngle`, …) or as a spatially sorted 3-D volume
//! with a patient-space affine, ready for rotation, projection and NIfTI
//! export.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
mod index;
pub mod nifti_bridge;
pub mod series;
mod write;

use std::path::Path;

pub use config::DbConfig;
pub use db::{DataBaseDicom, Entity, Filter, Patient, Series, Study, Summary};
pub use error::{Error, Result};
pub use index::{FrameEntry, Register};
pub use series::{Coords, ValueArray};

pub use dicomdb_volume as volume;
pub use dicomdb_volume::{Boundary, Interpolation, Volume3D};

/// Open a folder as a DICOM database with the default configuration.
pub fn open<P: AsRef<Path>>(path: P) -> Result<DataBaseDicom> {
    DataBaseDicom::open(path)
}
