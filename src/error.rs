//! Error types for the DICOM database layer

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while working with a DICOM folder
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(String),

    #[error("Pixel data error: {0}")]
    PixelData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Attribute {attribute} missing from {file}")]
    MissingAttribute { attribute: String, file: PathBuf },

    #[error("Series frames do not fill the coordinate grid: {expected} grid cells, {actual} frames")]
    IncompleteGrid { expected: usize, actual: usize },

    #[error("Duplicate coordinates: {0}")]
    DuplicateCoordinate(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("Volume error: {0}")]
    Volume(#[from] dicomdb_volume::VolumeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new DICOM error with file context
    pub fn dicom(msg: impl Into<String>) -> Self {
        Self::Dicom(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new geometry error
    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }
}
