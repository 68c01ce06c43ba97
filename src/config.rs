//! Database configuration.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Configuration for opening and scanning a DICOM folder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Name of the register file kept at the folder root.
    pub index_file: String,
    /// File extensions considered during a scan. Empty means every file is
    /// probed (standard DICOM folders often carry no extension at all).
    pub extensions: Vec<String>,
    /// Follow symbolic links while scanning.
    pub follow_links: bool,
    /// Treat non-uniform slice spacing as an error instead of a warning.
    pub strict_geometry: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            index_file: "dicomdb.json".to_string(),
            extensions: Vec::new(),
            follow_links: false,
            strict_geometry: false,
        }
    }
}

impl DbConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: DbConfig = toml::from_str(&text)
            .map_err(|e| Error::config(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_file.trim().is_empty() {
            return Err(Error::config("index_file must not be empty"));
        }
        if self.index_file.contains('/') || self.index_file.contains('\\') {
            return Err(Error::config(
                "index_file must be a plain file name, not a path",
            ));
        }
        Ok(())
    }

    /// Whether a file name passes the extension filter.
    pub(crate) fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}
