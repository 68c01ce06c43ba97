//! Folder scanning and the register: a flat index of every DICOM file in
//! the database folder, persisted as JSON so reopening is cheap.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::DbConfig;
use crate::error::{Error, Result};

/// Acquisition dimensions a series can be sorted by: keyword, tag and the
/// VR used when writing the attribute back.
pub(crate) const DIMENSIONS: &[(&str, Tag, VR)] = &[
    ("InstanceNumber", tags::INSTANCE_NUMBER, VR::IS),
    ("SliceLocation", tags::SLICE_LOCATION, VR::DS),
    ("AcquisitionTime", tags::ACQUISITION_TIME, VR::TM),
    ("FlipAngle", tags::FLIP_ANGLE, VR::DS),
    ("RepetitionTime", tags::REPETITION_TIME, VR::DS),
    ("EchoTime", tags::ECHO_TIME, VR::DS),
    ("InversionTime", tags::INVERSION_TIME, VR::DS),
    ("TriggerTime", tags::TRIGGER_TIME, VR::DS),
];

pub(crate) fn dimension_entry(name: &str) -> Option<(Tag, VR)> {
    DIMENSIONS
        .iter()
        .find(|(keyword, _, _)| *keyword == name)
        .map(|(_, tag, vr)| (*tag, *vr))
}

/// One register row per SOP instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEntry {
    /// Path relative to the database folder.
    pub path: PathBuf,
    /// File modification time, for staleness checks.
    pub modified: DateTime<Utc>,
    pub patient_id: String,
    pub patient_name: String,
    pub study_uid: String,
    pub study_description: String,
    pub study_date: Option<String>,
    pub series_uid: String,
    pub series_description: String,
    pub series_number: Option<i64>,
    pub sop_uid: String,
    pub rows: u32,
    pub columns: u32,
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub position: Option<[f64; 3]>,
    pub orientation: Option<[f64; 6]>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// Numeric values of the sortable acquisition dimensions present in
    /// the file (see [`DIMENSIONS`]).
    pub dims: BTreeMap<String, f64>,
}

impl FrameEntry {
    /// Numeric coordinate of this frame along a named dimension.
    pub fn dim_value(&self, name: &str) -> Option<f64> {
        self.dims.get(name).copied()
    }
}

/// The register: all frames found under the database folder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Register {
    pub entries: Vec<FrameEntry>,
}

impl Register {
    /// Scan a folder and build a fresh register. Files that fail to parse
    /// as DICOM are skipped with a warning.
    pub fn scan(root: &Path, config: &DbConfig) -> Result<Self> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(root).follow_links(config.follow_links);
        for item in walker {
            let item = item.map_err(|e| Error::dicom(format!("scan failed: {e}")))?;
            if !item.file_type().is_file() {
                continue;
            }
            let path = item.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(config.index_file.as_str()) {
                continue;
            }
            if !config.accepts(path) {
                continue;
            }
            match read_entry(root, path) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping non-DICOM file");
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!(folder = %root.display(), frames = entries.len(), "scanned DICOM folder");
        Ok(Self { entries })
    }

    /// Load the persisted register if it is present and still describes the
    /// folder contents exactly (same files, same modification times).
    pub fn load(root: &Path, config: &DbConfig) -> Option<Self> {
        let index_path = root.join(&config.index_file);
        let text = std::fs::read_to_string(&index_path).ok()?;
        let register: Register = serde_json::from_str(&text).ok()?;
        if register.is_fresh(root, config) {
            Some(register)
        } else {
            tracing::debug!(folder = %root.display(), "register is stale, rescanning");
            None
        }
    }

    /// Persist the register as JSON at the folder root.
    pub fn save(&self, root: &Path, config: &DbConfig) -> Result<()> {
        let index_path = root.join(&config.index_file);
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(index_path, text)?;
        Ok(())
    }

    fn is_fresh(&self, root: &Path, config: &DbConfig) -> bool {
        let mut on_disk = Vec::new();
        let walker = WalkDir::new(root).follow_links(config.follow_links);
        for item in walker.into_iter().flatten() {
            if !item.file_type().is_file() {
                continue;
            }
            let path = item.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(config.index_file.as_str()) {
                continue;
            }
            if !config.accepts(path) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(root) else {
                return false;
            };
            on_disk.push(rel.to_path_buf());
        }
        on_disk.sort();
        let mut indexed: Vec<&PathBuf> = self.entries.iter().map(|e| &e.path).collect();
        indexed.sort();
        if on_disk.len() != indexed.len()
            || !on_disk.iter().zip(indexed.iter()).all(|(a, b)| &a == b)
        {
            return false;
        }
        self.entries.iter().all(|entry| {
            file_modified(&root.join(&entry.path))
                .map(|m| m == entry.modified)
                .unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Parse one file into a register row.
pub(crate) fn read_entry(root: &Path, path: &Path) -> Result<FrameEntry> {
    let obj = open_file(path)
        .map_err(|e| Error::dicom(format!("{}: failed to open ({e})", path.display())))?;

    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_path_buf();
    let modified = file_modified(path)
        .ok_or_else(|| Error::dicom(format!("{}: cannot stat file", path.display())))?;

    let mut dims = BTreeMap::new();
    for (name, tag, vr) in DIMENSIONS {
        if let Some(value) = numeric_value(&obj, *tag, *vr) {
            dims.insert((*name).to_string(), value);
        }
    }

    Ok(FrameEntry {
        path: rel,
        modified,
        patient_id: string_value(&obj, tags::PATIENT_ID).unwrap_or_default(),
        patient_name: string_value(&obj, tags::PATIENT_NAME).unwrap_or_default(),
        study_uid: string_value(&obj, tags::STUDY_INSTANCE_UID)
            .ok_or_else(|| missing("StudyInstanceUID", path))?,
        study_description: string_value(&obj, tags::STUDY_DESCRIPTION).unwrap_or_default(),
        study_date: string_value(&obj, tags::STUDY_DATE),
        series_uid: string_value(&obj, tags::SERIES_INSTANCE_UID)
            .ok_or_else(|| missing("SeriesInstanceUID", path))?,
        series_description: string_value(&obj, tags::SERIES_DESCRIPTION).unwrap_or_default(),
        series_number: int_value(&obj, tags::SERIES_NUMBER),
        sop_uid: string_value(&obj, tags::SOP_INSTANCE_UID)
            .ok_or_else(|| missing("SOPInstanceUID", path))?,
        rows: uint_value(&obj, tags::ROWS).unwrap_or(0),
        columns: uint_value(&obj, tags::COLUMNS).unwrap_or(0),
        pixel_spacing: float_pair(&obj, tags::PIXEL_SPACING),
        slice_thickness: float_value(&obj, tags::SLICE_THICKNESS),
        position: float_triplet(&obj, tags::IMAGE_POSITION_PATIENT),
        orientation: float_sextet(&obj, tags::IMAGE_ORIENTATION_PATIENT),
        rescale_slope: float_value(&obj, tags::RESCALE_SLOPE).unwrap_or(1.0),
        rescale_intercept: float_value(&obj, tags::RESCALE_INTERCEPT).unwrap_or(0.0),
        dims,
    })
}

fn missing(attribute: &str, file: &Path) -> Error {
    Error::MissingAttribute {
        attribute: attribute.to_string(),
        file: file.to_path_buf(),
    }
}

// --- attribute helpers ---

pub(crate) fn string_value(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()?
        .to_str()
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn int_value(obj: &DefaultDicomObject, tag: Tag) -> Option<i64> {
    obj.element(tag).ok()?.to_int::<i64>().ok()
}

fn uint_value(obj: &DefaultDicomObject, tag: Tag) -> Option<u32> {
    obj.element(tag).ok()?.to_int::<u32>().ok()
}

pub(crate) fn float_value(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn float_list(obj: &DefaultDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn float_pair(obj: &DefaultDicomObject, tag: Tag) -> Option<[f64; 2]> {
    let v = float_list(obj, tag)?;
    (v.len() == 2).then(|| [v[0], v[1]])
}

fn float_triplet(obj: &DefaultDicomObject, tag: Tag) -> Option<[f64; 3]> {
    let v = float_list(obj, tag)?;
    (v.len() == 3).then(|| [v[0], v[1], v[2]])
}

fn float_sextet(obj: &DefaultDicomObject, tag: Tag) -> Option<[f64; 6]> {
    let v = float_list(obj, tag)?;
    (v.len() == 6).then(|| [v[0], v[1], v[2], v[3], v[4], v[5]])
}

fn numeric_value(obj: &DefaultDicomObject, tag: Tag, vr: VR) -> Option<f64> {
    if vr == VR::TM {
        let text = string_value(obj, tag)?;
        parse_tm(&text)
    } else {
        float_value(obj, tag)
    }
}

/// Parse a DICOM TM value ("HHMMSS.FFFFFF", components optional) into
/// seconds since midnight.
pub(crate) fn parse_tm(text: &str) -> Option<f64> {
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.len() < 2 || whole.len() > 6 || whole.len() % 2 != 0 {
        return None;
    }
    let mut seconds = 0.0;
    let hours: f64 = whole[0..2].parse().ok()?;
    seconds += hours * 3600.0;
    if whole.len() >= 4 {
        let minutes: f64 = whole[2..4].parse().ok()?;
        seconds += minutes * 60.0;
    }
    if whole.len() == 6 {
        let secs: f64 = whole[4..6].parse().ok()?;
        seconds += secs;
    }
    if !frac.is_empty() {
        let fraction: f64 = format!("0.{frac}").parse().ok()?;
        seconds += fraction;
    }
    Some(seconds)
}

/// Format seconds since midnight as a DICOM TM value.
pub(crate) fn format_tm(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let hours = (total / 3600.0).floor();
    let minutes = ((total - hours * 3600.0) / 60.0).floor();
    let secs = total - hours * 3600.0 - minutes * 60.0;
    format!("{:02}{:02}{:09.6}", hours as u32, minutes as u32, secs)
}
