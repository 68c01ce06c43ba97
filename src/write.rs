//! Writing DICOM instances: new MR Image Storage files and re-identified
//! copies of existing files.

use std::collections::BTreeMap;
use std::path::Path;

use dicom_core::value::PrimitiveValue;
use dicom_core::{DataElement, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, InMemDicomObject};

use crate::error::{Error, Result};
use crate::index::{dimension_entry, format_tm};

/// Generate a fresh DICOM UID in the UUID-derived `2.25` root.
pub(crate) fn new_uid() -> String {
    format!("2.25.{}", uuid::Uuid::new_v4().as_u128())
}

/// Identity attributes shared by every instance of a series.
#[derive(Debug, Clone)]
pub(crate) struct SeriesIdentity {
    pub patient_id: String,
    pub patient_name: String,
    pub study_uid: String,
    pub study_description: String,
    pub series_uid: String,
    pub series_description: String,
    pub series_number: i64,
}

/// Per-slice spatial attributes.
#[derive(Debug, Clone)]
pub(crate) struct SliceGeometry {
    pub position: [f64; 3],
    pub orientation: [f64; 6],
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: f64,
}

/// Write one MR Image Storage instance holding a single 16-bit
/// MONOCHROME2 frame. Stored values map to real values through the given
/// rescale slope and intercept.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_mr_instance(
    path: &Path,
    identity: &SeriesIdentity,
    geometry: &SliceGeometry,
    dims: &BTreeMap<String, f64>,
    rows: u16,
    columns: u16,
    pixels: &[u16],
    slope: f64,
    intercept: f64,
) -> Result<String> {
    if pixels.len() != rows as usize * columns as usize {
        return Err(Error::PixelData(format!(
            "frame size mismatch: {} pixels for a {rows}x{columns} frame",
            pixels.len()
        )));
    }

    let sop_uid = new_uid();
    let mut obj = InMemDicomObject::new_empty();
    let put = |o: &mut InMemDicomObject, tag: Tag, vr: VR, val: PrimitiveValue| {
        o.put(DataElement::new(tag, vr, val));
    };

    put(&mut obj, tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE));
    put(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid.as_str()));
    put(&mut obj, tags::MODALITY, VR::CS, PrimitiveValue::from("MR"));

    put(&mut obj, tags::PATIENT_ID, VR::LO, PrimitiveValue::from(identity.patient_id.as_str()));
    put(&mut obj, tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(identity.patient_name.as_str()));
    put(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(identity.study_uid.as_str()));
    put(&mut obj, tags::STUDY_DESCRIPTION, VR::LO, PrimitiveValue::from(identity.study_description.as_str()));
    put(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(identity.series_uid.as_str()));
    put(&mut obj, tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from(identity.series_description.as_str()));
    put(&mut obj, tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from(identity.series_number.to_string()));

    put(&mut obj, tags::IMAGE_POSITION_PATIENT, VR::DS, decimal_strings(&geometry.position));
    put(&mut obj, tags::IMAGE_ORIENTATION_PATIENT, VR::DS, decimal_strings(&geometry.orientation));
    put(&mut obj, tags::PIXEL_SPACING, VR::DS, decimal_strings(&geometry.pixel_spacing));
    put(&mut obj, tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from(format_decimal(geometry.slice_thickness)));

    for (name, value) in dims {
        if let Some((tag, vr)) = dimension_entry(name) {
            let text = match vr {
                VR::TM => format_tm(*value),
                VR::IS => format!("{}", value.round() as i64),
                _ => format_decimal(*value),
            };
            put(&mut obj, tag, vr, PrimitiveValue::from(text));
        }
    }

    put(&mut obj, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16));
    put(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2"));
    put(&mut obj, tags::ROWS, VR::US, PrimitiveValue::from(rows));
    put(&mut obj, tags::COLUMNS, VR::US, PrimitiveValue::from(columns));
    put(&mut obj, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16));
    put(&mut obj, tags::BITS_STORED, VR::US, PrimitiveValue::from(16u16));
    put(&mut obj, tags::HIGH_BIT, VR::US, PrimitiveValue::from(15u16));
    put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16));
    put(&mut obj, tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from(format_decimal(slope)));
    put(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from(format_decimal(intercept)));
    put(&mut obj, tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(pixels.to_vec().into()));

    write_part10(path, &obj, uids::MR_IMAGE_STORAGE, uids::EXPLICIT_VR_LITTLE_ENDIAN)?;
    Ok(sop_uid)
}

/// Write a re-identified copy of an existing instance. The dataset is
/// preserved except for the identity attributes; the transfer syntax of
/// the source file is kept.
pub(crate) fn write_reidentified(
    source: &DefaultDicomObject,
    path: &Path,
    patient_id: &str,
    patient_name: &str,
    study_uid: &str,
    series_uid: &str,
    sop_uid: &str,
) -> Result<()> {
    let sop_class = source
        .element(tags::SOP_CLASS_UID)
        .ok()
        .and_then(|e| e.to_str().ok().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string());
    let transfer_syntax = source.meta().transfer_syntax().to_string();

    let mut dataset: InMemDicomObject = (**source).clone();
    dataset.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)));
    dataset.put(DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(patient_name)));
    dataset.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_uid)));
    dataset.put(DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)));
    dataset.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid)));

    write_part10(path, &dataset, &sop_class, &transfer_syntax)
}

/// Update attributes of an existing instance on disk, preserving
/// everything else including the transfer syntax.
pub(crate) fn rewrite_attributes(
    source: &DefaultDicomObject,
    path: &Path,
    updates: Vec<(Tag, VR, PrimitiveValue)>,
) -> Result<()> {
    let sop_class = source
        .element(tags::SOP_CLASS_UID)
        .ok()
        .and_then(|e| e.to_str().ok().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string());
    let transfer_syntax = source.meta().transfer_syntax().to_string();
    let mut dataset: InMemDicomObject = (**source).clone();
    for (tag, vr, value) in updates {
        dataset.put(DataElement::new(tag, vr, value));
    }
    write_part10(path, &dataset, &sop_class, &transfer_syntax)
}

fn write_part10(
    path: &Path,
    dataset: &InMemDicomObject,
    sop_class: &str,
    transfer_syntax: &str,
) -> Result<()> {
    dataset
        .clone()
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(transfer_syntax)
                .media_storage_sop_class_uid(sop_class),
        )
        .map_err(|e| Error::dicom(format!("failed to build file meta: {e}")))?
        .write_to_file(path)
        .map_err(|e| Error::dicom(format!("{}: failed to write ({e})", path.display())))?;
    tracing::debug!(file = %path.display(), "wrote DICOM instance");
    Ok(())
}

fn format_decimal(value: f64) -> String {
    // DS values are limited to 16 bytes; 8 fractional digits leave room
    // for a sign and a three-digit exponent
    let text = format!("{value}");
    if text.len() <= 16 {
        text
    } else {
        format!("{value:.8e}")
    }
}

fn decimal_strings(values: &[f64]) -> PrimitiveValue {
    let strings: Vec<String> = values.iter().map(|v| format_decimal(*v)).collect();
    PrimitiveValue::Strs(strings.into())
}
