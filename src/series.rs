//! A DICOM series as an N-dimensional array addressable by named
//! acquisition dimensions, plus the spatially sorted 3-D volume view.

use std::collections::BTreeMap;

use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use nalgebra::{Matrix4, Vector3};
use ndarray::{ArrayD, IxDyn};

use dicomdb_volume::Volume3D;

use crate::db::{DataBaseDicom, Series, Study};
use crate::error::{Error, Result};
use crate::index::FrameEntry;
use crate::write::{new_uid, write_mr_instance, SeriesIdentity, SliceGeometry};

/// Ordered dimension names with the sorted coordinate values found along
/// each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct Coords(pub Vec<(String, Vec<f64>)>);

impl Coords {
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Grid shape: one length per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(|(_, v)| v.len()).collect()
    }

    /// Number of grid cells.
    pub fn cells(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Dimension values at a flat grid index, in dimension order.
    fn cell_values(&self, mut flat: usize) -> Vec<f64> {
        let shape = self.shape();
        let mut out = vec![0.0; shape.len()];
        for axis in (0..shape.len()).rev() {
            let index = flat % shape[axis];
            flat /= shape[axis];
            out[axis] = self.0[axis].1[index];
        }
        out
    }
}

/// Attribute values laid out on a series grid.
#[derive(Debug, Clone)]
pub enum ValueArray {
    Numeric(ArrayD<f64>),
    Text(ArrayD<String>),
}

/// Frames sorted into an N-d grid by a list of dimension names. The
/// `order` vector maps flat grid index to frame index.
#[derive(Debug)]
struct SortedFrames<'a> {
    frames: Vec<&'a FrameEntry>,
    order: Vec<usize>,
    coords: Coords,
}

fn sort_frames<'a>(frames: Vec<&'a FrameEntry>, dims: &[&str]) -> Result<SortedFrames<'a>> {
    let dims: Vec<&str> = if dims.is_empty() {
        vec!["InstanceNumber"]
    } else {
        dims.to_vec()
    };

    // Per-frame coordinate along each dimension
    let mut frame_coords: Vec<Vec<f64>> = Vec::with_capacity(frames.len());
    for entry in &frames {
        let mut values = Vec::with_capacity(dims.len());
        for dim in &dims {
            let value = entry.dim_value(dim).ok_or_else(|| Error::MissingAttribute {
                attribute: (*dim).to_string(),
                file: entry.path.clone(),
            })?;
            values.push(value);
        }
        frame_coords.push(values);
    }

    // Sorted unique values per dimension
    let mut axes: Vec<(String, Vec<f64>)> = Vec::with_capacity(dims.len());
    for (axis, dim) in dims.iter().enumerate() {
        let mut values: Vec<f64> = frame_coords.iter().map(|c| c[axis]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        axes.push(((*dim).to_string(), values));
    }
    let coords = Coords(axes);

    let expected = coords.cells();
    if expected != frames.len() {
        return Err(Error::IncompleteGrid {
            expected,
            actual: frames.len(),
        });
    }

    // Place each frame into its grid cell
    let shape = coords.shape();
    let mut order = vec![usize::MAX; expected];
    for (frame_index, values) in frame_coords.iter().enumerate() {
        let mut flat = 0;
        for axis in 0..values.len() {
            let position = coords.0[axis]
                .1
                .iter()
                .position(|v| *v == values[axis])
                .unwrap_or(0);
            flat = flat * shape[axis] + position;
        }
        if order[flat] != usize::MAX {
            return Err(Error::DuplicateCoordinate(format!(
                "frames {} and {} share grid coordinates {values:?}",
                frames[order[flat]].path.display(),
                frames[frame_index].path.display(),
            )));
        }
        order[flat] = frame_index;
    }

    Ok(SortedFrames {
        frames,
        order,
        coords,
    })
}

fn decode_frame(db: &DataBaseDicom, entry: &FrameEntry) -> Result<Vec<f32>> {
    let path = db.path().join(&entry.path);
    let obj = dicom_object::open_file(&path)
        .map_err(|e| Error::dicom(format!("{}: {e}", path.display())))?;
    let decoded = obj
        .decode_pixel_data()
        .map_err(|e| Error::PixelData(format!("{}: {e}", path.display())))?;
    // Raw stored values; the register's slope/intercept are applied below
    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
    let raw: Vec<f32> = decoded
        .to_vec_with_options::<f32>(&options)
        .map_err(|e| Error::PixelData(format!("{}: {e}", path.display())))?;
    let expected = entry.rows as usize * entry.columns as usize;
    if raw.len() != expected {
        return Err(Error::PixelData(format!(
            "{}: expected {expected} pixels, got {}",
            path.display(),
            raw.len()
        )));
    }
    let slope = entry.rescale_slope as f32;
    let intercept = entry.rescale_intercept as f32;
    Ok(raw.into_iter().map(|v| v * slope + intercept).collect())
}

/// Decode a whole series into an array of shape `dims… × rows × cols`,
/// with frames sorted along the named acquisition dimensions.
pub fn pixel_data(
    db: &DataBaseDicom,
    series: &Series,
    dims: &[&str],
) -> Result<(ArrayD<f32>, Coords)> {
    let frames = db.frames(series);
    if frames.is_empty() {
        return Err(Error::not_found(format!(
            "series {} has no instances",
            series.uid
        )));
    }
    let rows = frames[0].rows as usize;
    let cols = frames[0].columns as usize;
    if frames.iter().any(|f| f.rows as usize != rows || f.columns as usize != cols) {
        return Err(Error::PixelData(format!(
            "series {} mixes frame sizes",
            series.uid
        )));
    }

    let sorted = sort_frames(frames, dims)?;
    let mut shape = sorted.coords.shape();
    shape.push(rows);
    shape.push(cols);

    let frame_len = rows * cols;
    let mut data = Vec::with_capacity(sorted.order.len() * frame_len);
    for frame_index in &sorted.order {
        data.extend(decode_frame(db, sorted.frames[*frame_index])?);
    }
    let array = ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| Error::PixelData(format!("grid shape error: {e}")))?;
    Ok((array, sorted.coords))
}

/// Attribute values on the series grid defined by `dims`. Attributes that
/// parse as numbers come back numeric, anything else as text.
pub fn values(
    db: &DataBaseDicom,
    series: &Series,
    attributes: &[&str],
    dims: &[&str],
) -> Result<BTreeMap<String, ValueArray>> {
    let frames = db.frames(series);
    if frames.is_empty() {
        return Err(Error::not_found(format!(
            "series {} has no instances",
            series.uid
        )));
    }
    let sorted = sort_frames(frames, dims)?;
    let shape = sorted.coords.shape();

    let mut out = BTreeMap::new();
    for attribute in attributes {
        let mut numeric: Vec<f64> = Vec::with_capacity(sorted.order.len());
        let mut text: Vec<String> = Vec::with_capacity(sorted.order.len());
        let mut all_numeric = true;
        for frame_index in &sorted.order {
            let entry = sorted.frames[*frame_index];
            let path = db.path().join(&entry.path);
            let obj = dicom_object::open_file(&path)
                .map_err(|e| Error::dicom(format!("{}: {e}", path.display())))?;
            let element = obj
                .element_by_name(attribute)
                .map_err(|_| Error::MissingAttribute {
                    attribute: (*attribute).to_string(),
                    file: entry.path.clone(),
                })?;
            let value = element
                .to_str()
                .map_err(|e| Error::dicom(format!("{}: {e}", path.display())))?
                .trim()
                .to_string();
            match element.to_float64() {
                Ok(number) => numeric.push(number),
                Err(_) => all_numeric = false,
            }
            text.push(value);
        }
        let array = if all_numeric {
            ValueArray::Numeric(
                ArrayD::from_shape_vec(IxDyn(&shape), numeric)
                    .map_err(|e| Error::PixelData(format!("grid shape error: {e}")))?,
            )
        } else {
            ValueArray::Text(
                ArrayD::from_shape_vec(IxDyn(&shape), text)
                    .map_err(|e| Error::PixelData(format!("grid shape error: {e}")))?,
            )
        };
        out.insert((*attribute).to_string(), array);
    }
    Ok(out)
}

// --- spatial volume view ---

struct SliceOrder<'a> {
    slices: Vec<&'a FrameEntry>,
    dir_x: Vector3<f64>,
    dir_y: Vector3<f64>,
    dir_z: Vector3<f64>,
}

fn sort_spatially<'a>(db: &DataBaseDicom, frames: Vec<&'a FrameEntry>) -> Result<SliceOrder<'a>> {
    let orientation = frames[0].orientation.ok_or_else(|| Error::MissingAttribute {
        attribute: "ImageOrientationPatient".to_string(),
        file: frames[0].path.clone(),
    })?;
    let dir_x = Vector3::new(orientation[0], orientation[1], orientation[2]).normalize();
    let dir_y = Vector3::new(orientation[3], orientation[4], orientation[5]).normalize();
    let dir_z = dir_x.cross(&dir_y).normalize();

    for entry in &frames[1..] {
        if let Some(other) = entry.orientation {
            let ox = Vector3::new(other[0], other[1], other[2]);
            let oy = Vector3::new(other[3], other[4], other[5]);
            if (ox - dir_x).norm() > 1e-3 || (oy - dir_y).norm() > 1e-3 {
                let message = format!(
                    "inconsistent ImageOrientationPatient in series ({})",
                    entry.path.display()
                );
                if db.config().strict_geometry {
                    return Err(Error::geometry(message));
                }
                tracing::warn!("{message}");
            }
        }
    }

    let mut slices = frames;
    slices.sort_by(|a, b| {
        let pa = position_of(a).dot(&dir_z);
        let pb = position_of(b).dot(&dir_z);
        pa.total_cmp(&pb)
    });
    Ok(SliceOrder {
        slices,
        dir_x,
        dir_y,
        dir_z,
    })
}

fn position_of(entry: &FrameEntry) -> Vector3<f64> {
    match entry.position {
        Some(p) => Vector3::new(p[0], p[1], p[2]),
        None => Vector3::zeros(),
    }
}

fn slice_spacing(db: &DataBaseDicom, order: &SliceOrder<'_>) -> Result<f64> {
    if order.slices.len() < 2 {
        return Ok(order.slices[0].slice_thickness.unwrap_or(1.0));
    }
    let mut sum = 0.0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for pair in order.slices.windows(2) {
        let step = (position_of(pair[1]) - position_of(pair[0]))
            .dot(&order.dir_z)
            .abs();
        sum += step;
        min = min.min(step);
        max = max.max(step);
    }
    let avg = sum / (order.slices.len() - 1) as f64;
    if avg <= 0.0 {
        return Err(Error::geometry(
            "slices share a position, slice spacing is zero".to_string(),
        ));
    }
    if (max - min) > 0.01 * avg {
        let message =
            format!("non-uniform slice spacing: min={min:.4}, max={max:.4}, avg={avg:.4}");
        if db.config().strict_geometry {
            return Err(Error::geometry(message));
        }
        tracing::warn!("{message}");
    }
    Ok(avg)
}

fn volume_from_slices(db: &DataBaseDicom, order: &SliceOrder<'_>) -> Result<Volume3D> {
    let first = order.slices[0];
    let rows = first.rows as usize;
    let cols = first.columns as usize;
    let spacing = first.pixel_spacing.ok_or_else(|| Error::MissingAttribute {
        attribute: "PixelSpacing".to_string(),
        file: first.path.clone(),
    })?;
    let dy = spacing[0];
    let dx = spacing[1];
    let dz = slice_spacing(db, order)?;

    let mut affine = Matrix4::identity();
    let step_x = order.dir_x * dx;
    let step_y = order.dir_y * dy;
    let step_z = if order.slices.len() > 1 {
        let span = position_of(order.slices[order.slices.len() - 1]) - position_of(order.slices[0]);
        span / (order.slices.len() - 1) as f64
    } else {
        order.dir_z * dz
    };
    let origin = position_of(order.slices[0]);
    for axis in 0..3 {
        affine[(axis, 0)] = step_x[axis];
        affine[(axis, 1)] = step_y[axis];
        affine[(axis, 2)] = step_z[axis];
        affine[(axis, 3)] = origin[axis];
    }

    let mut data = ndarray::Array3::<f32>::zeros((cols, rows, order.slices.len()));
    for (k, entry) in order.slices.iter().enumerate() {
        if entry.rows as usize != rows || entry.columns as usize != cols {
            return Err(Error::geometry(format!(
                "{} has a different frame size",
                entry.path.display()
            )));
        }
        let pixels = decode_frame(db, entry)?;
        for j in 0..rows {
            for i in 0..cols {
                data[(i, j, k)] = pixels[j * cols + i];
            }
        }
    }
    Ok(Volume3D::new(data, affine)?)
}

/// The series as a spatially sorted 3-D volume. Slices are ordered by the
/// projection of ImagePositionPatient onto the slice normal.
pub fn volume(db: &DataBaseDicom, series: &Series) -> Result<Volume3D> {
    let frames = db.frames(series);
    if frames.is_empty() {
        return Err(Error::not_found(format!(
            "series {} has no instances",
            series.uid
        )));
    }
    let order = sort_spatially(db, frames)?;
    volume_from_slices(db, &order)
}

/// One volume per coordinate tuple of the non-spatial dimensions `dims`.
/// Returns (dimension values, volume) pairs in grid order.
pub fn volumes(
    db: &DataBaseDicom,
    series: &Series,
    dims: &[&str],
) -> Result<Vec<(Vec<(String, f64)>, Volume3D)>> {
    let frames = db.frames(series);
    if frames.is_empty() {
        return Err(Error::not_found(format!(
            "series {} has no instances",
            series.uid
        )));
    }
    // Group frames by their value tuple along the non-spatial dimensions;
    // each group holds the slices of one volume.
    let mut partitions: BTreeMap<Vec<u64>, (Vec<f64>, Vec<&FrameEntry>)> = BTreeMap::new();
    for entry in frames {
        let mut values = Vec::with_capacity(dims.len());
        for dim in dims {
            let value = entry.dim_value(dim).ok_or_else(|| Error::MissingAttribute {
                attribute: (*dim).to_string(),
                file: entry.path.clone(),
            })?;
            values.push(value);
        }
        // Sortable key: f64 bits shifted so ordering matches total_cmp
        let key: Vec<u64> = values
            .iter()
            .map(|v| {
                let bits = v.to_bits();
                if bits >> 63 == 0 {
                    bits ^ (1 << 63)
                } else {
                    !bits
                }
            })
            .collect();
        partitions
            .entry(key)
            .or_insert_with(|| (values, Vec::new()))
            .1
            .push(entry);
    }

    let mut out = Vec::with_capacity(partitions.len());
    for (_, (values, group)) in partitions {
        let labels: Vec<(String, f64)> = dims
            .iter()
            .zip(values)
            .map(|(n, v)| ((*n).to_string(), v))
            .collect();
        let order = sort_spatially(db, group)?;
        out.push((labels, volume_from_slices(db, &order)?));
    }
    Ok(out)
}

// --- writing series ---

fn identity_for(study: &Study, description: &str, series_uid: &str) -> SeriesIdentity {
    SeriesIdentity {
        patient_id: study.patient.id.clone(),
        patient_name: study.patient.name.clone(),
        study_uid: study.uid.clone(),
        study_description: study.description.clone(),
        series_uid: series_uid.to_string(),
        series_description: description.to_string(),
        series_number: 1,
    }
}

fn geometry_from_affine(affine: &Matrix4<f64>, k: usize) -> SliceGeometry {
    let col = |c: usize| Vector3::new(affine[(0, c)], affine[(1, c)], affine[(2, c)]);
    let step_x = col(0);
    let step_y = col(1);
    let step_z = col(2);
    let origin = col(3) + step_z * k as f64;
    let dx = step_x.norm();
    let dy = step_y.norm();
    let ux = step_x / dx;
    let uy = step_y / dy;
    SliceGeometry {
        position: [origin[0], origin[1], origin[2]],
        orientation: [ux[0], ux[1], ux[2], uy[0], uy[1], uy[2]],
        pixel_spacing: [dy, dx],
        slice_thickness: step_z.norm(),
    }
}

fn scaling_for(min: f32, max: f32) -> (f64, f64) {
    let range = (max - min) as f64;
    if range > 0.0 {
        (range / f64::from(u16::MAX), f64::from(min))
    } else {
        (1.0, f64::from(min))
    }
}

/// Write a volume into the database as a new MR Image Storage series under
/// the given study. Voxels are stored as 16-bit integers with a volume-wide
/// RescaleSlope/Intercept.
pub fn write_volume(
    db: &mut DataBaseDicom,
    vol: &Volume3D,
    study: &Study,
    description: &str,
) -> Result<Series> {
    let series_uid = new_uid();
    let identity = identity_for(study, description, &series_uid);
    let (nx, ny, nz) = vol.shape();

    let min = vol.data().iter().copied().fold(f32::INFINITY, f32::min);
    let max = vol.data().iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let (slope, intercept) = scaling_for(min, max);

    for k in 0..nz {
        let geometry = geometry_from_affine(vol.affine(), k);
        let mut pixels = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let value = f64::from(vol.data()[(i, j, k)]);
                let stored = ((value - intercept) / slope).round();
                pixels.push(stored.clamp(0.0, f64::from(u16::MAX)) as u16);
            }
        }
        let mut dims = BTreeMap::new();
        dims.insert("InstanceNumber".to_string(), (k + 1) as f64);
        write_mr_instance(
            &db.path().join(format!("{}.dcm", new_uid())),
            &identity,
            &geometry,
            &dims,
            ny as u16,
            nx as u16,
            &pixels,
            slope,
            intercept,
        )?;
    }
    refresh_written(db)?;
    tracing::info!(series = %series_uid, slices = nz, "wrote volume as series");
    Ok(Series {
        study: study.clone(),
        uid: series_uid,
        description: description.to_string(),
        number: Some(1),
    })
}

// Written files are picked up by rescanning only the unregistered ones.
fn refresh_written(db: &mut DataBaseDicom) -> Result<()> {
    let root = db.path().to_path_buf();
    let known: Vec<std::path::PathBuf> = db
        .register()
        .entries
        .iter()
        .map(|e| root.join(&e.path))
        .collect();
    let mut added = Vec::new();
    for item in walkdir::WalkDir::new(&root) {
        let item = item.map_err(|e| Error::dicom(format!("scan failed: {e}")))?;
        if !item.file_type().is_file() {
            continue;
        }
        let path = item.path().to_path_buf();
        if path.file_name().and_then(|n| n.to_str()) == Some(db.config().index_file.as_str()) {
            continue;
        }
        if !known.contains(&path) {
            added.push(path);
        }
    }
    for path in added {
        db.register_file(&path)?;
    }
    db.save()
}

/// Create a new series filled with zeros: a grid of `coords` cells, each
/// holding a `rows × cols` frame.
pub fn zeros(
    db: &mut DataBaseDicom,
    study: &Study,
    description: &str,
    rows: usize,
    cols: usize,
    coords: &Coords,
) -> Result<Series> {
    let mut shape = coords.shape();
    shape.push(rows);
    shape.push(cols);
    let array = ArrayD::zeros(IxDyn(&shape));
    from_array(db, study, description, &array, coords)
}

/// Create a new series from an array of shape `coords… × rows × cols`.
/// Each grid cell becomes one MR Image Storage instance carrying the cell's
/// dimension values.
pub fn from_array(
    db: &mut DataBaseDicom,
    study: &Study,
    description: &str,
    array: &ArrayD<f32>,
    coords: &Coords,
) -> Result<Series> {
    let shape = array.shape();
    if shape.len() != coords.0.len() + 2 {
        return Err(Error::PixelData(format!(
            "array has {} axes, expected {} dimensions plus rows and columns",
            shape.len(),
            coords.0.len()
        )));
    }
    let grid_shape = coords.shape();
    if shape[..grid_shape.len()] != grid_shape[..] {
        return Err(Error::IncompleteGrid {
            expected: coords.cells(),
            actual: shape[..grid_shape.len()].iter().product(),
        });
    }
    let rows = shape[shape.len() - 2];
    let cols = shape[shape.len() - 1];
    let frame_len = rows * cols;

    let series_uid = new_uid();
    let identity = identity_for(study, description, &series_uid);

    let flat: Vec<f32> = array.iter().copied().collect();
    let min = flat.iter().copied().fold(f32::INFINITY, f32::min);
    let max = flat.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let (slope, intercept) = scaling_for(min, max);

    for cell in 0..coords.cells().max(1) {
        let cell_values = if coords.0.is_empty() {
            Vec::new()
        } else {
            coords.cell_values(cell)
        };
        let mut dims: BTreeMap<String, f64> = coords
            .names()
            .iter()
            .zip(cell_values.iter())
            .map(|(n, v)| ((*n).to_string(), *v))
            .collect();
        dims.entry("InstanceNumber".to_string())
            .or_insert((cell + 1) as f64);

        // Stack frames along z when SliceLocation is one of the dimensions
        let z = dims.get("SliceLocation").copied().unwrap_or(0.0);
        let geometry = SliceGeometry {
            position: [0.0, 0.0, z],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [1.0, 1.0],
            slice_thickness: 1.0,
        };

        let start = cell * frame_len;
        let pixels: Vec<u16> = flat[start..start + frame_len]
            .iter()
            .map(|v| {
                let stored = ((f64::from(*v) - intercept) / slope).round();
                stored.clamp(0.0, f64::from(u16::MAX)) as u16
            })
            .collect();
        write_mr_instance(
            &db.path().join(format!("{}.dcm", new_uid())),
            &identity,
            &geometry,
            &dims,
            rows as u16,
            cols as u16,
            &pixels,
            slope,
            intercept,
        )?;
    }
    refresh_written(db)?;
    tracing::info!(series = %series_uid, cells = coords.cells().max(1), "created series");
    Ok(Series {
        study: study.clone(),
        uid: series_uid,
        description: description.to_string(),
        number: Some(1),
    })
}

// --- NIfTI bridge lives in nifti_bridge.rs; re-exported from lib.rs ---
