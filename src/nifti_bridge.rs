//! NIfTI-1 import and export, carrying the patient-space affine in the
//! sform fields.

use std::path::Path;

use nalgebra::Matrix4;
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use dicomdb_volume::Volume3D;

use crate::db::{DataBaseDicom, Series, Study};
use crate::error::{Error, Result};
use crate::series::{volume, write_volume};

/// Export a series to a NIfTI-1 file. The spatial affine goes into the
/// sform rows.
pub fn to_nifti(db: &DataBaseDicom, series: &Series, path: &Path) -> Result<()> {
    let vol = volume(db, series)?;
    write_nifti_volume(&vol, path)
}

/// Write a volume to a NIfTI-1 file.
pub fn write_nifti_volume(vol: &Volume3D, path: &Path) -> Result<()> {
    let affine = vol.affine();
    let row = |r: usize| {
        [
            affine[(r, 0)] as f32,
            affine[(r, 1)] as f32,
            affine[(r, 2)] as f32,
            affine[(r, 3)] as f32,
        ]
    };
    let spacing = vol.spacing();
    let header = NiftiHeader {
        sform_code: 1,
        qform_code: 0,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        pixdim: [
            1.0,
            spacing[0] as f32,
            spacing[1] as f32,
            spacing[2] as f32,
            1.0,
            1.0,
            1.0,
            1.0,
        ],
        ..NiftiHeader::default()
    };
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(vol.data())
        .map_err(|e| Error::Nifti(format!("{}: {e}", path.display())))?;
    tracing::info!(file = %path.display(), "wrote NIfTI volume");
    Ok(())
}

/// Read a 3-D NIfTI-1 file as a volume, taking the affine from the sform
/// when set, else the qform, else pixdim scaling.
pub fn read_nifti_volume(path: &Path) -> Result<Volume3D> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| Error::Nifti(format!("{}: {e}", path.display())))?;
    let affine = affine_from_header(obj.header());

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| Error::Nifti(format!("{}: {e}", path.display())))?;
    if array.ndim() != 3 {
        return Err(Error::Nifti(format!(
            "{}: expected a 3-D volume, found {} axes",
            path.display(),
            array.ndim()
        )));
    }
    let data = array
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|e| Error::Nifti(format!("{}: {e}", path.display())))?;
    Ok(Volume3D::new(data, affine)?)
}

/// Import a NIfTI-1 file as a new series under a study.
pub fn from_nifti(
    db: &mut DataBaseDicom,
    path: &Path,
    study: &Study,
    description: &str,
) -> Result<Series> {
    let vol = read_nifti_volume(path)?;
    write_volume(db, &vol, study, description)
}

fn affine_from_header(header: &NiftiHeader) -> Matrix4<f64> {
    let mut affine = Matrix4::identity();
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        for (r, row) in rows.iter().enumerate() {
            for c in 0..4 {
                affine[(r, c)] = f64::from(row[c]);
            }
        }
        return affine;
    }
    if header.qform_code > 0 {
        let b = f64::from(header.quatern_b);
        let c = f64::from(header.quatern_c);
        let d = f64::from(header.quatern_d);
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 {
            1.0
        } else {
            f64::from(header.pixdim[0])
        };
        let dx = f64::from(header.pixdim[1]);
        let dy = f64::from(header.pixdim[2]);
        let dz = f64::from(header.pixdim[3]) * qfac;

        let rot = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * b * c - 2.0 * a * d,
                2.0 * b * d + 2.0 * a * c,
            ],
            [
                2.0 * b * c + 2.0 * a * d,
                a * a + c * c - b * b - d * d,
                2.0 * c * d - 2.0 * a * b,
            ],
            [
                2.0 * b * d - 2.0 * a * c,
                2.0 * c * d + 2.0 * a * b,
                a * a + d * d - c * c - b * b,
            ],
        ];
        let scale = [dx, dy, dz];
        for r in 0..3 {
            for c in 0..3 {
                affine[(r, c)] = rot[r][c] * scale[c];
            }
        }
        affine[(0, 3)] = f64::from(header.quatern_x);
        affine[(1, 3)] = f64::from(header.quatern_y);
        affine[(2, 3)] = f64::from(header.quatern_z);
        return affine;
    }
    for axis in 0..3 {
        let step = f64::from(header.pixdim[axis + 1]);
        affine[(axis, axis)] = if step != 0.0 { step } else { 1.0 };
    }
    affine
}
