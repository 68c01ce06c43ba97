//! The spatial volume view: geometry, partitioned volumes, writing
//! volumes back and running the volume operations end to end.

#[path = "../common/mod.rs"]
mod common;

use dicomdb::volume::{dro, maximum_intensity_projection, rotate, Boundary, Interpolation};
use dicomdb::{series, Coords, DataBaseDicom, DbConfig, Error, Filter, Volume3D};
use nalgebra::{Matrix4, Point3};

#[test]
fn volume_sorts_slices_spatially() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::slice_series(&mut db, &study, 3);

    let vol = series::volume(&db, &s).unwrap();
    // 4 columns x 3 rows x 3 slices, 5 mm apart along z
    assert_eq!(vol.shape(), (4, 3, 3));
    let spacing = vol.spacing();
    assert!((spacing[0] - 1.0).abs() < 1e-9);
    assert!((spacing[1] - 1.0).abs() < 1e-9);
    assert!((spacing[2] - 5.0).abs() < 1e-9);
    assert_eq!(vol.origin(), Point3::new(0.0, 0.0, 0.0));

    // Voxel (col i, row j, slice k) holds k*12 + j*4 + i
    common::assert_close(vol.data()[(0, 0, 0)], 0.0, 0.05);
    common::assert_close(vol.data()[(3, 2, 1)], 23.0, 0.05);
    common::assert_close(vol.data()[(1, 1, 2)], 29.0, 0.05);
}

#[test]
fn single_slice_volume_takes_spacing_from_slice_thickness() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::slice_series(&mut db, &study, 1);

    let vol = series::volume(&db, &s).unwrap();
    assert_eq!(vol.shape(), (4, 3, 1));
    // No second slice to measure against, so SliceThickness sets the z step
    let spacing = vol.spacing();
    assert!((spacing[2] - 1.0).abs() < 1e-9);
    common::assert_close(vol.data()[(3, 2, 0)], 11.0, 0.05);
}

#[test]
fn strict_geometry_rejects_non_uniform_slice_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let coords = Coords(vec![("SliceLocation".to_string(), vec![0.0, 5.0, 20.0])]);
    let array = ndarray::ArrayD::zeros(ndarray::IxDyn(&[3, 3, 4]));
    let s = series::from_array(&mut db, &study, "uneven", &array, &coords).unwrap();

    // The default configuration only warns
    assert!(series::volume(&db, &s).is_ok());
    db.close().unwrap();

    let strict = DataBaseDicom::open_with_config(
        dir.path(),
        DbConfig {
            strict_geometry: true,
            ..DbConfig::default()
        },
    )
    .unwrap();
    let s = strict.series(&study, &Filter::equals("uneven")).remove(0);
    match series::volume(&strict, &s) {
        Err(Error::Geometry(message)) => assert!(message.contains("slice spacing")),
        other => panic!("expected a geometry error, got {other:?}"),
    }
}

#[test]
fn volumes_partition_by_non_spatial_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::grid_series(&mut db, &study, &[0.0, 5.0], &[15.0, 30.0]);

    let parts = series::volumes(&db, &s, &["FlipAngle"]).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].0, vec![("FlipAngle".to_string(), 15.0)]);
    assert_eq!(parts[1].0, vec![("FlipAngle".to_string(), 30.0)]);
    for (_, vol) in &parts {
        assert_eq!(vol.shape(), (4, 3, 2));
    }
    // Values encode the angle index in the hundreds digit
    common::assert_close(parts[0].1.data()[(0, 0, 0)], 0.0, 0.05);
    common::assert_close(parts[1].1.data()[(0, 0, 0)], 100.0, 0.05);
}

#[test]
fn write_volume_round_trips_through_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");

    let mut affine = Matrix4::identity();
    affine[(0, 0)] = 2.0;
    affine[(1, 1)] = 2.0;
    affine[(2, 2)] = 3.0;
    affine[(0, 3)] = -10.0;
    let mut vol = Volume3D::zeros((5, 4, 3), affine).unwrap();
    for (i, v) in vol.data_mut().iter_mut().enumerate() {
        *v = i as f32;
    }

    let written = series::write_volume(&mut db, &vol, &study, "written volume").unwrap();
    assert_eq!(db.summary().instances, 3);

    let read = series::volume(&db, &written).unwrap();
    assert_eq!(read.shape(), (5, 4, 3));
    let spacing = read.spacing();
    assert!((spacing[0] - 2.0).abs() < 1e-6);
    assert!((spacing[2] - 3.0).abs() < 1e-6);
    assert_eq!(read.origin(), Point3::new(-10.0, 0.0, 0.0));
    for (a, b) in read.data().iter().zip(vol.data().iter()) {
        common::assert_close(*a, *b, 0.01);
    }
}

#[test]
fn zeros_creates_an_empty_grid_series() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let coords = dicomdb::Coords(vec![("SliceLocation".to_string(), vec![0.0, 2.0, 4.0])]);

    let s = series::zeros(&mut db, &study, "empty", 8, 8, &coords).unwrap();
    let (array, read_coords) = series::pixel_data(&db, &s, &["SliceLocation"]).unwrap();
    assert_eq!(array.shape(), &[3, 8, 8]);
    assert_eq!(read_coords.values("SliceLocation").unwrap(), &[0.0, 2.0, 4.0]);
    assert!(array.iter().all(|v| *v == 0.0));
}

#[test]
fn dro_volume_survives_rotation_and_projection() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "phantom");

    let phantom = dro::ellipsoid(10.0, 14.0, 6.0, [2.0, 2.0, 2.0], false).unwrap();
    let s = series::write_volume(&mut db, &phantom, &study, "ellipsoid").unwrap();
    let vol = series::volume(&db, &s).unwrap();

    let turned = rotate(
        &vol,
        [0.0, 0.0, std::f64::consts::FRAC_PI_2],
        None,
        true,
        Interpolation::Linear,
        Boundary::Constant(0.0),
    )
    .unwrap();
    assert!(turned.data().iter().any(|v| *v > 0.5));

    let mip = maximum_intensity_projection(&vol, 2).unwrap();
    let (nx, ny, nz) = mip.shape();
    assert_eq!(nz, 1);
    assert_eq!((nx, ny), (vol.shape().0, vol.shape().1));
    common::assert_close(
        mip.data()[(nx / 2, ny / 2, 0)],
        1.0,
        0.01,
    );
}
