//! The coordinate-indexed array view: pixel_data, values and the grid
//! invariants.

#[path = "../common/mod.rs"]
mod common;

use dicomdb::{series, Entity, Error, ValueArray};

#[test]
fn pixel_data_sorts_along_named_dimensions() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::grid_series(&mut db, &study, &[0.0, 5.0, 10.0], &[15.0, 30.0]);

    let (array, coords) =
        series::pixel_data(&db, &s, &["SliceLocation", "FlipAngle"]).unwrap();
    assert_eq!(array.shape(), &[3, 2, 3, 4]);
    assert_eq!(coords.names(), vec!["SliceLocation", "FlipAngle"]);
    assert_eq!(coords.values("SliceLocation").unwrap(), &[0.0, 5.0, 10.0]);
    assert_eq!(coords.values("FlipAngle").unwrap(), &[15.0, 30.0]);

    // Voxel values encode (location index, angle index, row, col)
    common::assert_close(array[[0, 0, 0, 0]], 0.0, 0.05);
    common::assert_close(array[[2, 1, 0, 0]], 2100.0, 0.05);
    common::assert_close(array[[1, 0, 2, 3]], 1011.0, 0.05);
}

#[test]
fn pixel_data_defaults_to_instance_number() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::slice_series(&mut db, &study, 4);

    let (array, coords) = series::pixel_data(&db, &s, &[]).unwrap();
    assert_eq!(array.shape(), &[4, 3, 4]);
    assert_eq!(coords.names(), vec!["InstanceNumber"]);
    assert_eq!(coords.values("InstanceNumber").unwrap(), &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn incomplete_grid_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::grid_series(&mut db, &study, &[0.0, 5.0], &[15.0, 30.0]);

    // Knock one frame out of the 2x2 grid
    let mut files = db.files(&Entity::Series(s.clone()));
    files.sort();
    db.close().unwrap();
    std::fs::remove_file(&files[0]).unwrap();

    let db = dicomdb::open(dir.path()).unwrap();
    let result = series::pixel_data(&db, &s, &["SliceLocation", "FlipAngle"]);
    assert!(matches!(
        result,
        Err(Error::IncompleteGrid {
            expected: 4,
            actual: 3
        })
    ));
}

#[test]
fn missing_dimension_attribute_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::slice_series(&mut db, &study, 2);

    // The fixture carries no EchoTime
    let result = series::pixel_data(&db, &s, &["EchoTime"]);
    match result {
        Err(Error::MissingAttribute { attribute, .. }) => assert_eq!(attribute, "EchoTime"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn values_lays_attributes_on_the_grid() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let s = common::grid_series(&mut db, &study, &[0.0, 5.0], &[15.0, 30.0]);

    let values = series::values(
        &db,
        &s,
        &["FlipAngle", "Modality"],
        &["SliceLocation", "FlipAngle"],
    )
    .unwrap();

    match &values["FlipAngle"] {
        ValueArray::Numeric(grid) => {
            assert_eq!(grid.shape(), &[2, 2]);
            assert_eq!(grid[[0, 0]], 15.0);
            assert_eq!(grid[[1, 1]], 30.0);
        }
        other => panic!("expected numeric grid, got {other:?}"),
    }
    match &values["Modality"] {
        ValueArray::Text(grid) => {
            assert_eq!(grid.shape(), &[2, 2]);
            assert!(grid.iter().all(|m| m == "MR"));
        }
        other => panic!("expected text grid, got {other:?}"),
    }
}
