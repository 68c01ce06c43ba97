//! Opening folders: scanning, register persistence and staleness.

#[path = "../common/mod.rs"]
mod common;

use dicomdb::{DataBaseDicom, Entity, Filter};

#[test]
fn empty_folder_opens_with_zero_instances() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dicomdb::open(dir.path()).unwrap();
    let summary = db.summary();
    assert_eq!(summary.patients, 0);
    assert_eq!(summary.instances, 0);
}

#[test]
fn non_dicom_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not dicom").unwrap();
    let db = dicomdb::open(dir.path()).unwrap();
    assert_eq!(db.summary().instances, 0);
}

#[test]
fn register_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    common::slice_series(&mut db, &study, 3);
    db.close().unwrap();

    assert!(dir.path().join("dicomdb.json").exists());
    let reopened = dicomdb::open(dir.path()).unwrap();
    let summary = reopened.summary();
    assert_eq!(summary.patients, 1);
    assert_eq!(summary.series, 1);
    assert_eq!(summary.instances, 3);
}

#[test]
fn stale_register_triggers_a_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::slice_series(&mut db, &study, 3);
    let mut files = db.files(&Entity::Series(series));
    db.close().unwrap();

    // Remove one file behind the database's back
    files.sort();
    std::fs::remove_file(&files[0]).unwrap();

    let reopened = dicomdb::open(dir.path()).unwrap();
    assert_eq!(reopened.summary().instances, 2);
}

#[test]
fn custom_index_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let config = dicomdb::DbConfig {
        index_file: "register.json".to_string(),
        ..Default::default()
    };
    let db = DataBaseDicom::open_with_config(dir.path(), config).unwrap();
    db.save().unwrap();
    assert!(dir.path().join("register.json").exists());
    assert!(!dir.path().join("dicomdb.json").exists());
}

#[test]
fn print_and_tree_cover_the_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    common::slice_series(&mut db, &study, 2);

    let listing = format!("{db}");
    assert!(listing.contains("Doe^Jane"));
    assert!(listing.contains("synthetic slices"));

    let tree = db.tree();
    let patients = tree["patients"].as_array().unwrap();
    assert_eq!(patients.len(), 1);
    let series = patients[0]["studies"][0]["series"].as_array().unwrap();
    assert_eq!(series[0]["instances"], 2);

    assert_eq!(db.patients(&Filter::any()).len(), 1);
}
