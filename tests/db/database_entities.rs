//! Entity queries and file operations: filters, copy, move, delete, split
//! and unique values.

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeSet;

use dicomdb::{Entity, Filter};

#[test]
fn filters_select_entities_by_label() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study_a = common::study("P1", "Doe^Jane", "baseline");
    let study_b = common::study("P2", "Roe^Richard", "followup");
    common::slice_series(&mut db, &study_a, 2);
    common::slice_series(&mut db, &study_b, 2);

    assert_eq!(db.patients(&Filter::any()).len(), 2);
    assert_eq!(db.patients(&Filter::equals("Doe^Jane")).len(), 1);
    assert_eq!(db.patients(&Filter::contains("Roe")).len(), 1);
    assert_eq!(
        db.patients(&Filter::is_in(["Doe^Jane", "Roe^Richard"])).len(),
        2
    );
    assert!(db.patients(&Filter::equals("Nobody")).is_empty());

    let patient = db.patients(&Filter::equals("Doe^Jane")).remove(0);
    let studies = db.studies(&patient, &Filter::contains("base"));
    assert_eq!(studies.len(), 1);
    let series = db.series(&studies[0], &Filter::any());
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].description, "synthetic slices");
}

#[test]
fn files_back_every_entity_level() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::slice_series(&mut db, &study, 3);

    let patient = db.patients(&Filter::any()).remove(0);
    assert_eq!(db.files(&Entity::Patient(patient)).len(), 3);
    assert_eq!(db.files(&Entity::Study(study)).len(), 3);
    let files = db.files(&Entity::Series(series));
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|f| f.exists()));
}

#[test]
fn copy_reidentifies_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let source_study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::slice_series(&mut db, &source_study, 3);
    let target_study = common::study("P2", "Roe^Richard", "copy target");

    let copied = db.copy_series(&series, &target_study).unwrap();
    assert_ne!(copied.uid, series.uid);
    assert!(copied.uid.starts_with("2.25."));
    assert_eq!(db.summary().instances, 6);
    assert_eq!(db.patients(&Filter::any()).len(), 2);

    // SOP instance UIDs stay unique across the copy
    let patient = db.patients(&Filter::equals("Roe^Richard")).remove(0);
    let unique = db
        .unique(&["SOPInstanceUID"], &Entity::Patient(patient))
        .unwrap();
    assert_eq!(unique["SOPInstanceUID"].len(), 3);
    let all: BTreeSet<String> = db
        .unique(
            &["SOPInstanceUID"],
            &Entity::Study(source_study),
        )
        .unwrap()["SOPInstanceUID"]
        .iter()
        .chain(unique["SOPInstanceUID"].iter())
        .cloned()
        .collect();
    assert_eq!(all.len(), 6);
}

#[test]
fn move_deletes_the_source_series() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let source_study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::slice_series(&mut db, &source_study, 2);
    let target_study = common::study("P1", "Doe^Jane", "followup");

    let moved = db.move_series(&series, &target_study).unwrap();
    assert_eq!(db.summary().instances, 2);
    assert!(db.files(&Entity::Series(series)).is_empty());
    assert_eq!(db.files(&Entity::Series(moved)).len(), 2);
}

#[test]
fn delete_removes_files_and_register_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::slice_series(&mut db, &study, 2);
    let files = db.files(&Entity::Series(series.clone()));

    db.delete(&Entity::Series(series.clone())).unwrap();
    assert!(files.iter().all(|f| !f.exists()));
    assert_eq!(db.summary().instances, 0);
    assert!(db.delete(&Entity::Series(series)).is_err());
}

#[test]
fn split_series_partitions_by_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::grid_series(&mut db, &study, &[0.0, 5.0], &[15.0, 30.0]);

    let parts = db.split_series(&series, "FlipAngle").unwrap();
    assert_eq!(parts.len(), 2);
    let all_series = db.series(&study, &Filter::any());
    assert_eq!(all_series.len(), 2);
    for (value, split) in &parts {
        assert!(split.description.contains(&format!("FlipAngle={value}")));
        assert_eq!(db.files(&Entity::Series(split.clone())).len(), 2);
    }
    // The original series UID no longer exists
    assert!(!all_series.iter().any(|s| s.uid == series.uid));
}

#[test]
fn copy_study_and_patient_reidentify_the_hierarchy() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    common::slice_series(&mut db, &study, 2);
    common::grid_series(&mut db, &study, &[0.0], &[15.0, 30.0]);

    let target = dicomdb::Patient {
        id: "P2".to_string(),
        name: "Roe^Richard".to_string(),
    };
    let copied_study = db.copy_study(&study, &target).unwrap();
    assert_ne!(copied_study.uid, study.uid);
    assert_eq!(db.summary().instances, 8);
    let target_patient = db.patients(&Filter::equals("Roe^Richard")).remove(0);
    assert_eq!(db.series(&copied_study, &Filter::any()).len(), 2);
    assert_eq!(db.studies(&target_patient, &Filter::any()).len(), 1);

    let source_patient = db.patients(&Filter::equals("Doe^Jane")).remove(0);
    let copied_patient = db
        .copy_patient(&source_patient, "P3", "Poe^Edgar")
        .unwrap();
    assert_eq!(copied_patient.id, "P3");
    assert_eq!(db.summary().instances, 12);
    let studies = db.studies(&copied_patient, &Filter::any());
    assert_eq!(studies.len(), 1);
    assert_eq!(db.series(&studies[0], &Filter::any()).len(), 2);
}

#[test]
fn unique_reads_arbitrary_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = dicomdb::open(dir.path()).unwrap();
    let study = common::study("P1", "Doe^Jane", "baseline");
    let series = common::grid_series(&mut db, &study, &[0.0], &[15.0, 30.0]);

    let unique = db
        .unique(&["Modality", "FlipAngle"], &Entity::Series(series))
        .unwrap();
    assert_eq!(unique["Modality"], vec!["MR".to_string()]);
    assert_eq!(unique["FlipAngle"].len(), 2);
}
