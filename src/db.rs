//! The folder database: entity queries, copy/move/delete and split
//! operations over a register of DICOM files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dicom_core::value::PrimitiveValue;
use dicom_core::VR;
use dicom_dictionary_std::tags;
use dicom_object::open_file;
use serde::Serialize;

use crate::config::DbConfig;
use crate::error::{Error, Result};
use crate::index::{read_entry, FrameEntry, Register};
use crate::write::{new_uid, rewrite_attributes, write_reidentified};

/// Reference to a patient in a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub id: String,
    pub name: String,
}

/// Reference to a study in a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Study {
    pub patient: Patient,
    pub uid: String,
    pub description: String,
    pub date: Option<String>,
}

/// Reference to a series in a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub study: Study,
    pub uid: String,
    pub description: String,
    pub number: Option<i64>,
}

/// Any level of the patient/study/series hierarchy, for operations that
/// work on all of them.
#[derive(Debug, Clone)]
pub enum Entity {
    Patient(Patient),
    Study(Study),
    Series(Series),
}

impl Entity {
    fn matches(&self, entry: &FrameEntry) -> bool {
        match self {
            Entity::Patient(p) => entry.patient_id == p.id,
            Entity::Study(s) => entry.study_uid == s.uid,
            Entity::Series(s) => entry.series_uid == s.uid,
        }
    }
}

/// Label filter for entity queries. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    equals: Option<String>,
    contains: Option<String>,
    is_in: Vec<String>,
}

impl Filter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn equals(label: impl Into<String>) -> Self {
        Self {
            equals: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn contains(fragment: impl Into<String>) -> Self {
        Self {
            contains: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn is_in(labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            is_in: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    fn matches(&self, label: &str) -> bool {
        if let Some(wanted) = &self.equals {
            if label != wanted {
                return false;
            }
        }
        if let Some(fragment) = &self.contains {
            if !label.contains(fragment.as_str()) {
                return false;
            }
        }
        if !self.is_in.is_empty() && !self.is_in.iter().any(|l| l == label) {
            return false;
        }
        true
    }
}

/// Instance counts per hierarchy level.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub patients: usize,
    pub studies: usize,
    pub series: usize,
    pub instances: usize,
}

/// An open DICOM folder database.
pub struct DataBaseDicom {
    path: PathBuf,
    register: Register,
    config: DbConfig,
}

impl DataBaseDicom {
    /// Open a folder as a database, reusing the persisted register when it
    /// is still current.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, DbConfig::default())
    }

    /// Open with explicit configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: DbConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        if !path.is_dir() {
            return Err(Error::config(format!(
                "{} is not a folder",
                path.display()
            )));
        }
        let register = match Register::load(&path, &config) {
            Some(register) => register,
            None => {
                let register = Register::scan(&path, &config)?;
                register.save(&path, &config)?;
                register
            }
        };
        Ok(Self {
            path,
            register,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn config(&self) -> &DbConfig {
        &self.config
    }

    pub(crate) fn register(&self) -> &Register {
        &self.register
    }

    /// Persist the register to the index file.
    pub fn save(&self) -> Result<()> {
        self.register.save(&self.path, &self.config)
    }

    /// Persist and drop the handle.
    pub fn close(self) -> Result<()> {
        self.save()
    }

    /// Print the patient/study/series hierarchy to stdout.
    pub fn print(&self) {
        println!("{self}");
    }

    pub fn summary(&self) -> Summary {
        let patients = self.patients(&Filter::any()).len();
        let mut studies = 0;
        let mut series = 0;
        for patient in self.patients(&Filter::any()) {
            let patient_studies = self.studies(&patient, &Filter::any());
            studies += patient_studies.len();
            for study in &patient_studies {
                series += self.series(study, &Filter::any()).len();
            }
        }
        Summary {
            patients,
            studies,
            series,
            instances: self.register.len(),
        }
    }

    /// Nested JSON view of the hierarchy.
    pub fn tree(&self) -> serde_json::Value {
        let mut patients = Vec::new();
        for patient in self.patients(&Filter::any()) {
            let mut studies = Vec::new();
            for study in self.studies(&patient, &Filter::any()) {
                let mut series_list = Vec::new();
                for series in self.series(&study, &Filter::any()) {
                    series_list.push(serde_json::json!({
                        "uid": series.uid,
                        "description": series.description,
                        "number": series.number,
                        "instances": self.frames(&series).len(),
                    }));
                }
                studies.push(serde_json::json!({
                    "uid": study.uid,
                    "description": study.description,
                    "date": study.date,
                    "series": series_list,
                }));
            }
            patients.push(serde_json::json!({
                "id": patient.id,
                "name": patient.name,
                "studies": studies,
            }));
        }
        serde_json::json!({
            "folder": self.path.display().to_string(),
            "patients": patients,
        })
    }

    /// Patients whose name (or ID, if the name is empty) passes the filter.
    pub fn patients(&self, filter: &Filter) -> Vec<Patient> {
        let mut out: Vec<Patient> = Vec::new();
        for entry in &self.register.entries {
            if out.iter().any(|p| p.id == entry.patient_id) {
                continue;
            }
            let label = if entry.patient_name.is_empty() {
                &entry.patient_id
            } else {
                &entry.patient_name
            };
            if filter.matches(label) {
                out.push(Patient {
                    id: entry.patient_id.clone(),
                    name: entry.patient_name.clone(),
                });
            }
        }
        out
    }

    /// Studies of a patient whose description passes the filter.
    pub fn studies(&self, patient: &Patient, filter: &Filter) -> Vec<Study> {
        let mut out: Vec<Study> = Vec::new();
        for entry in &self.register.entries {
            if entry.patient_id != patient.id {
                continue;
            }
            if out.iter().any(|s| s.uid == entry.study_uid) {
                continue;
            }
            if filter.matches(&entry.study_description) {
                out.push(Study {
                    patient: patient.clone(),
                    uid: entry.study_uid.clone(),
                    description: entry.study_description.clone(),
                    date: entry.study_date.clone(),
                });
            }
        }
        out
    }

    /// Series of a study whose description passes the filter.
    pub fn series(&self, study: &Study, filter: &Filter) -> Vec<Series> {
        let mut out: Vec<Series> = Vec::new();
        for entry in &self.register.entries {
            if entry.study_uid != study.uid {
                continue;
            }
            if out.iter().any(|s| s.uid == entry.series_uid) {
                continue;
            }
            if filter.matches(&entry.series_description) {
                out.push(Series {
                    study: study.clone(),
                    uid: entry.series_uid.clone(),
                    description: entry.series_description.clone(),
                    number: entry.series_number,
                });
            }
        }
        out.sort_by_key(|s| s.number);
        out
    }

    /// All series in the database whose description passes the filter.
    pub fn all_series(&self, filter: &Filter) -> Vec<Series> {
        let mut out = Vec::new();
        for patient in self.patients(&Filter::any()) {
            for study in self.studies(&patient, &Filter::any()) {
                out.extend(self.series(&study, filter));
            }
        }
        out
    }

    pub(crate) fn frames(&self, series: &Series) -> Vec<&FrameEntry> {
        self.register
            .entries
            .iter()
            .filter(|e| e.series_uid == series.uid)
            .collect()
    }

    /// Absolute paths of the files backing an entity.
    pub fn files(&self, entity: &Entity) -> Vec<PathBuf> {
        self.register
            .entries
            .iter()
            .filter(|e| entity.matches(e))
            .map(|e| self.path.join(&e.path))
            .collect()
    }

    /// Delete an entity's files and drop them from the register.
    pub fn delete(&mut self, entity: &Entity) -> Result<()> {
        let files = self.files(entity);
        if files.is_empty() {
            return Err(Error::not_found("entity has no instances".to_string()));
        }
        for file in &files {
            std::fs::remove_file(file)?;
        }
        self.register
            .entries
            .retain(|e| !entity.matches(e));
        tracing::info!(files = files.len(), "deleted entity");
        self.save()
    }

    /// Copy a series into a study, re-identifying every instance with
    /// fresh UIDs. Returns the new series.
    pub fn copy_series(&mut self, series: &Series, target: &Study) -> Result<Series> {
        let frames: Vec<FrameEntry> = self
            .frames(series)
            .into_iter()
            .cloned()
            .collect();
        if frames.is_empty() {
            return Err(Error::not_found(format!(
                "series {} has no instances",
                series.uid
            )));
        }
        let new_series_uid = new_uid();
        for entry in &frames {
            self.reidentify_one(
                entry,
                &target.patient.id,
                &target.patient.name,
                &target.uid,
                &new_series_uid,
            )?;
        }
        self.save()?;
        tracing::info!(
            source = %series.uid,
            target = %new_series_uid,
            instances = frames.len(),
            "copied series"
        );
        Ok(Series {
            study: target.clone(),
            uid: new_series_uid,
            description: series.description.clone(),
            number: series.number,
        })
    }

    /// Move a series into a study: copy with fresh UIDs, then delete the
    /// source.
    pub fn move_series(&mut self, series: &Series, target: &Study) -> Result<Series> {
        let copied = self.copy_series(series, target)?;
        self.delete(&Entity::Series(series.clone()))?;
        Ok(copied)
    }

    /// Copy a study to a patient: every series gets a fresh series UID
    /// under one fresh study UID, and every instance a fresh SOP UID.
    pub fn copy_study(&mut self, study: &Study, target: &Patient) -> Result<Study> {
        let frames: Vec<FrameEntry> = self
            .register
            .entries
            .iter()
            .filter(|e| e.study_uid == study.uid)
            .cloned()
            .collect();
        if frames.is_empty() {
            return Err(Error::not_found(format!(
                "study {} has no instances",
                study.uid
            )));
        }
        let new_study_uid = new_uid();
        let mut series_uids: BTreeMap<String, String> = BTreeMap::new();
        for entry in &frames {
            let series_uid = series_uids
                .entry(entry.series_uid.clone())
                .or_insert_with(new_uid)
                .clone();
            self.reidentify_one(entry, &target.id, &target.name, &new_study_uid, &series_uid)?;
        }
        self.save()?;
        tracing::info!(
            source = %study.uid,
            target = %new_study_uid,
            series = series_uids.len(),
            "copied study"
        );
        Ok(Study {
            patient: target.clone(),
            uid: new_study_uid,
            description: study.description.clone(),
            date: study.date.clone(),
        })
    }

    /// Move a study to a patient: copy with fresh UIDs, then delete the
    /// source.
    pub fn move_study(&mut self, study: &Study, target: &Patient) -> Result<Study> {
        let copied = self.copy_study(study, target)?;
        self.delete(&Entity::Study(study.clone()))?;
        Ok(copied)
    }

    /// Copy a patient under a new identity, re-identifying every study,
    /// series and instance.
    pub fn copy_patient(
        &mut self,
        patient: &Patient,
        new_id: &str,
        new_name: &str,
    ) -> Result<Patient> {
        let frames: Vec<FrameEntry> = self
            .register
            .entries
            .iter()
            .filter(|e| e.patient_id == patient.id)
            .cloned()
            .collect();
        if frames.is_empty() {
            return Err(Error::not_found(format!(
                "patient {} has no instances",
                patient.id
            )));
        }
        let mut study_uids: BTreeMap<String, String> = BTreeMap::new();
        let mut series_uids: BTreeMap<String, String> = BTreeMap::new();
        for entry in &frames {
            let study_uid = study_uids
                .entry(entry.study_uid.clone())
                .or_insert_with(new_uid)
                .clone();
            let series_uid = series_uids
                .entry(entry.series_uid.clone())
                .or_insert_with(new_uid)
                .clone();
            self.reidentify_one(entry, new_id, new_name, &study_uid, &series_uid)?;
        }
        self.save()?;
        tracing::info!(source = %patient.id, target = %new_id, "copied patient");
        Ok(Patient {
            id: new_id.to_string(),
            name: new_name.to_string(),
        })
    }

    fn reidentify_one(
        &mut self,
        entry: &FrameEntry,
        patient_id: &str,
        patient_name: &str,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<()> {
        let source_path = self.path.join(&entry.path);
        let source = open_file(&source_path)
            .map_err(|e| Error::dicom(format!("{}: {e}", source_path.display())))?;
        let sop_uid = new_uid();
        let dest = self.path.join(format!("{sop_uid}.dcm"));
        write_reidentified(
            &source,
            &dest,
            patient_id,
            patient_name,
            study_uid,
            series_uid,
            &sop_uid,
        )?;
        let new_entry = read_entry(&self.path, &dest)?;
        self.register.entries.push(new_entry);
        Ok(())
    }

    /// Split a series into sibling series, one per distinct value of the
    /// given attribute. Returns (value, new series) pairs.
    pub fn split_series(
        &mut self,
        series: &Series,
        attribute: &str,
    ) -> Result<Vec<(String, Series)>> {
        let frames: Vec<FrameEntry> = self
            .frames(series)
            .into_iter()
            .cloned()
            .collect();
        if frames.is_empty() {
            return Err(Error::not_found(format!(
                "series {} has no instances",
                series.uid
            )));
        }

        // Group file paths by the attribute value read from each file
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for entry in &frames {
            let path = self.path.join(&entry.path);
            let obj = open_file(&path)
                .map_err(|e| Error::dicom(format!("{}: {e}", path.display())))?;
            let value = obj
                .element_by_name(attribute)
                .ok()
                .and_then(|e| e.to_str().ok().map(|s| s.trim().to_string()))
                .ok_or_else(|| Error::MissingAttribute {
                    attribute: attribute.to_string(),
                    file: path.clone(),
                })?;
            groups.entry(value).or_default().push(path);
        }
        if groups.len() < 2 {
            tracing::debug!(series = %series.uid, attribute, "split found a single group");
        }

        let mut out = Vec::new();
        for (value, paths) in groups {
            let split_uid = new_uid();
            let description = format!("{}[{attribute}={value}]", series.description);
            for path in &paths {
                let source = open_file(path)
                    .map_err(|e| Error::dicom(format!("{}: {e}", path.display())))?;
                rewrite_attributes(
                    &source,
                    path,
                    vec![
                        (
                            tags::SERIES_INSTANCE_UID,
                            VR::UI,
                            PrimitiveValue::from(split_uid.as_str()),
                        ),
                        (
                            tags::SERIES_DESCRIPTION,
                            VR::LO,
                            PrimitiveValue::from(description.as_str()),
                        ),
                    ],
                )?;
                let updated = read_entry(&self.path, path)?;
                let root = self.path.clone();
                if let Some(slot) = self
                    .register
                    .entries
                    .iter_mut()
                    .find(|e| root.join(&e.path) == *path)
                {
                    *slot = updated;
                }
            }
            out.push((
                value,
                Series {
                    study: series.study.clone(),
                    uid: split_uid,
                    description,
                    number: series.number,
                },
            ));
        }
        self.save()?;
        tracing::info!(series = %series.uid, attribute, groups = out.len(), "split series");
        Ok(out)
    }

    /// Distinct values of attributes over an entity's instances, read from
    /// the files themselves so any DICOM attribute works.
    pub fn unique(
        &self,
        attributes: &[&str],
        entity: &Entity,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in self.files(entity) {
            let obj = open_file(&file)
                .map_err(|e| Error::dicom(format!("{}: {e}", file.display())))?;
            for attribute in attributes {
                if let Ok(element) = obj.element_by_name(attribute) {
                    if let Ok(value) = element.to_str() {
                        let value = value.trim().to_string();
                        let values = out.entry((*attribute).to_string()).or_default();
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
            }
        }
        for values in out.values_mut() {
            values.sort();
        }
        Ok(out)
    }

    /// Register a file that was written into the folder outside a bulk
    /// operation.
    pub(crate) fn register_file(&mut self, path: &Path) -> Result<()> {
        let entry = read_entry(&self.path, path)?;
        self.register.entries.push(entry);
        Ok(())
    }
}

impl fmt::Display for DataBaseDicom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database: {}", self.path.display())?;
        for patient in self.patients(&Filter::any()) {
            let label = if patient.name.is_empty() {
                &patient.id
            } else {
                &patient.name
            };
            writeln!(f, "  Patient {label}")?;
            for study in self.studies(&patient, &Filter::any()) {
                writeln!(f, "    Study {}", study.description)?;
                for series in self.series(&study, &Filter::any()) {
                    writeln!(
                        f,
                        "      Series {} ({} instances)",
                        series.description,
                        self.frames(&series).len()
                    )?;
                }
            }
        }
        Ok(())
    }
}
