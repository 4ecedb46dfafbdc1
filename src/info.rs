//! Header summary of a single object, for the `info` command.

use std::fmt;
use std::path::Path;

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, OpenFileOptions};
use serde::Serialize;

use crate::error::TransferError;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectSummary {
    pub patient_name: String,
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    pub study_date: String,
    pub study_description: String,
    pub modality: String,
    pub series_description: String,
    pub rows: String,
    pub columns: String,
    #[serde(rename = "SOPClassUID")]
    pub sop_class_uid: String,
    pub transfer_syntax: String,
}

impl ObjectSummary {
    /// Read the header of `path`; pixel data is not loaded
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| TransferError::InvalidObject {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_object(&object))
    }

    fn from_object(object: &DefaultDicomObject) -> Self {
        let sop_class_uid = match text(object, tags::SOP_CLASS_UID) {
            value if value == UNKNOWN => or_unknown(object.meta().media_storage_sop_class_uid()),
            value => value,
        };
        Self {
            patient_name: text(object, tags::PATIENT_NAME),
            patient_id: text(object, tags::PATIENT_ID),
            study_date: text(object, tags::STUDY_DATE),
            study_description: text(object, tags::STUDY_DESCRIPTION),
            modality: text(object, tags::MODALITY),
            series_description: text(object, tags::SERIES_DESCRIPTION),
            rows: text(object, tags::ROWS),
            columns: text(object, tags::COLUMNS),
            sop_class_uid,
            transfer_syntax: or_unknown(object.meta().transfer_syntax()),
        }
    }
}

fn text(object: &DefaultDicomObject, tag: Tag) -> String {
    object
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|value| or_unknown(&value))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn or_unknown(value: &str) -> String {
    let value = value.trim_end_matches(|c: char| c == '\0' || c == ' ');
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

impl fmt::Display for ObjectSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Patient Name", &self.patient_name),
            ("Patient ID", &self.patient_id),
            ("Study Date", &self.study_date),
            ("Study Description", &self.study_description),
            ("Modality", &self.modality),
            ("Series Description", &self.series_description),
            ("Rows", &self.rows),
            ("Columns", &self.columns),
            ("SOP Class UID", &self.sop_class_uid),
            ("Transfer Syntax", &self.transfer_syntax),
        ];
        for (label, value) in rows {
            writeln!(f, "{:<20} {}", format!("{}:", label), value)?;
        }
        Ok(())
    }
}
