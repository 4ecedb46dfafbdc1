use serde::Serialize;
use std::path::PathBuf;

/// A regular file discovered while walking a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// A validated object copied into a job's working directory.
///
/// `sequence` is assigned at staging time; it is unique and strictly
/// increasing within one staging run and names both the staged and the
/// exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedObject {
    pub source: PathBuf,
    pub staged_path: PathBuf,
    pub sequence: u32,
    pub size: u64,
}

/// `object_000042.dcm`
pub fn staged_file_name(sequence: u32) -> String {
    format!("object_{:06}.dcm", sequence)
}

/// `export_000042.dcm`
pub fn export_file_name(sequence: u32) -> String {
    format!("export_{:06}.dcm", sequence)
}
