use serde::Deserialize;
use std::path::PathBuf;

fn default_root() -> PathBuf {
    std::env::temp_dir().join("dicom_importer")
}

/// Where jobs create their working directories
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}
