use serde::Deserialize;

fn default_log_file_path() -> String {
    "dicom_importer.log".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_to_file: false,
            log_file_path: default_log_file_path(),
            level: default_level(),
        }
    }
}
