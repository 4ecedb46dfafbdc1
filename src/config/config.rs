use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{LoggingConfig, StagingConfig};
use crate::destination::PacsConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must not be empty")]
    MissingField { field: &'static str },

    #[error("{field} '{value}' exceeds {max} characters")]
    TooLong {
        field: &'static str,
        value: String,
        max: usize,
    },

    #[error("port '{0}' is not a number between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Application configuration, loaded from an optional TOML file.
///
/// Every section has defaults so an empty file is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub pacs: PacsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staging.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "staging.root",
            });
        }
        if self.logging.log_to_file && self.logging.log_file_path.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "logging.log_file_path",
            });
        }
        self.pacs.validate()
    }
}
