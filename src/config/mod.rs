mod logging_config;
mod staging_config;
pub mod config;

pub use config::{Config, ConfigError};
pub use logging_config::LoggingConfig;
pub use staging_config::StagingConfig;
