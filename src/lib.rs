pub mod config;
pub mod destination;
pub mod error;
pub mod info;
pub mod job;
pub mod models;
pub mod probe;
pub mod progress;
pub mod stager;
pub mod storage;
pub mod validator;

use std::sync::Mutex;

use tracing_subscriber::{self, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

pub use destination::{Destination, DestinationConfig, PacsConfig};
pub use error::TransferError;
pub use job::{JobHandle, JobResult, JobState, TransferJob};
pub use models::{ObjectOutcome, StagedObject, TransferOutcome};
pub use probe::Prober;
pub use progress::{ProgressEvent, ProgressSink};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. With `log_to_file` set,
/// events go to stdout and to the log file.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    if config.log_to_file {
        let file = std::fs::File::create(&config.log_file_path)?;
        let file_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter());

        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter());

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stdout_layer)
            .try_init()?;
    } else {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter());

        tracing_subscriber::registry().with(stdout_layer).try_init()?;
    }
    Ok(())
}
