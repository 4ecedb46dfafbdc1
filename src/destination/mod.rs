//! Destination backends.
//!
//! A job delivers its staged objects to exactly one destination, chosen by
//! the variant of [`DestinationConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use dimse::Connector;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::error::TransferError;
use crate::models::{ObjectOutcome, StagedObject};
use crate::progress::ProgressSink;

pub mod folder;
pub mod pacs;

pub use folder::FolderBackend;
pub use pacs::{PacsBackend, PacsConfig};

/// Where a job delivers its objects; fixed once the job starts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationConfig {
    Folder { path: PathBuf },
    Pacs(PacsConfig),
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DestinationConfig::Folder { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "destination.path",
                    });
                }
                Ok(())
            }
            DestinationConfig::Pacs(pacs) => pacs.validate(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DestinationConfig::Folder { path } => format!("folder {}", path.display()),
            DestinationConfig::Pacs(pacs) => format!("PACS {}", pacs.remote_node().describe()),
        }
    }
}

/// Result of one dispatch call
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One entry per object attempted, in sequence order
    pub outcomes: Vec<ObjectOutcome>,
    /// The loop stopped early on cancellation
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn accepted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_accepted())
            .count()
    }
}

pub enum Destination {
    Folder(FolderBackend),
    Pacs(PacsBackend),
}

impl Destination {
    /// Build the backend for `config`.
    ///
    /// PACS destinations use `connector` when given, the native client otherwise.
    pub fn from_config(config: &DestinationConfig, connector: Option<Arc<dyn Connector>>) -> Self {
        match config {
            DestinationConfig::Folder { path } => Destination::Folder(FolderBackend::new(path)),
            DestinationConfig::Pacs(pacs) => {
                let connector = connector.unwrap_or_else(|| pacs.connector());
                Destination::Pacs(PacsBackend::new(pacs.clone(), connector))
            }
        }
    }

    /// Deliver `objects` in ascending sequence order.
    ///
    /// Per-object failures are recorded as outcomes; an error means the
    /// destination as a whole was unusable.
    pub async fn dispatch(
        &self,
        objects: &[StagedObject],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, TransferError> {
        match self {
            Destination::Folder(backend) => backend.dispatch(objects, sink, cancel).await,
            Destination::Pacs(backend) => backend.dispatch(objects, sink, cancel).await,
        }
    }
}

/// Staged objects in the order they are delivered
pub(crate) fn in_sequence_order(objects: &[StagedObject]) -> Vec<&StagedObject> {
    let mut ordered: Vec<&StagedObject> = objects.iter().collect();
    ordered.sort_by_key(|object| object.sequence);
    ordered
}

pub(crate) fn file_label(object: &StagedObject) -> Option<String> {
    object
        .source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
