use std::path::PathBuf;
use std::time::Duration;

use dimse::DimseError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Failures that end a phase of a transfer job.
///
/// Problems with a single object never show up here; they become a
/// [`TransferOutcome`](crate::models::TransferOutcome) instead.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source '{}' does not exist or is not a directory", .0.display())]
    SourceMissing(PathBuf),

    #[error("destination '{}' cannot be created: {source}", path.display())]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staging area error: {0}")]
    Staging(#[from] StorageError),

    #[error("association with {peer} failed: {source}")]
    Association {
        peer: String,
        #[source]
        source: DimseError,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("'{}' is not a readable DICOM object: {reason}", path.display())]
    InvalidObject { path: PathBuf, reason: String },

    #[error("background task failed: {0}")]
    Worker(String),
}

impl TransferError {
    /// Errors a later retry with the same inputs might get past
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Timeout { .. } => true,
            TransferError::Association { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransferError::Worker(err.to_string())
    }
}
