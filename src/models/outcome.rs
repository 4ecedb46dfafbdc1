use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Reason recorded when a single store call exceeds its time budget
pub const TIMEOUT_REASON: &str = "timeout";

/// What happened to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum TransferOutcome {
    Accepted,
    Rejected(String),
    Skipped(String),
}

impl TransferOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TransferOutcome::Accepted)
    }

    pub fn timeout() -> Self {
        TransferOutcome::Rejected(TIMEOUT_REASON.to_string())
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Accepted => write!(f, "accepted"),
            TransferOutcome::Rejected(reason) => write!(f, "rejected: {}", reason),
            TransferOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// An outcome tied to the object it concerns
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOutcome {
    /// Staging sequence, absent for files that never made it into staging
    pub sequence: Option<u32>,
    pub source: PathBuf,
    pub outcome: TransferOutcome,
}
