//! DIMSE (DICOM Message Service Element) client
//!
//! Outbound association handling for moving objects to a PACS:
//! association negotiation, C-STORE and C-ECHO.
//!
//! The pipeline programs against the [`Connector`] / [`Association`] traits;
//! [`DimseScu`] implements them natively on top of `dicom-ul`.

mod association;
pub mod command;
pub mod config;
pub mod error;
pub mod scu;
pub mod types;

// Re-export commonly used types
pub use config::{RemoteNode, ScuConfig};
pub use error::{DimseError, Result};
pub use scu::{Association, Connector, DimseScu, ScuBuilder};
pub use types::{
    AcceptedContext, AssociationRequest, DimseStatus, PresentationContext, StoreRequest,
};

/// Default DICOM port (non-TLS)
pub const DEFAULT_DIMSE_PORT: u16 = 11112;

/// AE title this client presents unless configured otherwise
pub const DEFAULT_LOCAL_AET: &str = "DICOM_IMPORTER";
