//! Common types for DIMSE operations

use dicom_dictionary_std::{tags, uids};
use dicom_object::OpenFileOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::RemoteNode;
use crate::{DimseError, Result};

/// Maximum number of presentation contexts one association may propose
pub const MAX_PRESENTATION_CONTEXTS: usize = 128;

/// DIMSE operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    Pending(u16),
    /// Operation cancelled
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

impl DimseStatus {
    /// Classify a raw status code (PS3.7 Annex C)
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => DimseStatus::Success,
            0x0001 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            0xFE00 => DimseStatus::Cancel,
            0xFF00 | 0xFF01 => DimseStatus::Pending(code),
            _ => DimseStatus::Failure(code),
        }
    }

    /// The raw status code
    pub fn code(&self) -> u16 {
        match *self {
            DimseStatus::Success => 0x0000,
            DimseStatus::Cancel => 0xFE00,
            DimseStatus::Pending(code) | DimseStatus::Failure(code) | DimseStatus::Warning(code) => {
                code
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DimseStatus::Success)
    }
}

impl fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimseStatus::Success => write!(f, "success (0x0000)"),
            DimseStatus::Pending(code) => write!(f, "pending (0x{:04X})", code),
            DimseStatus::Cancel => write!(f, "cancel (0xFE00)"),
            DimseStatus::Failure(code) => write!(f, "failure (0x{:04X})", code),
            DimseStatus::Warning(code) => write!(f, "warning (0x{:04X})", code),
        }
    }
}

/// A presentation context proposed during association negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationContext {
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

impl PresentationContext {
    /// Verification SOP class, used for C-ECHO
    pub fn verification() -> Self {
        Self {
            abstract_syntax: uids::VERIFICATION.to_string(),
            transfer_syntaxes: vec![
                uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
                uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
            ],
        }
    }

    /// Context for storing objects of `sop_class_uid` encoded in `transfer_syntax`.
    ///
    /// Native little-endian syntaxes also offer the other native syntax, so the
    /// peer may pick either; anything else is offered as-is.
    pub fn for_storage(sop_class_uid: &str, transfer_syntax: &str) -> Self {
        let mut transfer_syntaxes = vec![transfer_syntax.to_string()];
        if is_native_little_endian(transfer_syntax) {
            for ts in [uids::EXPLICIT_VR_LITTLE_ENDIAN, uids::IMPLICIT_VR_LITTLE_ENDIAN] {
                if ts != transfer_syntax {
                    transfer_syntaxes.push(ts.to_string());
                }
            }
        }
        Self {
            abstract_syntax: sop_class_uid.to_string(),
            transfer_syntaxes,
        }
    }
}

/// A presentation context the peer accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
}

/// Everything needed to open an association with a remote node
#[derive(Debug, Clone)]
pub struct AssociationRequest {
    pub calling_ae_title: String,
    pub node: RemoteNode,
    pub contexts: Vec<PresentationContext>,
}

/// One object to transmit with C-STORE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    pub path: PathBuf,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax: String,
}

impl StoreRequest {
    /// Read the identifying UIDs from the file meta group of a Part 10 file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(&path)
            .map_err(|e| DimseError::DicomObject(format!("{}: {}", path.display(), e)))?;
        let meta = object.meta();

        let request = Self {
            sop_class_uid: trim_uid(meta.media_storage_sop_class_uid()),
            sop_instance_uid: trim_uid(meta.media_storage_sop_instance_uid()),
            transfer_syntax: trim_uid(meta.transfer_syntax()),
            path,
        };

        if request.sop_class_uid.is_empty() || request.sop_instance_uid.is_empty() {
            return Err(DimseError::DicomObject(format!(
                "{}: file meta group lacks SOP class or instance UID",
                request.path.display()
            )));
        }

        Ok(request)
    }
}

/// Pick the accepted context to carry `request`.
///
/// An exact transfer syntax match wins; otherwise a native little-endian object
/// may travel in the other native syntax.
pub fn select_context<'a>(
    accepted: &'a [AcceptedContext],
    request: &StoreRequest,
) -> Option<&'a AcceptedContext> {
    let candidates = accepted
        .iter()
        .filter(|pc| pc.abstract_syntax == request.sop_class_uid);

    let mut fallback = None;
    for pc in candidates {
        if pc.transfer_syntax == request.transfer_syntax {
            return Some(pc);
        }
        if fallback.is_none()
            && is_native_little_endian(&request.transfer_syntax)
            && is_native_little_endian(&pc.transfer_syntax)
        {
            fallback = Some(pc);
        }
    }
    fallback
}

pub fn is_native_little_endian(transfer_syntax: &str) -> bool {
    transfer_syntax == uids::IMPLICIT_VR_LITTLE_ENDIAN
        || transfer_syntax == uids::EXPLICIT_VR_LITTLE_ENDIAN
}

/// UIDs are padded to even length with NUL; some writers use spaces
pub fn trim_uid(uid: &str) -> String {
    uid.trim_end_matches(|c: char| c == '\0' || c == ' ').to_string()
}
