//! DIMSE command set encoding (PS3.7 section 9.3)
//!
//! Command sets are always Implicit VR Little Endian regardless of the
//! transfer syntax negotiated for the data set.

use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;

use crate::types::DimseStatus;
use crate::{DimseError, Result};

pub const C_STORE_RQ: u16 = 0x0001;
pub const C_STORE_RSP: u16 = 0x8001;
pub const C_ECHO_RQ: u16 = 0x0030;
pub const C_ECHO_RSP: u16 = 0x8030;

/// CommandDataSetType value meaning "no data set follows"
pub const NO_DATA_SET: u16 = 0x0101;

const PRIORITY_MEDIUM: u16 = 0x0000;

/// The fields of a response command set the client cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResponse {
    pub command_field: u16,
    pub message_id_responded_to: u16,
    pub status: DimseStatus,
}

/// Build a C-STORE-RQ command set
pub fn store_rq(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(pad_uid(sop_class_uid)),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_STORE_RQ])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [PRIORITY_MEDIUM])),
        // any value other than 0x0101 announces a data set
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [0x0000])),
        DataElement::new(
            tags::AFFECTED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(pad_uid(sop_instance_uid)),
        ),
    ])
}

/// Build a C-ECHO-RQ command set
pub fn echo_rq(message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(pad_uid(uids::VERIFICATION)),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_ECHO_RQ])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [NO_DATA_SET])),
    ])
}

/// Serialize a command set for a P-DATA-TF value
pub fn encode(command: &InMemDicomObject) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .map_err(|e| DimseError::DicomParsing(format!("failed to encode command: {}", e)))?;
    Ok(bytes)
}

/// Parse a response command set
pub fn decode_response(bytes: &[u8]) -> Result<CommandResponse> {
    let command = InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .map_err(|e| DimseError::DicomParsing(format!("failed to decode command: {}", e)))?;

    Ok(CommandResponse {
        command_field: read_u16(&command, tags::COMMAND_FIELD)?,
        message_id_responded_to: read_u16(&command, tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
        status: DimseStatus::from_code(read_u16(&command, tags::STATUS)?),
    })
}

fn read_u16(command: &InMemDicomObject, tag: dicom_core::Tag) -> Result<u16> {
    command
        .element(tag)
        .map_err(|e| DimseError::DicomParsing(format!("missing {}: {}", tag, e)))?
        .to_int::<u16>()
        .map_err(|e| DimseError::DicomParsing(format!("bad value for {}: {}", tag, e)))
}

fn pad_uid(uid: &str) -> String {
    let mut padded = uid.to_string();
    if padded.len() % 2 == 1 {
        padded.push('\0');
    }
    padded
}
