//! Native association handling on top of `dicom-ul`.
//!
//! The upper-layer client is blocking, so each association lives on its own
//! thread and the async [`UlAssociation`] handle talks to it over channels.
//! A caller that gives up on a request (timeout) simply drops its reply
//! channel; the thread finishes the exchange and discards late answers by
//! Message ID.

use std::time::Duration;

use async_trait::async_trait;
use dicom_dictionary_std::uids;
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::association::client::ClientAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::{self, CommandResponse};
use crate::scu::Association;
use crate::types::{
    select_context, trim_uid, AcceptedContext, AssociationRequest, DimseStatus, StoreRequest,
};
use crate::{DimseError, Result};

/// Bytes taken by the PDV item header (item length, context id, control header)
const PDV_HEADER_LEN: usize = 6;

/// Offset of the first meta group element, right after the "DICM" prefix
const META_START: usize = 132;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub max_pdu: u32,
    pub connect_timeout: Duration,
    pub dimse_timeout: Duration,
}

enum Request {
    Store {
        request: StoreRequest,
        message_id: u16,
        reply: oneshot::Sender<Result<DimseStatus>>,
    },
    Echo {
        message_id: u16,
        reply: oneshot::Sender<Result<DimseStatus>>,
    },
    Release {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// One step of wire traffic, executed by the association thread
enum Wire {
    Send(Pdu),
    Receive,
}

type WireFn<'a> = dyn FnMut(Wire) -> Result<Option<Pdu>> + 'a;

/// Handle to an open association
pub struct UlAssociation {
    peer: String,
    accepted: Vec<AcceptedContext>,
    requests: mpsc::UnboundedSender<Request>,
    next_message_id: u16,
}

/// Open an association on a dedicated thread, waiting at most `connect_timeout`
pub(crate) async fn establish(request: AssociationRequest, settings: Settings) -> Result<UlAssociation> {
    let peer = request.node.describe();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name(format!("dimse-{}", request.node.ae_title))
        .spawn(move || run_association(request, settings, ready_tx, requests_rx))?;

    match tokio::time::timeout(settings.connect_timeout, ready_rx).await {
        Err(_) => Err(DimseError::Timeout(format!(
            "association with {} not established within {:?}",
            peer, settings.connect_timeout
        ))),
        Ok(Err(_)) => Err(DimseError::internal(
            "association thread exited before negotiation finished",
        )),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Ok(Ok(accepted))) => {
            info!(peer = %peer, contexts = accepted.len(), "Association established");
            Ok(UlAssociation {
                peer,
                accepted,
                requests: requests_tx,
                next_message_id: 1,
            })
        }
    }
}

impl UlAssociation {
    fn message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    fn closed(&self) -> DimseError {
        DimseError::AssociationClosed(format!("association with {} is no longer open", self.peer))
    }
}

#[async_trait]
impl Association for UlAssociation {
    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.accepted
    }

    async fn store(&mut self, request: &StoreRequest) -> Result<DimseStatus> {
        let message_id = self.message_id();
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Store {
                request: request.clone(),
                message_id,
                reply,
            })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }

    async fn echo(&mut self) -> Result<DimseStatus> {
        let message_id = self.message_id();
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Echo { message_id, reply })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }

    async fn release(&mut self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Release { reply })
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }
}

fn run_association(
    request: AssociationRequest,
    settings: Settings,
    ready: oneshot::Sender<Result<Vec<AcceptedContext>>>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let AssociationRequest {
        calling_ae_title,
        node,
        contexts,
    } = request;

    // give the blocking socket a little longer than callers wait, so a caller
    // timeout is reported before the socket gives up on the association
    let socket_timeout = settings.dimse_timeout + Duration::from_secs(5);

    let mut options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title)
        .called_ae_title(node.ae_title.clone())
        .max_pdu_length(settings.max_pdu)
        .read_timeout(socket_timeout)
        .write_timeout(socket_timeout);
    for context in &contexts {
        options = options.with_presentation_context(
            context.abstract_syntax.clone(),
            context.transfer_syntaxes.clone(),
        );
    }

    debug!(peer = %node.describe(), proposed = contexts.len(), "Requesting association");
    let mut association = match options.establish((node.host.as_str(), node.port)) {
        Ok(association) => association,
        Err(e) => {
            let _ = ready.send(Err(DimseError::AssociationRejected(format!(
                "{}: {}",
                node.describe(),
                e
            ))));
            return;
        }
    };

    // proposed contexts are numbered 1, 3, 5, ... in proposal order
    let accepted: Vec<AcceptedContext> = association
        .presentation_contexts()
        .iter()
        .filter(|pc| matches!(pc.reason, PresentationContextResultReason::Acceptance))
        .filter_map(|pc| {
            let index = usize::from(pc.id.saturating_sub(1) / 2);
            contexts.get(index).map(|proposed| AcceptedContext {
                id: pc.id,
                abstract_syntax: proposed.abstract_syntax.clone(),
                transfer_syntax: trim_uid(&pc.transfer_syntax),
            })
        })
        .collect();

    let max_pdu = match association.acceptor_max_pdu_length() {
        0 => settings.max_pdu,
        n => n,
    } as usize;

    if ready.send(Ok(accepted.clone())).is_err() {
        // the caller stopped waiting
        let _ = association.abort();
        return;
    }

    let mut release_reply = None;
    {
        let mut wire = |step: Wire| -> Result<Option<Pdu>> {
            match step {
                Wire::Send(pdu) => association
                    .send(&pdu)
                    .map(|_| None)
                    .map_err(|e| DimseError::DicomUl(e.to_string())),
                Wire::Receive => association
                    .receive()
                    .map(Some)
                    .map_err(|e| DimseError::DicomUl(e.to_string())),
            }
        };

        let mut broken: Option<String> = None;
        while let Some(next) = requests.blocking_recv() {
            match next {
                Request::Store {
                    request,
                    message_id,
                    reply,
                } => {
                    let result = match &broken {
                        Some(reason) => Err(DimseError::AssociationClosed(reason.clone())),
                        None => store(&mut wire, &accepted, max_pdu, message_id, &request),
                    };
                    if let Err(e) = &result {
                        if e.is_fatal_for_association() && broken.is_none() {
                            broken = Some(e.to_string());
                        }
                    }
                    let _ = reply.send(result);
                }
                Request::Echo { message_id, reply } => {
                    let result = match &broken {
                        Some(reason) => Err(DimseError::AssociationClosed(reason.clone())),
                        None => echo(&mut wire, &accepted, max_pdu, message_id),
                    };
                    if let Err(e) = &result {
                        if e.is_fatal_for_association() && broken.is_none() {
                            broken = Some(e.to_string());
                        }
                    }
                    let _ = reply.send(result);
                }
                Request::Release { reply } => {
                    release_reply = Some((reply, broken.is_some()));
                    break;
                }
            }
        }
    }

    match release_reply {
        Some((reply, false)) => {
            let result = association
                .release()
                .map_err(|e| DimseError::DicomUl(format!("release failed: {}", e)));
            let _ = reply.send(result);
        }
        Some((reply, true)) => {
            let _ = association.abort();
            let _ = reply.send(Ok(()));
        }
        None => {
            warn!(peer = %node.describe(), "Association dropped without release, aborting");
            let _ = association.abort();
        }
    }
}

fn store(
    wire: &mut WireFn<'_>,
    accepted: &[AcceptedContext],
    max_pdu: usize,
    message_id: u16,
    request: &StoreRequest,
) -> Result<DimseStatus> {
    let context = select_context(accepted, request).ok_or_else(|| {
        DimseError::NoPresentationContext(format!(
            "{} in {}",
            request.sop_class_uid, request.transfer_syntax
        ))
    })?;

    let dataset = dataset_bytes(request, &context.transfer_syntax)?;
    let command = command::encode(&command::store_rq(
        message_id,
        &request.sop_class_uid,
        &request.sop_instance_uid,
    ))?;

    debug!(
        message_id,
        context = context.id,
        bytes = dataset.len(),
        "Sending C-STORE-RQ for {}",
        request.sop_instance_uid
    );
    for pdu in pdata_pdus(context.id, true, &command, max_pdu) {
        wire(Wire::Send(pdu))?;
    }
    for pdu in pdata_pdus(context.id, false, &dataset, max_pdu) {
        wire(Wire::Send(pdu))?;
    }

    let response = await_response(wire, message_id)?;
    if response.command_field != command::C_STORE_RSP {
        return Err(DimseError::operation_failed(format!(
            "expected C-STORE-RSP, got command 0x{:04X}",
            response.command_field
        )));
    }
    Ok(response.status)
}

fn echo(
    wire: &mut WireFn<'_>,
    accepted: &[AcceptedContext],
    max_pdu: usize,
    message_id: u16,
) -> Result<DimseStatus> {
    let context = accepted
        .iter()
        .find(|pc| pc.abstract_syntax == uids::VERIFICATION)
        .ok_or_else(|| DimseError::NoPresentationContext(uids::VERIFICATION.to_string()))?;

    let command = command::encode(&command::echo_rq(message_id))?;
    for pdu in pdata_pdus(context.id, true, &command, max_pdu) {
        wire(Wire::Send(pdu))?;
    }

    let response = await_response(wire, message_id)?;
    if response.command_field != command::C_ECHO_RSP {
        return Err(DimseError::operation_failed(format!(
            "expected C-ECHO-RSP, got command 0x{:04X}",
            response.command_field
        )));
    }
    Ok(response.status)
}

/// Read PDUs until the response to `message_id` arrives
fn await_response(wire: &mut WireFn<'_>, message_id: u16) -> Result<CommandResponse> {
    let mut buffer = Vec::new();
    loop {
        match wire(Wire::Receive)? {
            Some(Pdu::PData { data }) => {
                for value in data {
                    if !matches!(value.value_type, PDataValueType::Command) {
                        continue;
                    }
                    buffer.extend_from_slice(&value.data);
                    if !value.is_last {
                        continue;
                    }
                    let response = command::decode_response(&buffer)?;
                    buffer.clear();
                    if response.message_id_responded_to == message_id {
                        return Ok(response);
                    }
                    warn!(
                        expected = message_id,
                        received = response.message_id_responded_to,
                        "Discarding late DIMSE response"
                    );
                }
            }
            Some(Pdu::ReleaseRQ) => {
                return Err(DimseError::AssociationClosed(
                    "peer requested release mid-operation".into(),
                ))
            }
            Some(Pdu::AbortRQ { .. }) => {
                return Err(DimseError::AssociationClosed("peer aborted the association".into()))
            }
            Some(_) => {
                return Err(DimseError::DicomUl("unexpected PDU while awaiting response".into()))
            }
            None => return Err(DimseError::internal("receive produced no PDU")),
        }
    }
}

/// Split `bytes` into P-DATA-TF PDUs that fit the peer's maximum PDU length
fn pdata_pdus(context_id: u8, is_command: bool, bytes: &[u8], max_pdu: usize) -> Vec<Pdu> {
    let fragment_len = max_pdu.saturating_sub(PDV_HEADER_LEN).max(1);
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![bytes]
    } else {
        bytes.chunks(fragment_len).collect()
    };
    let last = chunks.len() - 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: context_id,
                value_type: if is_command {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                },
                is_last: i == last,
                data: chunk.to_vec(),
            }],
        })
        .collect()
}

/// The data set of a staged file, encoded in `transfer_syntax`
fn dataset_bytes(request: &StoreRequest, transfer_syntax: &str) -> Result<Vec<u8>> {
    if request.transfer_syntax == transfer_syntax {
        let mut bytes = std::fs::read(&request.path)?;
        if let Some(offset) = dataset_offset(&bytes) {
            return Ok(bytes.split_off(offset));
        }
    }
    reencode(request, transfer_syntax)
}

fn reencode(request: &StoreRequest, transfer_syntax: &str) -> Result<Vec<u8>> {
    let ts = TransferSyntaxRegistry.get(transfer_syntax).ok_or_else(|| {
        DimseError::DicomObject(format!("unsupported transfer syntax {}", transfer_syntax))
    })?;
    let object = dicom_object::open_file(&request.path)
        .map_err(|e| DimseError::DicomObject(format!("{}: {}", request.path.display(), e)))?;

    let mut bytes = Vec::new();
    object
        .write_dataset_with_ts(&mut bytes, ts)
        .map_err(|e| DimseError::DicomObject(format!("re-encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Where the data set begins in a Part 10 file, if the meta group starts
/// with its group length element as the standard requires
pub(crate) fn dataset_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < META_START + 12 || &bytes[128..META_START] != b"DICM" {
        return None;
    }
    // (0002,0000) UL, explicit VR little endian
    let header = &bytes[META_START..META_START + 8];
    if header[..4] != [0x02, 0x00, 0x00, 0x00] || &header[4..6] != b"UL" {
        return None;
    }
    let length_bytes: [u8; 4] = bytes[META_START + 8..META_START + 12].try_into().ok()?;
    let offset = (META_START + 12).checked_add(u32::from_le_bytes(length_bytes) as usize)?;
    (offset <= bytes.len()).then_some(offset)
}
