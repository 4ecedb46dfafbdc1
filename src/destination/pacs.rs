//! Delivery to a PACS over one DIMSE association per dispatch.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dimse::types::{is_native_little_endian, select_context, MAX_PRESENTATION_CONTEXTS};
use dimse::{
    Association, AssociationRequest, Connector, DimseError, DimseScu, DimseStatus, PresentationContext,
    RemoteNode, ScuConfig, StoreRequest, DEFAULT_DIMSE_PORT, DEFAULT_LOCAL_AET,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::destination::{file_label, in_sequence_order, DispatchReport};
use crate::error::TransferError;
use crate::models::{ObjectOutcome, StagedObject, TransferOutcome};
use crate::progress::{ProgressEvent, ProgressSink};

pub const DEFAULT_REMOTE_AET: &str = "ANY-SCP";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const MAX_AE_TITLE_LEN: usize = dimse::config::MAX_AE_TITLE_LEN;

const MIN_PDU: u32 = 4096;
const MAX_PDU: u32 = 131_072;

fn default_local_ae_title() -> String {
    DEFAULT_LOCAL_AET.to_string()
}

fn default_remote_ae_title() -> String {
    DEFAULT_REMOTE_AET.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_DIMSE_PORT
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    30_000
}

fn default_max_pdu() -> u32 {
    16_384
}

/// Connection parameters for a PACS destination or probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacsConfig {
    #[serde(default = "default_local_ae_title")]
    pub local_ae_title: String,
    #[serde(default = "default_remote_ae_title")]
    pub remote_ae_title: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Budget for a single C-STORE or C-ECHO exchange
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,
}

impl Default for PacsConfig {
    fn default() -> Self {
        Self {
            local_ae_title: default_local_ae_title(),
            remote_ae_title: default_remote_ae_title(),
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            max_pdu: default_max_pdu(),
        }
    }
}

impl PacsConfig {
    pub fn new(
        local_ae_title: impl Into<String>,
        remote_ae_title: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            local_ae_title: local_ae_title.into(),
            remote_ae_title: remote_ae_title.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Build a config from raw user input, as typed on a command line or form
    pub fn parse(local: &str, remote: &str, host: &str, port: &str) -> Result<Self, ConfigError> {
        let port_text = port.trim();
        if port_text.is_empty() {
            return Err(ConfigError::MissingField { field: "pacs.port" });
        }
        let port = port_text
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port_text.to_string()))?;

        let config = Self::new(local.trim(), remote.trim(), host.trim(), port);
        config.validate()?;
        Ok(config)
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ae_title("pacs.local_ae_title", &self.local_ae_title)?;
        check_ae_title("pacs.remote_ae_title", &self.remote_ae_title)?;
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "pacs.host" });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pacs.connect_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pacs.store_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if !(MIN_PDU..=MAX_PDU).contains(&self.max_pdu) {
            return Err(ConfigError::Invalid {
                field: "pacs.max_pdu",
                reason: format!("must be between {} and {}", MIN_PDU, MAX_PDU),
            });
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn remote_node(&self) -> RemoteNode {
        RemoteNode::new(&self.remote_ae_title, &self.host, self.port)
            .with_timeout(self.connect_timeout_ms)
            .with_dimse_timeout(self.store_timeout_ms)
    }

    pub fn scu_config(&self) -> ScuConfig {
        ScuConfig {
            local_aet: self.local_ae_title.clone(),
            max_pdu: self.max_pdu,
            connect_timeout_ms: self.connect_timeout_ms,
            dimse_timeout_ms: self.store_timeout_ms,
        }
    }

    /// The native network client for this config
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(DimseScu::new(self.scu_config()))
    }

    pub(crate) fn association_request(&self, contexts: Vec<PresentationContext>) -> AssociationRequest {
        AssociationRequest {
            calling_ae_title: self.local_ae_title.clone(),
            node: self.remote_node(),
            contexts,
        }
    }
}

fn check_ae_title(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { field });
    }
    if value.trim().len() > MAX_AE_TITLE_LEN {
        return Err(ConfigError::TooLong {
            field,
            value: value.to_string(),
            max: MAX_AE_TITLE_LEN,
        });
    }
    let which = if field.ends_with("local_ae_title") { "Local" } else { "Remote" };
    match dimse::config::validate_ae_title(value, which) {
        Ok(()) => Ok(()),
        Err(DimseError::InvalidAeTitle(reason)) => Err(ConfigError::Invalid { field, reason }),
        Err(other) => Err(ConfigError::Invalid {
            field,
            reason: other.to_string(),
        }),
    }
}

/// Open an association, bounded by the configured connect timeout
pub(crate) async fn associate(
    connector: &dyn Connector,
    config: &PacsConfig,
    contexts: Vec<PresentationContext>,
) -> Result<Box<dyn Association>, TransferError> {
    let peer = config.remote_node().describe();
    let timeout = config.connect_timeout();
    match tokio::time::timeout(timeout, connector.associate(config.association_request(contexts))).await {
        Ok(Ok(association)) => Ok(association),
        Ok(Err(source)) => Err(TransferError::Association { peer, source }),
        Err(_) => Err(TransferError::Association {
            peer,
            source: DimseError::Timeout(format!("no association within {:?}", timeout)),
        }),
    }
}

/// Release an association, giving up after the connect timeout.
///
/// Failures are logged only; whatever was stored stays stored.
pub(crate) async fn release(association: &mut dyn Association, config: &PacsConfig) {
    let timeout = config.connect_timeout();
    match tokio::time::timeout(timeout, association.release()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to release association: {}", e),
        Err(_) => warn!(
            "Release of association with {} timed out after {:?}",
            config.remote_node().describe(),
            timeout
        ),
    }
}

/// Sends staged objects with C-STORE
pub struct PacsBackend {
    config: PacsConfig,
    connector: Arc<dyn Connector>,
}

impl PacsBackend {
    pub fn new(config: PacsConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &PacsConfig {
        &self.config
    }

    /// Send every object over a single association.
    ///
    /// Negotiation failure ends the dispatch before any store is attempted.
    /// After that, each object gets its own outcome: a store that exceeds
    /// the per-call timeout is `Rejected("timeout")` and the loop moves on.
    pub async fn dispatch(
        &self,
        objects: &[StagedObject],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, TransferError> {
        let ordered = in_sequence_order(objects);
        let total = ordered.len();
        let mut report = DispatchReport::default();
        if total == 0 {
            info!("No objects to send to {}", self.config.remote_node().describe());
            return Ok(report);
        }

        let requests = read_store_requests(ordered.iter().map(|o| o.staged_path.clone()).collect()).await?;
        let plan = ContextPlan::build(&requests);
        if plan.contexts.is_empty() {
            warn!("None of the {} staged objects could be read; not associating", total);
            for (object, request) in ordered.iter().zip(requests) {
                let reason = request.err().unwrap_or_default();
                report.outcomes.push(outcome(object, TransferOutcome::Rejected(reason)));
            }
            return Ok(report);
        }

        let mut association =
            associate(self.connector.as_ref(), &self.config, plan.contexts.clone()).await?;
        info!(
            "Sending {} objects to {} ({} presentation contexts proposed, {} accepted)",
            total,
            self.config.remote_node().describe(),
            plan.contexts.len(),
            association.accepted_contexts().len()
        );

        let mut lost: Option<String> = None;
        for (object, request) in ordered.iter().zip(requests) {
            if cancel.is_cancelled() {
                info!("PACS dispatch cancelled after {} objects", report.outcomes.len());
                report.cancelled = true;
                break;
            }

            let result = match (lost.clone(), request) {
                (Some(reason), _) => TransferOutcome::Rejected(format!("association lost: {}", reason)),
                (None, Err(reason)) => TransferOutcome::Rejected(reason),
                (None, Ok(request)) if plan.overflow.contains(&ContextPlan::key(&request)) => {
                    TransferOutcome::Rejected(format!(
                        "no presentation context slot left for {}",
                        request.sop_class_uid
                    ))
                }
                (None, Ok(request)) => {
                    let (result, fatal) = self.store(association.as_mut(), &request).await;
                    if let Some(reason) = fatal {
                        error!("Association with {} lost: {}", self.config.remote_node().describe(), reason);
                        lost = Some(reason);
                    }
                    result
                }
            };

            report.outcomes.push(outcome(object, result));
            sink.emit(ProgressEvent::dispatching(
                report.outcomes.len(),
                total,
                file_label(object),
            ));
        }

        if lost.is_none() {
            release(association.as_mut(), &self.config).await;
        }

        info!(
            "Sent {} of {} objects to {}",
            report.accepted(),
            total,
            self.config.remote_node().describe()
        );
        Ok(report)
    }

    /// Store one object; the second value is set when the association is no longer usable
    async fn store(
        &self,
        association: &mut dyn Association,
        request: &StoreRequest,
    ) -> (TransferOutcome, Option<String>) {
        if select_context(association.accepted_contexts(), request).is_none() {
            return (
                TransferOutcome::Rejected(format!(
                    "no accepted presentation context for {} in {}",
                    request.sop_class_uid, request.transfer_syntax
                )),
                None,
            );
        }

        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, association.store(request)).await {
            Ok(Ok(DimseStatus::Success)) => {
                debug!("Stored {}", request.sop_instance_uid);
                (TransferOutcome::Accepted, None)
            }
            Ok(Ok(status)) => {
                warn!("{} refused by peer: {}", request.sop_instance_uid, status);
                (TransferOutcome::Rejected(format!("status {}", status)), None)
            }
            Ok(Err(e)) => {
                warn!("C-STORE of {} failed: {}", request.sop_instance_uid, e);
                let fatal = e.is_fatal_for_association().then(|| e.to_string());
                (TransferOutcome::Rejected(e.to_string()), fatal)
            }
            Err(_) => {
                warn!("C-STORE of {} exceeded {:?}", request.sop_instance_uid, timeout);
                (TransferOutcome::timeout(), None)
            }
        }
    }
}

fn outcome(object: &StagedObject, outcome: TransferOutcome) -> ObjectOutcome {
    ObjectOutcome {
        sequence: Some(object.sequence),
        source: object.source.clone(),
        outcome,
    }
}

/// Read SOP class, instance and transfer syntax from each staged file
async fn read_store_requests(
    paths: Vec<PathBuf>,
) -> Result<Vec<Result<StoreRequest, String>>, TransferError> {
    let requests = tokio::task::spawn_blocking(move || {
        paths
            .into_iter()
            .map(|path| StoreRequest::from_file(path).map_err(|e| e.to_string()))
            .collect()
    })
    .await?;
    Ok(requests)
}

/// Presentation contexts to propose for a batch
#[derive(Debug, Default)]
struct ContextPlan {
    contexts: Vec<PresentationContext>,
    /// Keys that did not fit under the context limit
    overflow: HashSet<(String, String)>,
}

impl ContextPlan {
    /// Native little-endian objects of one SOP class share a context
    fn key(request: &StoreRequest) -> (String, String) {
        let syntax = if is_native_little_endian(&request.transfer_syntax) {
            "native".to_string()
        } else {
            request.transfer_syntax.clone()
        };
        (request.sop_class_uid.clone(), syntax)
    }

    fn build(requests: &[Result<StoreRequest, String>]) -> Self {
        let mut plan = ContextPlan::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for request in requests.iter().flatten() {
            let key = Self::key(request);
            if seen.contains(&key) || plan.overflow.contains(&key) {
                continue;
            }
            if plan.contexts.len() == MAX_PRESENTATION_CONTEXTS {
                warn!(
                    "More than {} presentation contexts needed; {} in {} will not be sent",
                    MAX_PRESENTATION_CONTEXTS, request.sop_class_uid, request.transfer_syntax
                );
                plan.overflow.insert(key);
                continue;
            }
            seen.insert(key);
            plan.contexts.push(PresentationContext::for_storage(
                &request.sop_class_uid,
                &request.transfer_syntax,
            ));
        }
        plan
    }
}
