//! Service Class User (SCU) implementation for outbound DIMSE operations

use std::time::Duration;

use async_trait::async_trait;

use crate::association::{self, Settings};
use crate::config::{validate_ae_title, RemoteNode, ScuConfig};
use crate::types::{AcceptedContext, AssociationRequest, DimseStatus, StoreRequest};
use crate::{DimseError, Result};

/// Opens associations with remote nodes
#[async_trait]
pub trait Connector: Send + Sync {
    /// Negotiate an association proposing `request.contexts`
    async fn associate(&self, request: AssociationRequest) -> Result<Box<dyn Association>>;
}

/// An open association
#[async_trait]
pub trait Association: Send {
    /// Presentation contexts the peer accepted
    fn accepted_contexts(&self) -> &[AcceptedContext];

    /// Transmit one object and return the status the peer reported
    async fn store(&mut self, request: &StoreRequest) -> Result<DimseStatus>;

    /// Issue a C-ECHO
    async fn echo(&mut self) -> Result<DimseStatus>;

    /// Release the association gracefully
    async fn release(&mut self) -> Result<()>;
}

/// DIMSE Service Class User
#[derive(Debug, Clone)]
pub struct DimseScu {
    config: ScuConfig,
}

impl DimseScu {
    /// Create a new SCU with the given configuration
    pub fn new(config: ScuConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScuConfig {
        &self.config
    }

    /// Get connection timeout for a node (uses node-specific or global setting)
    fn get_connection_timeout(&self, node: &RemoteNode) -> Duration {
        node.connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.connect_timeout())
    }

    /// Get the per-exchange timeout for a node (uses node-specific or global setting)
    fn get_dimse_timeout(&self, node: &RemoteNode) -> Duration {
        node.dimse_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.dimse_timeout())
    }

    /// Get maximum PDU size for a node (uses node-specific or global setting)
    fn get_max_pdu(&self, node: &RemoteNode) -> u32 {
        node.max_pdu.unwrap_or(self.config.max_pdu)
    }
}

#[async_trait]
impl Connector for DimseScu {
    async fn associate(&self, request: AssociationRequest) -> Result<Box<dyn Association>> {
        validate_ae_title(&request.calling_ae_title, "Local")?;
        request.node.validate()?;
        if request.contexts.is_empty() {
            return Err(DimseError::config("At least one presentation context is required"));
        }

        let settings = Settings {
            max_pdu: self.get_max_pdu(&request.node),
            connect_timeout: self.get_connection_timeout(&request.node),
            dimse_timeout: self.get_dimse_timeout(&request.node),
        };
        let association = association::establish(request, settings).await?;
        Ok(Box::new(association))
    }
}

/// Builder for creating SCU instances with custom configurations
pub struct ScuBuilder {
    config: ScuConfig,
}

impl ScuBuilder {
    /// Start building a new SCU
    pub fn new() -> Self {
        Self {
            config: ScuConfig::default(),
        }
    }

    /// Set the local AE title
    pub fn local_aet(mut self, aet: impl Into<String>) -> Self {
        self.config.local_aet = aet.into();
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-exchange timeout
    pub fn dimse_timeout(mut self, timeout: Duration) -> Self {
        self.config.dimse_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the maximum PDU size
    pub fn max_pdu(mut self, size: u32) -> Self {
        self.config.max_pdu = size;
        self
    }

    /// Build the SCU
    pub fn build(self) -> Result<DimseScu> {
        self.config.validate()?;
        Ok(DimseScu::new(self.config))
    }
}

impl Default for ScuBuilder {
    fn default() -> Self {
        Self::new()
    }
}
