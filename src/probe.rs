//! Connectivity check against a PACS: associate, C-ECHO, release.

use std::sync::Arc;
use std::time::Duration;

use dimse::{Connector, PresentationContext};
use tracing::{debug, error, info, warn};

use crate::destination::pacs::{self, PacsConfig};
use crate::error::TransferError;

pub struct Prober {
    connector: Arc<dyn Connector>,
    retries: u32,
}

impl Prober {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            retries: 0,
        }
    }

    /// Retry transient failures up to `retries` times with exponential backoff
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Returns `Ok(true)` when the peer answered the echo with success and
    /// `Ok(false)` when it answered with any other status. Connection and
    /// negotiation problems are errors; every attempt is bounded by the
    /// configured timeouts.
    pub async fn probe(&self, config: &PacsConfig) -> Result<bool, TransferError> {
        config.validate()?;

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << attempt.min(5));
                info!("Connection test retry {} of {} in {:?}", attempt, self.retries, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.echo_once(config).await {
                Ok(success) => return Ok(success),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    warn!("Connection test failed (attempt {}): {}", attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => {
                    error!("Connection test failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn echo_once(&self, config: &PacsConfig) -> Result<bool, TransferError> {
        let peer = config.remote_node().describe();
        info!("Sending C-ECHO to {}", peer);

        let mut association = pacs::associate(
            self.connector.as_ref(),
            config,
            vec![PresentationContext::verification()],
        )
        .await?;

        let timeout = config.store_timeout();
        let status = tokio::time::timeout(timeout, association.echo()).await;

        match status {
            // the peer never answered; dropping the handle aborts the association
            Err(_) => drop(association),
            Ok(_) => pacs::release(association.as_mut(), config).await,
        }

        match status {
            Ok(Ok(status)) => {
                debug!("C-ECHO response from {}: {}", peer, status);
                Ok(status.is_success())
            }
            Ok(Err(source)) => Err(TransferError::Association { peer, source }),
            Err(_) => Err(TransferError::Timeout {
                operation: "C-ECHO",
                after: timeout,
            }),
        }
    }
}
