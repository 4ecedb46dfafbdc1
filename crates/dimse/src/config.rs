//! Configuration types for DIMSE services

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DimseError, Result};

/// Longest AE title allowed by the upper layer protocol
pub const MAX_AE_TITLE_LEN: usize = 16;

/// Configuration for the outbound DIMSE client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScuConfig {
    /// Local Application Entity Title
    #[serde(default = "default_local_aet")]
    pub local_aet: String,

    /// Maximum PDU size in bytes
    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single DIMSE exchange (C-STORE, C-ECHO) in milliseconds
    #[serde(default = "default_dimse_timeout")]
    pub dimse_timeout_ms: u64,
}

/// Configuration for a remote DICOM node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Remote Application Entity Title
    pub ae_title: String,

    /// Remote host address
    pub host: String,

    /// Remote port
    pub port: u16,

    /// Connection timeout in milliseconds (overrides global setting)
    pub connect_timeout_ms: Option<u64>,

    /// Per-exchange timeout in milliseconds (overrides global setting)
    pub dimse_timeout_ms: Option<u64>,

    /// Maximum PDU size for this node (overrides global setting)
    pub max_pdu: Option<u32>,
}

impl Default for ScuConfig {
    fn default() -> Self {
        Self {
            local_aet: default_local_aet(),
            max_pdu: default_max_pdu(),
            connect_timeout_ms: default_connect_timeout(),
            dimse_timeout_ms: default_dimse_timeout(),
        }
    }
}

impl ScuConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get per-exchange timeout as Duration
    pub fn dimse_timeout(&self) -> Duration {
        Duration::from_millis(self.dimse_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.local_aet, "Local")?;

        if self.max_pdu < 4096 || self.max_pdu > 131_072 {
            return Err(DimseError::config(
                "Max PDU size must be between 4096 and 131072 bytes",
            ));
        }

        if self.connect_timeout_ms == 0 || self.dimse_timeout_ms == 0 {
            return Err(DimseError::config("Timeouts must be greater than 0"));
        }

        Ok(())
    }
}

impl RemoteNode {
    /// Create a new remote node configuration
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            connect_timeout_ms: None,
            dimse_timeout_ms: None,
            max_pdu: None,
        }
    }

    /// Set connection timeout for this node
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the per-exchange timeout for this node
    pub fn with_dimse_timeout(mut self, timeout_ms: u64) -> Self {
        self.dimse_timeout_ms = Some(timeout_ms);
        self
    }

    /// Validate the remote node configuration
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.ae_title, "Remote")?;

        if self.host.trim().is_empty() {
            return Err(DimseError::config("Remote host cannot be empty"));
        }

        if self.port == 0 {
            return Err(DimseError::config("Remote port must be greater than 0"));
        }

        Ok(())
    }

    /// `AE@host:port`, used in log lines
    pub fn describe(&self) -> String {
        format!("{}@{}:{}", self.ae_title, self.host, self.port)
    }
}

/// AE titles are 1-16 characters of printable ASCII without backslash
pub fn validate_ae_title(ae_title: &str, which: &str) -> Result<()> {
    let trimmed = ae_title.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_AE_TITLE_LEN {
        return Err(DimseError::InvalidAeTitle(format!(
            "{} AE title must be 1-{} characters, got {:?}",
            which, MAX_AE_TITLE_LEN, ae_title
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_graphic() || c == ' ') || trimmed.contains('\\') {
        return Err(DimseError::InvalidAeTitle(format!(
            "{} AE title contains invalid characters: {:?}",
            which, ae_title
        )));
    }
    Ok(())
}

// Default value functions
fn default_local_aet() -> String {
    crate::DEFAULT_LOCAL_AET.to_string()
}

fn default_max_pdu() -> u32 {
    16_384
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_dimse_timeout() -> u64 {
    30_000 // 30 seconds
}
