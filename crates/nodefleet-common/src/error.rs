//! Error taxonomy for the node fleet.

use thiserror::Error;

/// Errors raised while starting the fleet or driving a node
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    /// Invalid fleet configuration (e.g. identity/proxy count mismatch)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An identity, proxy, or credential list could not be read
    #[error("Source error: {0}")]
    Source(String),

    /// Connection, DNS, or timeout failure
    #[error("Network error: {0}")]
    Network(String),

    /// Response body was not the JSON the call requires
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote API answered with an error status
    #[error("Remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    /// Failure that escaped every node's own recovery
    #[error("Fleet fatal error: {0}")]
    FleetFatal(String),
}

impl FleetError {
    /// Returns true if retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Protocol(_) | Self::Remote { .. } | Self::Source(_)
        )
    }

    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Source(_) => "source",
            Self::Network(_) => "network",
            Self::Protocol(_) => "protocol",
            Self::Remote { .. } => "remote",
            Self::FleetFatal(_) => "fleet_fatal",
        }
    }
}
