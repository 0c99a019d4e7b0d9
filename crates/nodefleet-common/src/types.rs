//! Core types shared across Nodefleet components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FleetError;

/// One fleet member: a node ID bound to a hardware ID.
///
/// Loaded once per fleet start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: String,
    pub hardware_id: String,
}

impl NodeIdentity {
    pub fn new(node_id: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            hardware_id: hardware_id.into(),
        }
    }
}

/// Parses the `nodeId:hardwareId` line format
impl FromStr for NodeIdentity {
    type Err = FleetError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        // Anything after a second ':' is ignored
        let mut parts = line.trim().split(':');
        let (Some(node_id), Some(hardware_id)) = (parts.next(), parts.next()) else {
            return Err(FleetError::Configuration(format!(
                "expected nodeId:hardwareId, got {:?}",
                line
            )));
        };

        let (node_id, hardware_id) = (node_id.trim(), hardware_id.trim());
        if node_id.is_empty() || hardware_id.is_empty() {
            return Err(FleetError::Configuration(format!(
                "empty node or hardware id in {:?}",
                line
            )));
        }

        Ok(Self::new(node_id, hardware_id))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.hardware_id)
    }
}

/// Outbound proxy bound to one node, or a direct connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyAssignment(Option<String>);

impl ProxyAssignment {
    /// No proxy: calls go out directly
    pub fn direct() -> Self {
        Self(None)
    }

    pub fn via(url: impl Into<String>) -> Self {
        Self(Some(url.into()))
    }

    pub fn url(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_proxied(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for ProxyAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(url) => f.write_str(url),
            None => f.write_str("none"),
        }
    }
}

/// Response of the IP discovery service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip: String,
}

/// Body of the register-node call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Serialized as `null` when the node has no resolved address
    pub ip_address: Option<String>,
    pub hardware_id: String,
}

/// Opaque response body, kept only for logging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePayload(pub serde_json::Value);

impl fmt::Display for RemotePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ping response: only `status` is inspected, the rest passes through
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingStatus {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PingStatus {
    pub fn status_or_unknown(&self) -> &str {
        self.status.as_deref().unwrap_or("unknown")
    }
}

/// Per-node lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, not yet started
    Idle,
    /// Resolving the node's public IP through its proxy
    DiscoveringIp,
    Registering,
    StartingSession,
    /// Session established, pings running on a fixed period
    Heartbeating,
    /// An attempt failed, the error is being reported
    Failed,
    /// Waiting out the restart backoff before the next attempt
    Restarting,
    /// Cancelled by the fleet; never reached through normal operation
    Stopped,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::DiscoveringIp => "discovering_ip",
            Self::Registering => "registering",
            Self::StartingSession => "starting_session",
            Self::Heartbeating => "heartbeating",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Observable status of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub state: LifecycleState,

    /// Attempt number, starting at 1 and bumped on every restart
    pub attempt: u64,
}

impl NodeStatus {
    pub fn new(state: LifecycleState, attempt: u64) -> Self {
        Self { state, attempt }
    }
}

/// Structured events handed to the presenter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// First launch only
    StartupBanner { version: String },
    FleetStarting {
        generation: u64,
        nodes: usize,
        proxy_mode: bool,
    },
    NodeProcessing {
        node_id: String,
        hardware_id: String,
        proxy: ProxyAssignment,
        attempt: u64,
    },
    IpResolved { node_id: String, ip: String },
    NodeRegistered {
        node_id: String,
        payload: RemotePayload,
    },
    SessionStarted {
        node_id: String,
        payload: RemotePayload,
    },
    PingSucceeded {
        node_id: String,
        status: String,
        proxy: ProxyAssignment,
        ip: Option<String>,
    },
    PingFailed {
        node_id: String,
        kind: &'static str,
        error: String,
    },
    NodeFailed {
        node_id: String,
        state: LifecycleState,
        kind: &'static str,
        error: String,
    },
    FleetRestarting { generation: u64, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        let id: NodeIdentity = "node-1:hw-abc\r".parse().unwrap();
        assert_eq!(id, NodeIdentity::new("node-1", "hw-abc"));
        assert_eq!(id.to_string(), "node-1:hw-abc");

        let extra: NodeIdentity = "n:h:x".parse().unwrap();
        assert_eq!(extra, NodeIdentity::new("n", "h"));

        assert!("node-1".parse::<NodeIdentity>().is_err());
        assert!(":hw".parse::<NodeIdentity>().is_err());
    }

    #[test]
    fn test_register_request_shape() {
        let body = RegisterRequest {
            ip_address: None,
            hardware_id: "hw".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "ipAddress": null, "hardwareId": "hw" }));
    }

    #[test]
    fn test_ping_status_passthrough() {
        let ping: PingStatus =
            serde_json::from_str(r#"{"status":"ok","uptime":42}"#).unwrap();
        assert_eq!(ping.status_or_unknown(), "ok");
        assert_eq!(ping.extra["uptime"], 42);

        let bare: PingStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.status_or_unknown(), "unknown");
    }

    #[test]
    fn test_proxy_assignment() {
        assert!(!ProxyAssignment::direct().is_proxied());
        assert_eq!(ProxyAssignment::direct().to_string(), "none");

        let proxy = ProxyAssignment::via("http://user:pw@10.0.0.1:8080");
        assert_eq!(proxy.url(), Some("http://user:pw@10.0.0.1:8080"));
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::FleetRestarting {
            generation: 2,
            reason: "panic".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "fleet_restarting");
        assert_eq!(json["generation"], 2);
    }
}
