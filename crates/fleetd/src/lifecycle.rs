//! Per-node lifecycle.
//!
//! Drives one node through
//! `DiscoveringIp → Registering → StartingSession → Heartbeating` and
//! restarts it from the top on any failure, forever. A node's failure is
//! reported through the presenter and never leaves this module.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use nodefleet_common::constants::HEARTBEAT_INTERVAL_SECS;
use nodefleet_common::{
    FleetError, LifecycleEvent, LifecycleState, NodeIdentity, NodeStatus, ProxyAssignment,
    RegisterRequest,
};

use crate::heartbeat::{HeartbeatScheduler, PingFailurePolicy};
use crate::presenter::Presenter;
use crate::sources::CredentialSource;
use crate::transport::Transport;

/// Delay between a node failure and its next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy {
    /// Zero means restart immediately
    pub backoff: Duration,
}

impl RestartPolicy {
    pub const IMMEDIATE: RestartPolicy = RestartPolicy {
        backoff: Duration::ZERO,
    };

    /// Wait out the backoff. Returns false if cancelled meanwhile.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        if self.backoff.is_zero() {
            // Still yield, so a node failing without I/O cannot starve the others
            tokio::task::yield_now().await;
            return !cancel.is_cancelled();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}

/// Timing and failure policy shared by every node of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub heartbeat_period: Duration,
    pub restart: RestartPolicy,
    pub ping_failure_policy: PingFailurePolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            restart: RestartPolicy::IMMEDIATE,
            ping_failure_policy: PingFailurePolicy::Restart,
        }
    }
}

/// Collaborators every lifecycle talks to
#[derive(Clone)]
pub struct NodeDeps {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialSource>,
    pub presenter: Arc<dyn Presenter>,
}

/// In-memory state of one attempt; rebuilt on every restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSession {
    pub node_id: String,
    pub assigned_proxy: ProxyAssignment,
    pub resolved_ip: Option<String>,
    pub session_established: bool,
}

impl NodeSession {
    fn new(identity: &NodeIdentity, proxy: &ProxyAssignment) -> Self {
        Self {
            node_id: identity.node_id.clone(),
            assigned_proxy: proxy.clone(),
            resolved_ip: None,
            session_established: false,
        }
    }
}

/// Read side of a lifecycle's status
#[derive(Debug, Clone)]
pub struct NodeHandle {
    node_id: String,
    status: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    /// Wait until the node reports `state`
    pub async fn wait_for(&mut self, state: LifecycleState) -> Option<NodeStatus> {
        self.status
            .wait_for(|status| status.state == state)
            .await
            .ok()
            .map(|status| *status)
    }
}

/// One node's supervisor loop
pub struct NodeLifecycle {
    identity: NodeIdentity,
    proxy: ProxyAssignment,
    deps: NodeDeps,
    settings: LifecycleSettings,
    status: watch::Sender<NodeStatus>,
    attempt: u64,
}

impl NodeLifecycle {
    pub fn new(
        identity: NodeIdentity,
        proxy: ProxyAssignment,
        deps: NodeDeps,
        settings: LifecycleSettings,
    ) -> (Self, NodeHandle) {
        let (status, receiver) = watch::channel(NodeStatus::default());
        let handle = NodeHandle {
            node_id: identity.node_id.clone(),
            status: receiver,
        };

        let lifecycle = Self {
            identity,
            proxy,
            deps,
            settings,
            status,
            attempt: 0,
        };

        (lifecycle, handle)
    }

    fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    fn set_state(&self, state: LifecycleState) {
        self.status.send_replace(NodeStatus::new(state, self.attempt));
    }

    fn emit(&self, event: LifecycleEvent) {
        self.deps.presenter.emit(event);
    }

    /// Run until `cancel` fires. Node-level errors never escape.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            self.attempt += 1;
            let mut session = NodeSession::new(&self.identity, &self.proxy);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.attempt_once(&mut session, &cancel) => result,
            };

            // Ok only when the heartbeat stopped for cancellation
            let Err(error) = result else { break };

            let failed_in = self.state();
            self.set_state(LifecycleState::Failed);
            self.emit(LifecycleEvent::NodeFailed {
                node_id: self.identity.node_id.clone(),
                state: failed_in,
                kind: error.kind(),
                error: error.to_string(),
            });

            self.set_state(LifecycleState::Restarting);
            if !self.settings.restart.wait(&cancel).await {
                break;
            }
        }

        self.set_state(LifecycleState::Stopped);
        tracing::debug!(node_id = %self.identity.node_id, "Lifecycle stopped");
    }

    /// One pass from IP discovery to the end of heartbeating
    async fn attempt_once(
        &self,
        session: &mut NodeSession,
        cancel: &CancellationToken,
    ) -> Result<(), FleetError> {
        let node_id = &self.identity.node_id;

        self.emit(LifecycleEvent::NodeProcessing {
            node_id: node_id.clone(),
            hardware_id: self.identity.hardware_id.clone(),
            proxy: session.assigned_proxy.clone(),
            attempt: self.attempt,
        });

        // Without a proxy the address stays unresolved and is sent as null
        if session.assigned_proxy.is_proxied() {
            self.set_state(LifecycleState::DiscoveringIp);
            let info = self.deps.transport.discover_ip(&session.assigned_proxy).await?;
            self.emit(LifecycleEvent::IpResolved {
                node_id: node_id.clone(),
                ip: info.ip.clone(),
            });
            session.resolved_ip = Some(info.ip);
        }

        self.set_state(LifecycleState::Registering);
        let request = RegisterRequest {
            ip_address: session.resolved_ip.clone(),
            hardware_id: self.identity.hardware_id.clone(),
        };
        let token = self.deps.credentials.token().await?;
        let payload = self
            .deps
            .transport
            .register_node(node_id, &request, &session.assigned_proxy, &token)
            .await?;
        self.emit(LifecycleEvent::NodeRegistered {
            node_id: node_id.clone(),
            payload,
        });

        self.set_state(LifecycleState::StartingSession);
        let token = self.deps.credentials.token().await?;
        let payload = self
            .deps
            .transport
            .start_session(node_id, &session.assigned_proxy, &token)
            .await?;
        session.session_established = true;
        self.emit(LifecycleEvent::SessionStarted {
            node_id: node_id.clone(),
            payload,
        });

        // A dead session fails here, before the timer is committed
        self.ping(session).await?;

        self.set_state(LifecycleState::Heartbeating);
        let scheduler =
            HeartbeatScheduler::new(self.settings.heartbeat_period, self.settings.ping_failure_policy);
        let session: &NodeSession = session;
        let ticks = scheduler.run(cancel, move |_| self.ping(session)).await?;

        tracing::debug!(node_id = %node_id, ticks, "Heartbeat cancelled");
        Ok(())
    }

    async fn ping(&self, session: &NodeSession) -> Result<(), FleetError> {
        let result = match self.deps.credentials.token().await {
            Ok(token) => {
                self.deps
                    .transport
                    .ping_node(&session.node_id, &session.assigned_proxy, &token)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(ping) => {
                self.emit(LifecycleEvent::PingSucceeded {
                    node_id: session.node_id.clone(),
                    status: ping.status_or_unknown().to_string(),
                    proxy: session.assigned_proxy.clone(),
                    ip: session.resolved_ip.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.emit(LifecycleEvent::PingFailed {
                    node_id: session.node_id.clone(),
                    kind: e.kind(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
