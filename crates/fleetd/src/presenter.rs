//! Lifecycle event presentation.
//!
//! The core only emits [`LifecycleEvent`]s; how they look is up to the
//! presenter. The production presenter writes them to `tracing`.

use nodefleet_common::LifecycleEvent;

/// Receives structured lifecycle events for display
pub trait Presenter: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

const BANNER: &[&str] = &[
    r"  _   _           _       __ _           _   ",
    r" | \ | | ___   __| | ___ / _| | ___  ___| |_ ",
    r" |  \| |/ _ \ / _` |/ _ \ |_| |/ _ \/ _ \ __|",
    r" | |\  | (_) | (_| |  __/  _| |  __/  __/ |_ ",
    r" |_| \_|\___/ \__,_|\___|_| |_|\___|\___|\__|",
];

/// Writes every event as one structured `tracing` record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPresenter;

impl Presenter for TracingPresenter {
    fn emit(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::StartupBanner { version } => {
                for line in BANNER {
                    tracing::info!("{}", line);
                }
                tracing::info!("🛰️ Nodefleet daemon v{}", version);
            }
            LifecycleEvent::FleetStarting {
                generation,
                nodes,
                proxy_mode,
            } => {
                tracing::info!(generation, nodes, proxy_mode, "🚀 Starting fleet");
            }
            LifecycleEvent::NodeProcessing {
                node_id,
                hardware_id,
                proxy,
                attempt,
            } => {
                tracing::info!(
                    node_id = %node_id,
                    hardware_id = %hardware_id,
                    proxy = %proxy,
                    attempt,
                    "Processing node"
                );
            }
            LifecycleEvent::IpResolved { node_id, ip } => {
                tracing::info!(node_id = %node_id, ip = %ip, "IP resolved");
            }
            LifecycleEvent::NodeRegistered { node_id, payload } => {
                tracing::info!(node_id = %node_id, response = %payload, "✅ Node registered");
            }
            LifecycleEvent::SessionStarted { node_id, payload } => {
                tracing::info!(node_id = %node_id, response = %payload, "✅ Session started");
            }
            LifecycleEvent::PingSucceeded {
                node_id,
                status,
                proxy,
                ip,
            } => {
                tracing::info!(
                    node_id = %node_id,
                    status = %status,
                    proxy = %proxy,
                    ip = ip.as_deref().unwrap_or("none"),
                    "Ping response"
                );
            }
            LifecycleEvent::PingFailed {
                node_id,
                kind,
                error,
            } => {
                tracing::warn!(node_id = %node_id, kind, error = %error, "Ping failed");
            }
            LifecycleEvent::NodeFailed {
                node_id,
                state,
                kind,
                error,
            } => {
                tracing::error!(
                    node_id = %node_id,
                    state = %state,
                    kind,
                    error = %error,
                    "Node failed, restarting"
                );
            }
            LifecycleEvent::FleetRestarting { generation, reason } => {
                tracing::error!(generation, reason = %reason, "🔁 Fleet failure, restarting fleet");
            }
        }
    }
}
