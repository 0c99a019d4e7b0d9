//! Fleet supervisor.
//!
//! Loads the identity and proxy lists, launches one lifecycle per identity,
//! and restarts the whole fleet when a failure escapes every node's own
//! recovery (a lifecycle task that panics or exits on its own).

use serde::Deserialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use nodefleet_common::constants::FLEET_START_RETRY_SECS;
use nodefleet_common::{FleetError, LifecycleEvent, NodeIdentity, ProxyAssignment};

use crate::lifecycle::{LifecycleSettings, NodeDeps, NodeHandle, NodeLifecycle, RestartPolicy};
use crate::sources::{IdentitySource, ProxySource};

/// Fleet-wide switches, passed in on every (re)start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetConfig {
    /// Route each node through its own proxy and discover its IP
    pub proxy_mode: bool,
    /// Show the one-time startup banner
    pub initial_run: bool,
}

impl FleetConfig {
    /// Same settings, minus the one-time startup steps
    pub fn for_restart(self) -> Self {
        Self {
            initial_run: false,
            ..self
        }
    }
}

/// How a fleet's lifecycles are discarded on restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Abort every task in place, without signalling or awaiting it
    #[default]
    Abandon,
    /// Cancel every lifecycle and wait until each has stopped
    Drain,
}

/// Pair identities with proxies by position.
///
/// With proxy mode on, the two lists must be the same length and every
/// proxy must be a usable proxy URL.
pub fn assign_proxies(
    identities: Vec<NodeIdentity>,
    proxies: Vec<String>,
    proxy_mode: bool,
) -> Result<Vec<(NodeIdentity, ProxyAssignment)>, FleetError> {
    if !proxy_mode {
        return Ok(identities
            .into_iter()
            .map(|identity| (identity, ProxyAssignment::direct()))
            .collect());
    }

    if proxies.len() != identities.len() {
        return Err(FleetError::Configuration(format!(
            "Number of proxies ({}) does not match number of nodeId:hardwareId pairs ({})",
            proxies.len(),
            identities.len()
        )));
    }

    for (idx, proxy) in proxies.iter().enumerate() {
        if let Err(e) = reqwest::Proxy::all(proxy.as_str()) {
            return Err(FleetError::Configuration(format!(
                "proxy {}: invalid proxy {:?}: {}",
                idx + 1,
                proxy,
                e
            )));
        }
    }

    Ok(identities
        .into_iter()
        .zip(proxies)
        .map(|(identity, proxy)| (identity, ProxyAssignment::via(proxy)))
        .collect())
}

/// One generation of the fleet and its running lifecycles
pub struct FleetRunState {
    generation: u64,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    nodes: Vec<NodeHandle>,
}

impl FleetRunState {
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Wait for a failure that escaped node-level recovery.
    ///
    /// Pends forever while every lifecycle is healthy.
    pub async fn wait_fatal(&mut self) -> FleetError {
        loop {
            match self.tasks.join_next().await {
                None => return std::future::pending().await,
                Some(Ok(())) if self.cancel.is_cancelled() => continue,
                Some(Ok(())) => {
                    return FleetError::FleetFatal("a node lifecycle exited unexpectedly".into());
                }
                Some(Err(e)) if e.is_panic() => {
                    return FleetError::FleetFatal(panic_message(e.into_panic()));
                }
                Some(Err(_)) => continue,
            }
        }
    }

    /// Discard every lifecycle of this generation
    pub async fn shutdown(mut self, mode: RestartMode) {
        match mode {
            RestartMode::Abandon => {
                self.tasks.abort_all();
                tracing::debug!(generation = self.generation, "Fleet abandoned");
            }
            RestartMode::Drain => {
                self.cancel.cancel();
                while self.tasks.join_next().await.is_some() {}
                tracing::debug!(generation = self.generation, "Fleet drained");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("node lifecycle panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("node lifecycle panicked: {}", message)
    } else {
        "node lifecycle panicked".to_string()
    }
}

/// Launches and restarts the fleet
pub struct FleetSupervisor {
    identities: Arc<dyn IdentitySource>,
    proxies: Arc<dyn ProxySource>,
    deps: NodeDeps,
    settings: LifecycleSettings,
    restart_mode: RestartMode,
}

impl FleetSupervisor {
    pub fn new(
        identities: Arc<dyn IdentitySource>,
        proxies: Arc<dyn ProxySource>,
        deps: NodeDeps,
        settings: LifecycleSettings,
        restart_mode: RestartMode,
    ) -> Self {
        Self {
            identities,
            proxies,
            deps,
            settings,
            restart_mode,
        }
    }

    /// Load, validate, and launch one generation of the fleet.
    ///
    /// Fails before any remote call if the lists cannot be read or do not
    /// line up. Lifecycles are spawned without waiting on each other.
    pub async fn start_fleet(
        &self,
        config: FleetConfig,
        generation: u64,
    ) -> Result<FleetRunState, FleetError> {
        if config.initial_run {
            self.deps.presenter.emit(LifecycleEvent::StartupBanner {
                version: env!("CARGO_PKG_VERSION").to_string(),
            });
        }

        let identities = self.identities.list().await?;
        let proxies = if config.proxy_mode {
            self.proxies.list().await?
        } else {
            Vec::new()
        };
        let assignments = assign_proxies(identities, proxies, config.proxy_mode)?;

        self.deps.presenter.emit(LifecycleEvent::FleetStarting {
            generation,
            nodes: assignments.len(),
            proxy_mode: config.proxy_mode,
        });

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut nodes = Vec::with_capacity(assignments.len());

        for (identity, proxy) in assignments {
            let (lifecycle, handle) =
                NodeLifecycle::new(identity, proxy, self.deps.clone(), self.settings);
            tasks.spawn(lifecycle.run(cancel.child_token()));
            nodes.push(handle);
        }

        Ok(FleetRunState {
            generation,
            cancel,
            tasks,
            nodes,
        })
    }

    /// Run the fleet until `shutdown` fires, restarting it on fatal failure.
    ///
    /// A first launch that cannot start returns its error. On a restart,
    /// transient start errors (a list being rewritten) are retried after
    /// [`FLEET_START_RETRY_SECS`]; configuration errors are still returned.
    pub async fn run(
        &self,
        mut config: FleetConfig,
        shutdown: CancellationToken,
    ) -> Result<(), FleetError> {
        let mut generation = 1;

        loop {
            let mut fleet = match self.start_fleet(config, generation).await {
                Ok(fleet) => fleet,
                Err(e) if generation > 1 && e.is_transient() => {
                    self.deps.presenter.emit(LifecycleEvent::FleetRestarting {
                        generation,
                        reason: e.to_string(),
                    });
                    if !self.start_retry().wait(&shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let fatal = tokio::select! {
                _ = shutdown.cancelled() => None,
                fatal = fleet.wait_fatal() => Some(fatal),
            };

            let Some(fatal) = fatal else {
                fleet.shutdown(RestartMode::Drain).await;
                tracing::info!(generation, "Fleet stopped");
                return Ok(());
            };

            self.deps.presenter.emit(LifecycleEvent::FleetRestarting {
                generation,
                reason: fatal.to_string(),
            });
            fleet.shutdown(self.restart_mode).await;

            if !self.settings.restart.wait(&shutdown).await {
                return Ok(());
            }

            config = config.for_restart();
            generation += 1;
        }
    }

    fn start_retry(&self) -> RestartPolicy {
        RestartPolicy {
            backoff: self
                .settings
                .restart
                .backoff
                .max(Duration::from_secs(FLEET_START_RETRY_SECS)),
        }
    }
}
