//! Configuration management for Fleetd.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use nodefleet_common::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_ID_PATH, DEFAULT_IP_SERVICE_URL, DEFAULT_PROXY_PATH,
    DEFAULT_RESTART_BACKOFF_MS, DEFAULT_USER_PATH, HEARTBEAT_INTERVAL_SECS,
};

use crate::heartbeat::PingFailurePolicy;
use crate::lifecycle::{LifecycleSettings, RestartPolicy};
use crate::supervisor::{FleetConfig, RestartMode};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the node API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// IP discovery service URL
    #[serde(default = "default_ip_service_url")]
    pub ip_service_url: String,

    /// Route every node through its own proxy
    #[serde(default)]
    pub use_proxy: bool,

    /// Seconds between heartbeat pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Delay before a failed node restarts
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_ms: u64,

    /// Per-request timeout; unset means the HTTP stack's own behavior
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// What a failed heartbeat tick does to its node
    #[serde(default)]
    pub ping_failure_policy: PingFailurePolicy,

    /// How lifecycles are discarded on fleet restart
    #[serde(default)]
    pub restart_mode: RestartMode,

    /// Identity, proxy, and credential files
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Locations of the identity, proxy, and token files
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_id_path")]
    pub id_path: String,

    #[serde(default = "default_proxy_path")]
    pub proxy_path: String,

    #[serde(default = "default_user_path")]
    pub user_path: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            id_path: default_id_path(),
            proxy_path: default_proxy_path(),
            user_path: default_user_path(),
        }
    }
}

/// Values taken from the command line or environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub use_proxy: Option<bool>,
    pub id_path: Option<String>,
    pub proxy_path: Option<String>,
    pub user_path: Option<String>,
}

/// Parse an on/off switch from the environment.
///
/// Only the exact string `true` turns a switch on; anything else is off.
pub fn parse_env_flag(value: &str) -> Result<bool, String> {
    Ok(value == "true")
}

// Default value functions
fn default_api_base_url() -> String { DEFAULT_API_BASE_URL.to_string() }
fn default_ip_service_url() -> String { DEFAULT_IP_SERVICE_URL.to_string() }
fn default_heartbeat_interval() -> u64 { HEARTBEAT_INTERVAL_SECS }
fn default_restart_backoff() -> u64 { DEFAULT_RESTART_BACKOFF_MS }
fn default_id_path() -> String { DEFAULT_ID_PATH.to_string() }
fn default_proxy_path() -> String { DEFAULT_PROXY_PATH.to_string() }
fn default_user_path() -> String { DEFAULT_USER_PATH.to_string() }

impl AppConfig {
    /// Load configuration from file, with CLI/env overrides
    pub fn load(config_path: &str, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply(overrides);

        if config.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be greater than zero");
        }

        Ok(config)
    }

    fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref url) = overrides.api_base_url {
            self.api_base_url = url.clone();
        }
        if let Some(use_proxy) = overrides.use_proxy {
            self.use_proxy = use_proxy;
        }
        if let Some(ref path) = overrides.id_path {
            self.sources.id_path = path.clone();
        }
        if let Some(ref path) = overrides.proxy_path {
            self.sources.proxy_path = path.clone();
        }
        if let Some(ref path) = overrides.user_path {
            self.sources.user_path = path.clone();
        }
    }

    /// Fleet-level switches for the first launch
    pub fn fleet_config(&self, initial_run: bool) -> FleetConfig {
        FleetConfig {
            proxy_mode: self.use_proxy,
            initial_run,
        }
    }

    /// Per-node timing and failure policy
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            heartbeat_period: Duration::from_secs(self.heartbeat_interval_secs),
            restart: RestartPolicy {
                backoff: Duration::from_millis(self.restart_backoff_ms),
            },
            ping_failure_policy: self.ping_failure_policy,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ip_service_url: default_ip_service_url(),
            use_proxy: false,
            heartbeat_interval_secs: default_heartbeat_interval(),
            restart_backoff_ms: default_restart_backoff(),
            request_timeout_secs: None,
            ping_failure_policy: PingFailurePolicy::default(),
            restart_mode: RestartMode::default(),
            sources: SourcesConfig::default(),
        }
    }
}
