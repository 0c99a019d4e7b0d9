//! HTTP transport for the remote node API.
//!
//! Four calls, no retries. Every failure is classified as `Network`,
//! `Protocol`, or `Remote`; what to do about it is the caller's business.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use nodefleet_common::constants::{MAX_ERROR_BODY_CHARS, routes};
use nodefleet_common::{FleetError, IpInfo, PingStatus, ProxyAssignment, RegisterRequest, RemotePayload};

/// Remote operations a node lifecycle needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET <ip-service>`, through the node's proxy
    async fn discover_ip(&self, proxy: &ProxyAssignment) -> Result<IpInfo, FleetError>;

    /// `POST <api>/nodes/{node_id}`
    async fn register_node(
        &self,
        node_id: &str,
        request: &RegisterRequest,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RemotePayload, FleetError>;

    /// `POST <api>/nodes/{node_id}/start-session`
    async fn start_session(
        &self,
        node_id: &str,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RemotePayload, FleetError>;

    /// `POST <api>/nodes/{node_id}/ping`
    async fn ping_node(
        &self,
        node_id: &str,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<PingStatus, FleetError>;
}

/// `reqwest`-backed transport with one client per proxy
pub struct HttpTransport {
    api_base_url: String,
    ip_service_url: String,
    timeout: Option<Duration>,
    /// Client for unproxied calls (ignores HTTP_PROXY and friends)
    direct: Client,
    /// Lazily built clients, keyed by proxy URL
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpTransport {
    pub fn new(
        api_base_url: impl Into<String>,
        ip_service_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FleetError> {
        let direct = client_builder(timeout)
            .no_proxy()
            .build()
            .map_err(|e| FleetError::Configuration(format!("HTTP client: {}", describe(&e))))?;

        Ok(Self {
            api_base_url: api_base_url.into(),
            ip_service_url: ip_service_url.into(),
            timeout,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// Get (or build) the client for a proxy assignment
    fn client_for(&self, proxy: &ProxyAssignment) -> Result<Client, FleetError> {
        let Some(url) = proxy.url() else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }

        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| FleetError::Network(format!("invalid proxy {}: {}", url, describe(&e))))?;
        let client = client_builder(self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| FleetError::Network(format!("proxy client {}: {}", url, describe(&e))))?;

        tracing::debug!(proxy = %url, "Built proxied HTTP client");
        clients.insert(url.to_string(), client.clone());

        Ok(client)
    }

    fn authed_post(
        &self,
        url: &str,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RequestBuilder, FleetError> {
        Ok(self.client_for(proxy)?.post(url).bearer_auth(token))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn discover_ip(&self, proxy: &ProxyAssignment) -> Result<IpInfo, FleetError> {
        let request = self.client_for(proxy)?.get(&self.ip_service_url);
        read_json(send(request).await?).await
    }

    async fn register_node(
        &self,
        node_id: &str,
        request: &RegisterRequest,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RemotePayload, FleetError> {
        let url = routes::register(&self.api_base_url, node_id);
        // .json() also sets Content-Type: application/json
        let request = self.authed_post(&url, proxy, token)?.json(request);
        read_json(send(request).await?).await
    }

    async fn start_session(
        &self,
        node_id: &str,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RemotePayload, FleetError> {
        let url = routes::start_session(&self.api_base_url, node_id);
        let request = self.authed_post(&url, proxy, token)?;
        read_json(send(request).await?).await
    }

    async fn ping_node(
        &self,
        node_id: &str,
        proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<PingStatus, FleetError> {
        let url = routes::ping(&self.api_base_url, node_id);
        let request = self.authed_post(&url, proxy, token)?;
        read_json(send(request).await?).await
    }
}

fn client_builder(timeout: Option<Duration>) -> reqwest::ClientBuilder {
    let builder = Client::builder().user_agent(concat!("fleetd/", env!("CARGO_PKG_VERSION")));
    match timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

async fn send(request: RequestBuilder) -> Result<Response, FleetError> {
    request
        .send()
        .await
        .map_err(|e| FleetError::Network(describe(&e)))
}

/// Read the body, then classify: non-2xx is `Remote`, unparseable is `Protocol`
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, FleetError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| FleetError::Network(describe(&e)))?;

    if !status.is_success() {
        return Err(FleetError::Remote {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| FleetError::Protocol(format!("{} (body: {:?})", e, truncate(&body))))
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Flatten an error and its sources into one line
fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
