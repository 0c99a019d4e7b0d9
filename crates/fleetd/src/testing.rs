//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use nodefleet_common::{
    FleetError, IpInfo, LifecycleEvent, PingStatus, ProxyAssignment, RegisterRequest, RemotePayload,
};

use crate::presenter::Presenter;
use crate::transport::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    DiscoverIp,
    Register,
    StartSession,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DiscoverIp {
        proxy: ProxyAssignment,
    },
    Register {
        node_id: String,
        ip: Option<String>,
        hardware_id: String,
        token: String,
    },
    StartSession {
        node_id: String,
    },
    Ping {
        node_id: String,
    },
}

impl Call {
    fn op(&self) -> Op {
        match self {
            Self::DiscoverIp { .. } => Op::DiscoverIp,
            Self::Register { .. } => Op::Register,
            Self::StartSession { .. } => Op::StartSession,
            Self::Ping { .. } => Op::Ping,
        }
    }

    /// Node ID, or the proxy URL for IP discovery
    fn key(&self) -> String {
        match self {
            Self::DiscoverIp { proxy } => proxy.to_string(),
            Self::Register { node_id, .. }
            | Self::StartSession { node_id }
            | Self::Ping { node_id } => node_id.clone(),
        }
    }
}

enum Fault {
    Fail(FleetError),
    Panic(String),
}

/// Scripted transport: every call succeeds unless a fault is queued for
/// the n-th call of that operation and key.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashMap<(Op, String, usize), Fault>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: Op, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.op() == op && call.key() == key)
            .count()
    }

    /// Fail the n-th call (1-based) of `op` for `key`
    pub fn fail_nth(&self, op: Op, key: &str, n: usize, error: FleetError) {
        lock(&self.faults).insert((op, key.to_string(), n), Fault::Fail(error));
    }

    /// Fail the next not-yet-scripted call of `op` for `key`
    pub fn fail_next(&self, op: Op, key: &str, error: FleetError) {
        let n = self.next_unscripted(op, key);
        self.fail_nth(op, key, n, error);
    }

    /// Panic on the n-th call of `op` for `key`, escaping the node's recovery
    pub fn panic_nth(&self, op: Op, key: &str, n: usize, message: &str) {
        lock(&self.faults).insert((op, key.to_string(), n), Fault::Panic(message.to_string()));
    }

    fn next_unscripted(&self, op: Op, key: &str) -> usize {
        let faults = lock(&self.faults);
        let mut n = self.count(op, key) + 1;
        while faults.contains_key(&(op, key.to_string(), n)) {
            n += 1;
        }
        n
    }

    fn record(&self, call: Call) -> Result<(), FleetError> {
        let (op, key) = (call.op(), call.key());
        let n = {
            let mut calls = lock(&self.calls);
            calls.push(call);
            calls.iter().filter(|c| c.op() == op && c.key() == key).count()
        };

        let fault = lock(&self.faults).remove(&(op, key, n));
        match fault {
            None => Ok(()),
            Some(Fault::Fail(error)) => Err(error),
            Some(Fault::Panic(message)) => panic!("{}", message),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover_ip(&self, proxy: &ProxyAssignment) -> Result<IpInfo, FleetError> {
        self.record(Call::DiscoverIp {
            proxy: proxy.clone(),
        })?;
        Ok(IpInfo {
            ip: format!("ip-via-{}", proxy),
        })
    }

    async fn register_node(
        &self,
        node_id: &str,
        request: &RegisterRequest,
        _proxy: &ProxyAssignment,
        token: &str,
    ) -> Result<RemotePayload, FleetError> {
        self.record(Call::Register {
            node_id: node_id.to_string(),
            ip: request.ip_address.clone(),
            hardware_id: request.hardware_id.clone(),
            token: token.to_string(),
        })?;
        Ok(RemotePayload(json!({ "nodeId": node_id })))
    }

    async fn start_session(
        &self,
        node_id: &str,
        _proxy: &ProxyAssignment,
        _token: &str,
    ) -> Result<RemotePayload, FleetError> {
        self.record(Call::StartSession {
            node_id: node_id.to_string(),
        })?;
        Ok(RemotePayload(json!({ "sessionId": format!("s-{}", node_id) })))
    }

    async fn ping_node(
        &self,
        node_id: &str,
        _proxy: &ProxyAssignment,
        _token: &str,
    ) -> Result<PingStatus, FleetError> {
        self.record(Call::Ping {
            node_id: node_id.to_string(),
        })?;
        Ok(PingStatus {
            status: Some("ok".to_string()),
            ..Default::default()
        })
    }
}

/// Keeps every emitted event
#[derive(Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| predicate(*e)).count()
    }
}

impl Presenter for RecordingPresenter {
    fn emit(&self, event: LifecycleEvent) {
        lock(&self.events).push(event);
    }
}
