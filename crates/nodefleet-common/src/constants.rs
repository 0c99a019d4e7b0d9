//! Shared constants for Nodefleet components.

/// Base URL of the node registration/session API
pub const DEFAULT_API_BASE_URL: &str = "https://gateway-run.bls.dev/api/v1";

/// Service answering `GET` with `{ "ip": "..." }` for the caller's public address
pub const DEFAULT_IP_SERVICE_URL: &str = "https://tight-block-2413.txlabs.workers.dev";

/// Heartbeat period for an established session (seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Default delay between a node failure and its restart (milliseconds)
pub const DEFAULT_RESTART_BACKOFF_MS: u64 = 0;

/// Minimum wait before retrying a fleet restart whose lists could not be read (seconds)
pub const FLEET_START_RETRY_SECS: u64 = 5;

/// Default file listing `nodeId:hardwareId` pairs
pub const DEFAULT_ID_PATH: &str = "id.txt";

/// Default file listing one proxy URL per line
pub const DEFAULT_PROXY_PATH: &str = "proxy.txt";

/// Default file holding the bearer token
pub const DEFAULT_USER_PATH: &str = "user.txt";

/// Longest raw response body kept in a protocol/remote error
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Remote API routes, relative to the API base URL
pub mod routes {
    /// `POST {base}/nodes/{node_id}`
    pub fn register(base: &str, node_id: &str) -> String {
        format!("{}/nodes/{}", base.trim_end_matches('/'), node_id)
    }

    /// `POST {base}/nodes/{node_id}/start-session`
    pub fn start_session(base: &str, node_id: &str) -> String {
        format!("{}/start-session", register(base, node_id))
    }

    /// `POST {base}/nodes/{node_id}/ping`
    pub fn ping(base: &str, node_id: &str) -> String {
        format!("{}/ping", register(base, node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::routes;

    #[test]
    fn test_routes() {
        assert_eq!(
            routes::register("https://api.test/v1/", "n1"),
            "https://api.test/v1/nodes/n1"
        );
        assert_eq!(
            routes::start_session("https://api.test/v1", "n1"),
            "https://api.test/v1/nodes/n1/start-session"
        );
        assert_eq!(
            routes::ping("https://api.test/v1", "n1"),
            "https://api.test/v1/nodes/n1/ping"
        );
    }
}
