//! Drydock client configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the control-plane API.
    pub api_url: String,
    /// Bearer token for control-plane calls.
    pub api_token: String,
    /// URL of the SQS-compatible build queue.
    pub queue_url: String,
    /// Capacity of the in-memory queue buffer.
    pub queue_capacity: usize,
    /// Connect timeout for HTTP calls, in seconds.
    pub connect_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let api_url = std::env::var("DRYDOCK_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let api_token = std::env::var("DRYDOCK_API_TOKEN").unwrap_or_default();
        let queue_url = std::env::var("DRYDOCK_QUEUE_URL").unwrap_or_default();
        let queue_capacity = std::env::var("DRYDOCK_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        let connect_timeout_secs = std::env::var("DRYDOCK_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        if api_token.is_empty() {
            tracing::warn!("DRYDOCK_API_TOKEN not set -- control-plane calls are unauthenticated");
        }
        if queue_url.is_empty() {
            tracing::warn!("DRYDOCK_QUEUE_URL not set -- remote queue disabled");
        }

        Self {
            api_url,
            api_token,
            queue_url,
            queue_capacity,
            connect_timeout_secs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            api_token: String::new(),
            queue_url: String::new(),
            queue_capacity: 100,
            connect_timeout_secs: 30,
        }
    }
}
