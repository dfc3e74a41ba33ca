//! Configuration for the chat client.

use std::time::Duration;

/// Configuration for the chat client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://localhost:8080/api`.
    pub api_base_url: String,
    /// Socket endpoint, e.g. `ws://localhost:8080/ws`.
    pub ws_url: String,
    /// Fixed delay before a reconnect attempt, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Maximum reconnect attempts (None = until teardown).
    pub max_reconnect_attempts: Option<u32>,
    /// Idle time after the last keystroke before `stop_typing` is sent.
    pub typing_idle_ms: u64,
    /// Lifetime of a remote "is typing" indicator without a refresh.
    pub typing_expiry_ms: u64,
    /// Delay before the authoritative list refresh after a conversation delete.
    pub index_refresh_delay_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum retries for idempotent REST reads.
    pub max_retries: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Maximum outbound message size in bytes.
    pub max_content_bytes: usize,
    /// Minimum search fragment length.
    pub search_min_chars: usize,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: None,
            typing_idle_ms: 2000,
            typing_expiry_ms: 3000,
            index_refresh_delay_ms: 500,
            request_timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 500,
            max_content_bytes: 4096,
            search_min_chars: 2,
            outbound_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CHATLINE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CHATLINE_API_URL") {
            config.api_base_url = val;
        }
        if let Ok(val) = std::env::var("CHATLINE_WS_URL") {
            config.ws_url = val;
        }
        if let Some(val) = env_parse("CHATLINE_RECONNECT_DELAY_MS") {
            config.reconnect_delay_ms = val;
        }
        if let Some(val) = env_parse("CHATLINE_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = val;
        }
        if let Some(val) = env_parse("CHATLINE_MAX_RETRIES") {
            config.max_retries = val;
        }

        config
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }

    pub fn index_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.index_refresh_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.typing_idle_ms, 2000);
        assert_eq!(config.typing_expiry_ms, 3000);
        assert_eq!(config.index_refresh_delay_ms, 500);
        assert_eq!(config.search_min_chars, 2);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_override() {
        let config = ClientConfig {
            typing_idle_ms: 10,
            ..Default::default()
        };
        assert_eq!(config.typing_idle(), Duration::from_millis(10));
        assert_eq!(config.typing_expiry_ms, 3000);
    }

    #[test]
    fn test_clone() {
        let config = ClientConfig::default();
        let cloned = config.clone();
        assert_eq!(config, cloned);
    }
}
