//! Listener configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OpenLiveError, Result};

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Endpoint returning the list of gateway API bases.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api1.blive.chat/api/endpoints";

/// Settings for an Open Live listener.
///
/// Built once at startup and passed to [`crate::OpenLiveListener::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Room identity code used to start a session.
    pub room_key: String,
    pub app_id: i64,
    /// Gateway API base. Discovered at runtime when unset.
    pub api_base: Option<String>,
    pub discovery_url: String,
    pub user_agent: String,
    pub heartbeat_interval_ms: u64,
    /// Delay between reconnect attempts.
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for pending callbacks at shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            room_key: String::new(),
            app_id: 0,
            api_base: None,
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            user_agent: DEFAULT_UA.to_string(),
            heartbeat_interval_ms: 10_000,
            retry_delay_ms: 5_000,
            request_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            drain_timeout_ms: 3_000,
        }
    }
}

impl ListenerConfig {
    pub fn new(room_key: impl Into<String>) -> Self {
        Self {
            room_key: room_key.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Check that the configuration can start a listener.
    pub fn validate(&self) -> Result<()> {
        if self.room_key.trim().is_empty() {
            return Err(OpenLiveError::config(
                "room_key is empty, a room identity code is required",
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(OpenLiveError::config("heartbeat_interval_ms must be > 0"));
        }
        Ok(())
    }
}
