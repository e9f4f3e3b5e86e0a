//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::ver;
use crate::error::{DanmakuError, Result};

/// Default WebSocket URL
pub const DEFAULT_WS_URL: &str = "wss://broadcastlv.chat.bilibili.com/sub";

/// Room init API
pub const DEFAULT_ROOM_INIT_URL: &str = "https://api.live.bilibili.com/room/v1/Room/room_init";

/// Heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// Pause before and after re-establishing a dropped session
pub const RECONNECT_DELAY_MS: u64 = 1000;

/// Timeout for the room lookup request
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Settings for a [`crate::client::DanmakuClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_ms: u64,
    /// Compression version requested in the registration frame.
    pub protocol_version: u16,
    pub ws_url: String,
    pub room_init_url: String,
    pub request_timeout_secs: u64,
    /// Client id sent on registration; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            protocol_version: ver::ZLIB,
            ws_url: DEFAULT_WS_URL.to_string(),
            room_init_url: DEFAULT_ROOM_INIT_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            client_id: None,
        }
    }
}

impl ClientConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(DanmakuError::config("heartbeat interval must be positive"));
        }
        if !matches!(
            self.protocol_version,
            ver::RAW_JSON | ver::POPULARITY | ver::ZLIB | ver::BROTLI
        ) {
            return Err(DanmakuError::config(format!(
                "unsupported protocol version {}",
                self.protocol_version
            )));
        }
        if self.ws_url.is_empty() {
            return Err(DanmakuError::config("ws_url must not be empty"));
        }
        Ok(())
    }

    /// The configured client id, or a fresh random one in `[1e14, 3e14)`.
    pub fn resolve_client_id(&self) -> u64 {
        self.client_id
            .unwrap_or_else(|| 100_000_000_000_000 + rand::random::<u64>() % 200_000_000_000_000)
    }
}
