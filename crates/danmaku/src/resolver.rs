//! Room resolution: public room reference to internal room id and endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{DanmakuError, Result};
use crate::room::RoomRef;
use crate::tls::install_rustls_provider;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub(crate) const LIVE_ORIGIN: &str = "https://live.bilibili.com";

/// Where and how to subscribe to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub ws_url: String,
    pub room_id: u64,
}

/// Maps a public room reference to [`RoomInfo`].
#[async_trait]
pub trait RoomResolver: Send + Sync {
    async fn resolve(&self, room: &RoomRef) -> Result<RoomInfo>;
}

/// Room init API response
#[derive(Debug, Deserialize)]
struct RoomInitResponse {
    code: i32,
    #[serde(default)]
    message: Option<String>,
    data: Option<RoomInitData>,
}

#[derive(Debug, Deserialize)]
struct RoomInitData {
    room_id: u64,
}

/// Resolves rooms through the public room init API.
#[derive(Debug, Clone)]
pub struct BilibiliRoomResolver {
    client: Client,
    room_init_url: String,
    ws_url: String,
}

impl BilibiliRoomResolver {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        install_rustls_provider();
        let client = Client::builder()
            .user_agent(DEFAULT_UA)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DanmakuError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            room_init_url: config.room_init_url.clone(),
            ws_url: config.ws_url.clone(),
        }
    }

    /// Get real room ID from short ID.
    async fn get_real_room_id(&self, short_id: &str) -> Result<u64> {
        let resp: RoomInitResponse = self
            .client
            .get(&self.room_init_url)
            .query(&[("id", short_id)])
            .header(reqwest::header::REFERER, LIVE_ORIGIN)
            .send()
            .await
            .map_err(|e| DanmakuError::connection(format!("Failed to get room info: {}", e)))?
            .json()
            .await
            .map_err(|e| DanmakuError::protocol(format!("Failed to parse room info: {}", e)))?;

        real_room_id(resp)
    }
}

fn real_room_id(resp: RoomInitResponse) -> Result<u64> {
    if resp.code != 0 {
        return Err(DanmakuError::protocol(format!(
            "Room init API returned error {}: {}",
            resp.code,
            resp.message.as_deref().unwrap_or("unknown")
        )));
    }

    resp.data
        .map(|d| d.room_id)
        .ok_or_else(|| DanmakuError::protocol("No room data in response"))
}

#[async_trait]
impl RoomResolver for BilibiliRoomResolver {
    async fn resolve(&self, room: &RoomRef) -> Result<RoomInfo> {
        let room_id = self.get_real_room_id(room.as_str()).await?;
        debug!(room = %room, room_id, "Resolved room");
        Ok(RoomInfo {
            ws_url: self.ws_url.clone(),
            room_id,
        })
    }
}

/// Always resolves to the same room.
#[derive(Debug, Clone)]
pub struct StaticRoomResolver(pub RoomInfo);

#[async_trait]
impl RoomResolver for StaticRoomResolver {
    async fn resolve(&self, _room: &RoomRef) -> Result<RoomInfo> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_init_response() {
        let resp: RoomInitResponse = serde_json::from_str(
            r#"{"code":0,"msg":"ok","message":"ok","data":{"room_id":21452505,"short_id":6,"uid":1}}"#,
        )
        .unwrap();
        assert_eq!(real_room_id(resp).unwrap(), 21452505);
    }

    #[test]
    fn test_room_init_error_code() {
        let resp: RoomInitResponse =
            serde_json::from_str(r#"{"code":60004,"message":"房间不存在","data":null}"#).unwrap();
        let err = real_room_id(resp).unwrap_err();
        assert!(err.to_string().contains("60004"));
    }

    #[test]
    fn test_room_init_missing_data() {
        let resp: RoomInitResponse = serde_json::from_str(r#"{"code":0}"#).unwrap();
        assert!(real_room_id(resp).is_err());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let info = RoomInfo {
            ws_url: "ws://localhost/sub".to_string(),
            room_id: 42,
        };
        let resolver = StaticRoomResolver(info.clone());
        let room = RoomRef::parse("6").unwrap();
        assert_eq!(resolver.resolve(&room).await.unwrap(), info);
    }
}
