//! Duplex transport used by the client.
//!
//! A [`Connector`] opens a [`Transport`], which is split into a write half
//! ([`FrameSink`]) and an inbound stream of byte buffers. The halves are owned
//! separately so the heartbeat can write while the receive loop reads.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt, future};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::error::{DanmakuError, Result};
use crate::resolver::{DEFAULT_UA, LIVE_ORIGIN};
use crate::tls::install_rustls_provider;

/// Inbound byte buffers. The stream ends when the peer closes the session.
pub type InboundStream = BoxStream<'static, Result<Bytes>>;

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An open session.
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub inbound: InboundStream,
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.0
            .send(Message::Binary(frame))
            .await
            .map_err(|e| DanmakuError::connection(format!("Failed to send frame: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| DanmakuError::connection(format!("Failed to close WebSocket: {}", e)))
    }
}

/// Connects over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    headers: Vec<(&'static str, String)>,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            headers: vec![
                ("user-agent", DEFAULT_UA.to_string()),
                ("origin", LIVE_ORIGIN.to_string()),
                ("referer", LIVE_ORIGIN.to_string()),
            ],
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an upgrade request header. `name` must be lowercase.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name, value.into()));
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        install_rustls_provider();

        let mut request = url.into_client_request().map_err(|e| {
            DanmakuError::connection(format!("Invalid WebSocket URL {}: {}", url, e))
        })?;
        for (name, value) in &self.headers {
            let value = HeaderValue::from_str(value)
                .map_err(|e| DanmakuError::connection(format!("Invalid header {}: {}", name, e)))?;
            request.headers_mut().insert(*name, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| DanmakuError::connection(format!("WebSocket connect failed: {}", e)))?;
        info!("Connected to WebSocket: {}", url);

        let (sink, stream) = ws_stream.split();
        let inbound = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Binary(data)) => Some(Ok(data)),
                    Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_bytes()))),
                    Ok(other) => {
                        debug!("Ignoring WebSocket message: {:?}", other);
                        None
                    }
                    Err(e) => Some(Err(DanmakuError::connection(format!(
                        "WebSocket error: {}",
                        e
                    )))),
                }
            })
            .boxed();

        Ok(Transport {
            sink: Box::new(WebSocketSink(sink)),
            inbound,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeConnector;
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_with_header_replaces() {
        let connector = WebSocketConnector::new().with_header("user-agent", "custom");
        let agents: Vec<_> = connector
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("user-agent"))
            .collect();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].1, "custom");
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let err = WebSocketConnector::new()
            .connect("not a url")
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, DanmakuError::Connection(_)));
    }

    #[tokio::test]
    async fn test_websocket_inbound_ends_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Ping(Bytes::from_static(b"ping"))).await.unwrap();
            ws.send(Message::Binary(Bytes::from_static(b"bin"))).await.unwrap();
            ws.send(Message::Text("txt".into())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut transport = WebSocketConnector::new()
            .connect(&format!("ws://{}/sub", addr))
            .await
            .unwrap();

        let mut buffers = Vec::new();
        while let Some(item) = transport.inbound.next().await {
            buffers.push(item.unwrap());
        }
        assert_eq!(
            buffers,
            [Bytes::from_static(b"bin"), Bytes::from_static(b"txt")]
        );

        drop(transport);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fake_session_round_trip() {
        let connector = FakeConnector::default();
        let session = connector.push_session();
        let mut transport = connector.connect("ws://fake").await.unwrap();

        transport.sink.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(session.sent.lock().len(), 1);

        session.inbound_tx.send(Ok(Bytes::from_static(b"pong"))).unwrap();
        drop(session.inbound_tx);
        assert_eq!(
            transport.inbound.next().await.unwrap().unwrap(),
            Bytes::from_static(b"pong")
        );
        assert!(transport.inbound.next().await.is_none());
        assert!(connector.connect("ws://fake").await.is_err());
    }
}
