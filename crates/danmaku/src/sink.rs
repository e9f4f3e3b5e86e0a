//! Output queue abstraction. The client is producer-only.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DanmakuError, Result};
use crate::event::DanmuEvent;

/// Destination for normalized events.
///
/// `push` may suspend when the queue applies backpressure. An error means the
/// consumer is gone.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, event: DanmuEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<DanmuEvent> {
    async fn push(&self, event: DanmuEvent) -> Result<()> {
        self.send(event)
            .await
            .map_err(|_| DanmakuError::ChannelClosed)
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<DanmuEvent> {
    async fn push(&self, event: DanmuEvent) -> Result<()> {
        self.send(event).map_err(|_| DanmakuError::ChannelClosed)
    }
}
