//! Danmaku error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, DanmakuError>;

/// Errors that can occur while collecting danmaku.
#[derive(Error, Debug)]
pub enum DanmakuError {
    /// Connection-related errors (room lookup, WebSocket upgrade, send failures)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol parsing/encoding errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A compressed batch could not be inflated
    #[error("Decompression error: {0}")]
    Decompress(String),

    /// A notification payload could not be classified
    #[error("Classification error: {0}")]
    Classify(String),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event consumer dropped its end of the queue
    #[error("Event channel closed")]
    ChannelClosed,

    /// Invalid configuration or room reference
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DanmakuError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a decompression error.
    pub fn decompress(msg: impl Into<String>) -> Self {
        Self::Decompress(msg.into())
    }

    /// Create a classification error.
    pub fn classify(msg: impl Into<String>) -> Self {
        Self::Classify(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error only affects a single message and should never
    /// tear down the connection.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Self::Decompress(_) | Self::Classify(_) | Self::Json(_)
        )
    }
}
