//! Danmaku: live chat collection for Bilibili live rooms.
//!
//! This crate implements the streaming side of the live chat protocol:
//! a length-prefixed binary frame codec with zlib/brotli batches, a classifier
//! that normalizes notification payloads into typed events, and a client that
//! keeps one session alive (heartbeats, reconnects) and feeds an output queue.
//!
//! ## Core Types
//!
//! - [`Frame`] - A decoded protocol frame, see [`parse_frames`]
//! - [`DanmuEvent`] - A normalized event (chat, gift, enter, broadcast, emoticon, other)
//! - [`DanmakuClient`] - Connection manager for a single room
//!
//! ## Collaborators
//!
//! - [`RoomResolver`] - Maps a public room reference to the internal room id
//! - [`Connector`] - Opens the duplex transport (WebSocket by default)
//! - [`EventSink`] - Output queue; implemented for tokio mpsc senders
//!
//! ```no_run
//! use danmaku::DanmakuClient;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> danmaku::Result<()> {
//! let (tx, mut rx) = mpsc::channel(256);
//! let client = Arc::new(DanmakuClient::new("https://live.bilibili.com/6", tx)?);
//!
//! let runner = client.clone();
//! tokio::spawn(async move { runner.start().await });
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{}: {}", event.sender_name(), event.content());
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod resolver;
pub mod room;
pub mod sink;
pub mod state;
pub mod stats;
mod tls;
pub mod transport;

pub use classify::{classify, classify_frame};
pub use client::DanmakuClient;
pub use codec::{
    DecodeReport, Frame, HEARTBEAT_FRAME, build_registration_frame, encode_frame, parse_frames,
    parse_frames_with_report,
};
pub use config::ClientConfig;
pub use error::{DanmakuError, Result};
pub use event::{
    BroadcastNotice, ChatMessage, Classified, DanmuEvent, EventKind, GiftInfo, MessageType,
};
pub use resolver::{BilibiliRoomResolver, RoomInfo, RoomResolver, StaticRoomResolver};
pub use room::RoomRef;
pub use sink::EventSink;
pub use state::ConnectionState;
pub use stats::StatsSnapshot;
pub use transport::{Connector, FrameSink, InboundStream, Transport, WebSocketConnector};
