//! Typed events produced from notification frames.
//!
//! A [`Classified`] value is what the classifier derives from a single frame.
//! It becomes a [`DanmuEvent`] once it is stamped with a time, which happens
//! right before it is pushed onto the output queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Default chat color (white).
pub const DEFAULT_COLOR: u32 = 0xFFFFFF;

/// Variant tag of an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MessageType {
    Chat,
    Gift,
    Enter,
    Broadcast,
    Emoticon,
    Other,
}

/// A chat line (also used for emoticon messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_name: String,
    /// Six lowercase hex digits, e.g. `ffffff`.
    pub color: String,
    /// Text, or the emoticon's unique id for emoticon messages.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
}

/// Gift details. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
}

/// A room-wide broadcast notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastNotice {
    pub notice_type: i64,
    pub room_id: u64,
    pub content: String,
}

/// Variant-specific data of an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum EventKind {
    Chat(ChatMessage),
    Gift(GiftInfo),
    Enter,
    Broadcast(BroadcastNotice),
    Emoticon(ChatMessage),
    /// Anything else. `content` is the undecoded payload.
    Other {
        #[serde(serialize_with = "serialize_lossy")]
        content: Bytes,
    },
}

impl EventKind {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Chat(_) => MessageType::Chat,
            Self::Gift(_) => MessageType::Gift,
            Self::Enter => MessageType::Enter,
            Self::Broadcast(_) => MessageType::Broadcast,
            Self::Emoticon(_) => MessageType::Emoticon,
            Self::Other { .. } => MessageType::Other,
        }
    }

    /// Time embedded in the payload, if any.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Chat(msg) | Self::Emoticon(msg) => msg.event_time,
            Self::Gift(gift) => gift.event_time,
            _ => None,
        }
    }
}

fn serialize_lossy<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Classifier output that has not been stamped with a time yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: EventKind,
    /// Decoded JSON source object, `None` for non-notification frames.
    pub raw_payload: Option<Value>,
}

impl Classified {
    /// Fix the event time: the embedded timestamp if one was recovered,
    /// otherwise `now`.
    pub fn stamp(self, now: DateTime<Utc>) -> DanmuEvent {
        let received_at = self.kind.event_time().unwrap_or(now);
        DanmuEvent {
            kind: self.kind,
            raw_payload: self.raw_payload,
            received_at,
        }
    }
}

/// A normalized event as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DanmuEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
    pub received_at: DateTime<Utc>,
}

impl DanmuEvent {
    pub fn msg_type(&self) -> MessageType {
        self.kind.msg_type()
    }

    /// Display name of the sender, empty when the event has none.
    pub fn sender_name(&self) -> &str {
        match &self.kind {
            EventKind::Chat(msg) | EventKind::Emoticon(msg) => &msg.sender_name,
            EventKind::Gift(gift) => gift.sender_name.as_deref().unwrap_or(""),
            _ => "",
        }
    }

    /// Human-readable content of the event.
    pub fn content(&self) -> String {
        match &self.kind {
            EventKind::Chat(msg) | EventKind::Emoticon(msg) => msg.content.clone(),
            EventKind::Broadcast(notice) => notice.content.clone(),
            EventKind::Gift(gift) => match (&gift.gift_name, gift.count) {
                (Some(name), Some(count)) => format!("{} x{}", name, count),
                (Some(name), None) => name.clone(),
                _ => String::new(),
            },
            EventKind::Enter => String::new(),
            EventKind::Other { content } => String::from_utf8_lossy(content).into_owned(),
        }
    }
}
