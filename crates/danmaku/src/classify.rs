//! Turns decoded frames into typed events.
//!
//! Only notification frames (op 5) carry JSON. Everything else is passed
//! through as [`EventKind::Other`] with the raw bytes as content.
//!
//! Field extraction never fails: a missing or oddly-typed field falls back to
//! a default. The only error is a payload that is not a JSON object with a
//! string `cmd`, in which case the single frame is dropped by the caller.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::codec::{Frame, op};
use crate::error::{DanmakuError, Result};
use crate::event::{BroadcastNotice, ChatMessage, Classified, DEFAULT_COLOR, EventKind, GiftInfo};

/// Command tags
mod cmd {
    pub const DANMU_MSG: &str = "DANMU_MSG";
    pub const SEND_GIFT: &str = "SEND_GIFT";
    pub const WELCOME: &str = "WELCOME";
    pub const NOTICE_MSG: &str = "NOTICE_MSG";
}

/// Classify a decoded frame.
pub fn classify_frame(frame: &Frame) -> Result<Classified> {
    classify(frame.operation, &frame.payload)
}

/// Classify a payload by its operation code.
pub fn classify(operation: u32, payload: &Bytes) -> Result<Classified> {
    if operation != op::NOTIFICATION {
        return Ok(Classified {
            kind: EventKind::Other {
                content: payload.clone(),
            },
            raw_payload: None,
        });
    }

    let json: Value = serde_json::from_slice(payload)?;
    let command = json
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| DanmakuError::classify("notification without a string cmd"))?;

    // DANMU_MSG comes with suffixes such as "DANMU_MSG:4:0:2:2:2:0"
    let kind = if command.contains(cmd::DANMU_MSG) {
        parse_danmu_msg(&json)
    } else {
        match command {
            cmd::SEND_GIFT => EventKind::Gift(parse_gift(&json)),
            cmd::WELCOME => EventKind::Enter,
            cmd::NOTICE_MSG => EventKind::Broadcast(parse_notice(&json)),
            _ => EventKind::Other {
                content: payload.clone(),
            },
        }
    };

    Ok(Classified {
        kind,
        raw_payload: Some(json),
    })
}

/// `info[i]`
fn info_at(json: &Value, i: usize) -> Option<&Value> {
    json.get("info")?.as_array()?.get(i)
}

/// `info[0][i]`
fn meta_at(json: &Value, i: usize) -> Option<&Value> {
    info_at(json, 0)?.as_array()?.get(i)
}

/// Parse DANMU_MSG into a chat (or emoticon) message.
fn parse_danmu_msg(json: &Value) -> EventKind {
    // info[2][1] = name, falling back to data.uname
    let sender_name = info_at(json, 2)
        .and_then(|user| user.get(1))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .or_else(|| json.pointer("/data/uname").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    // info[0][3] = color
    let color = meta_at(json, 3)
        .and_then(Value::as_u64)
        .map(|c| (c & 0xFFFFFF) as u32)
        .unwrap_or(DEFAULT_COLOR);

    // info[1] = content
    let content = info_at(json, 1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // info[0][4] = send time in epoch milliseconds
    let event_time = meta_at(json, 4)
        .and_then(Value::as_i64)
        .filter(|ms| *ms > 0)
        .and_then(millis_to_datetime);

    let mut message = ChatMessage {
        sender_name,
        color: format!("{:06x}", color),
        content,
        event_time,
    };

    match emoticon_unique(json) {
        Some(emoticon) => {
            message.content = emoticon;
            EventKind::Emoticon(message)
        }
        None => EventKind::Chat(message),
    }
}

/// Unique id of an attached emoticon, if the message is one.
fn emoticon_unique(json: &Value) -> Option<String> {
    // info[0][13] = emoticon descriptor, "{}" when absent
    let direct = meta_at(json, 13)
        .and_then(|e| e.get("emoticon_unique"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    if let Some(unique) = direct {
        return Some(unique.to_string());
    }

    // info[0][15].extra is a JSON string
    let extra = meta_at(json, 15)?.get("extra")?.as_str()?;
    let extra: Value = serde_json::from_str(extra).ok()?;
    extra
        .get("emoticon_unique")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Parse SEND_GIFT details.
fn parse_gift(json: &Value) -> GiftInfo {
    let Some(data) = json.get("data") else {
        return GiftInfo::default();
    };

    let timestamp_ms = data
        .get("timestamp")
        .and_then(|v| v.as_i64().or_else(|| v.as_u64().map(|u| u as i64)))
        .filter(|ts| *ts > 0)
        .map(|ts| {
            if ts > 1_000_000_000_000 {
                ts
            } else {
                ts * 1000
            }
        });

    GiftInfo {
        sender_name: data
            .get("uname")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        gift_name: data
            .get("giftName")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        count: data.get("num").and_then(Value::as_u64),
        event_time: timestamp_ms.and_then(millis_to_datetime),
    }
}

/// Parse NOTICE_MSG into a broadcast notice.
fn parse_notice(json: &Value) -> BroadcastNotice {
    BroadcastNotice {
        notice_type: json.get("msg_type").and_then(Value::as_i64).unwrap_or(0),
        room_id: json.get("real_roomid").and_then(Value::as_u64).unwrap_or(0),
        content: json
            .get("msg_common")
            .and_then(Value::as_str)
            .unwrap_or("none")
            .to_string(),
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
