use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use chrono::Local;
use danmaku::{DanmuEvent, EventKind, MessageType, StatsSnapshot};

pub struct OutputManager {
    format: OutputFormat,
    colored: bool,
    show_raw: bool,
    types: Vec<MessageType>,
}

impl OutputManager {
    pub fn new(format: OutputFormat, colored: bool) -> Self {
        Self {
            format,
            colored,
            show_raw: false,
            types: Vec::new(),
        }
    }

    pub fn with_types(mut self, types: Vec<MessageType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_raw(mut self, show_raw: bool) -> Self {
        self.show_raw = show_raw;
        self
    }

    /// Whether `event` passes the type filter.
    pub fn accepts(&self, event: &DanmuEvent) -> bool {
        self.types.is_empty() || self.types.contains(&event.msg_type())
    }

    pub fn format_event(&self, event: &DanmuEvent) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => Ok(self.format_pretty(event)),
            OutputFormat::Json => Ok(serde_json::to_string(event)?),
        }
    }

    fn format_pretty(&self, event: &DanmuEvent) -> String {
        let time = event.received_at.with_timezone(&Local).format("%H:%M:%S");
        let tag = self.colorize(
            &format!("{:<9}", event.msg_type().as_ref()),
            &Color::Yellow,
            false,
        );

        let mut line = match &event.kind {
            EventKind::Chat(msg) | EventKind::Emoticon(msg) => format!(
                "[{}] {} {}: {}",
                time,
                tag,
                self.colorize(&msg.sender_name, &Color::Cyan, true),
                self.colorize(&msg.content, &Color::from_hex(&msg.color), false)
            ),
            EventKind::Gift(_) => format!(
                "[{}] {} {} sent {}",
                time,
                tag,
                self.colorize(event.sender_name(), &Color::Cyan, true),
                self.colorize(&event.content(), &Color::Green, false)
            ),
            EventKind::Broadcast(notice) => format!(
                "[{}] {} ({}) {}",
                time,
                tag,
                notice.room_id,
                self.colorize(&notice.content, &Color::Blue, false)
            ),
            EventKind::Enter => format!("[{}] {}", time, tag),
            EventKind::Other { content } => {
                format!("[{}] {} {} bytes", time, tag, content.len())
            }
        };

        if self.show_raw
            && let Some(raw) = &event.raw_payload
        {
            line.push_str("\n    ");
            line.push_str(&raw.to_string());
        }
        line
    }

    pub fn format_stats(&self, stats: &StatsSnapshot) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string(stats)?),
            OutputFormat::Pretty => {
                let rows = [
                    ("Buffers", stats.buffers),
                    ("Frames", stats.frames),
                    ("Events", stats.events),
                    ("Dropped frames", stats.dropped_frames),
                    ("Dropped messages", stats.dropped_messages),
                    ("Heartbeats sent", stats.heartbeats_sent),
                    ("Heartbeats failed", stats.heartbeats_failed),
                    ("Reconnects", stats.reconnects),
                ];
                let mut output = self.colorize("Session Statistics:", &Color::Green, true);
                for (label, value) in rows {
                    output.push_str(&format!(
                        "\n  {}: {}",
                        self.colorize(label, &Color::Yellow, false),
                        value
                    ));
                }
                Ok(output)
            }
        }
    }

    #[cfg_attr(not(feature = "colored-output"), allow(unused_variables))]
    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                    Color::Rgb(r, g, b) => text.truecolor(*r, *g, *b),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            text.to_string()
        }
    }
}

#[cfg_attr(not(feature = "colored-output"), allow(dead_code))]
enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
    Rgb(u8, u8, u8),
}

impl Color {
    /// Parse a `rrggbb` chat color, white on failure.
    fn from_hex(hex: &str) -> Self {
        match u32::from_str_radix(hex, 16) {
            Ok(rgb) if hex.len() == 6 => {
                Color::Rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
            }
            _ => Color::Rgb(0xff, 0xff, 0xff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use danmaku::{BroadcastNotice, ChatMessage, Classified, GiftInfo};
    use serde_json::json;

    fn stamp(kind: EventKind) -> DanmuEvent {
        Classified {
            kind,
            raw_payload: Some(json!({"cmd": "TEST"})),
        }
        .stamp(Utc::now())
    }

    fn chat() -> DanmuEvent {
        stamp(EventKind::Chat(ChatMessage {
            sender_name: "alice".to_string(),
            color: "ff0000".to_string(),
            content: "hello".to_string(),
            event_time: None,
        }))
    }

    #[test]
    fn test_pretty_chat() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        let line = output.format_event(&chat()).unwrap();
        assert!(line.ends_with("] chat      alice: hello"), "{}", line);
    }

    #[test]
    fn test_pretty_gift_and_broadcast() {
        let output = OutputManager::new(OutputFormat::Pretty, false);
        let gift = stamp(EventKind::Gift(GiftInfo {
            sender_name: Some("bob".to_string()),
            gift_name: Some("flower".to_string()),
            count: Some(3),
            event_time: None,
        }));
        assert!(output.format_event(&gift).unwrap().ends_with("bob sent flower x3"));

        let notice = stamp(EventKind::Broadcast(BroadcastNotice {
            notice_type: 2,
            room_id: 6,
            content: "big news".to_string(),
        }));
        assert!(output.format_event(&notice).unwrap().ends_with("(6) big news"));
    }

    #[test]
    fn test_pretty_raw_payload() {
        let output = OutputManager::new(OutputFormat::Pretty, false).with_raw(true);
        let line = output.format_event(&chat()).unwrap();
        assert!(line.ends_with("\n    {\"cmd\":\"TEST\"}"));
    }

    #[test]
    fn test_json_line() {
        let output = OutputManager::new(OutputFormat::Json, false);
        let line = output.format_event(&chat()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert!(!line.contains('\n'));
        assert_eq!(value["msg_type"], "chat");
        assert_eq!(value["sender_name"], "alice");
        assert_eq!(value["raw_payload"]["cmd"], "TEST");
    }

    #[test]
    fn test_type_filter() {
        let output =
            OutputManager::new(OutputFormat::Pretty, false).with_types(vec![MessageType::Gift]);
        assert!(!output.accepts(&chat()));
        assert!(output.accepts(&stamp(EventKind::Gift(GiftInfo::default()))));

        let all = OutputManager::new(OutputFormat::Pretty, false);
        assert!(all.accepts(&stamp(EventKind::Other {
            content: Bytes::from_static(b"x"),
        })));
    }

    #[test]
    fn test_stats_json() {
        let output = OutputManager::new(OutputFormat::Json, false);
        let stats = StatsSnapshot {
            events: 4,
            ..Default::default()
        };
        let value: serde_json::Value =
            serde_json::from_str(&output.format_stats(&stats).unwrap()).unwrap();
        assert_eq!(value["events"], 4);
    }

    #[test]
    fn test_color_from_hex() {
        assert!(matches!(Color::from_hex("ff8000"), Color::Rgb(0xff, 0x80, 0x00)));
        assert!(matches!(Color::from_hex("zz"), Color::Rgb(0xff, 0xff, 0xff)));
    }
}
