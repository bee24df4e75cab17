//! Parsing of raw stream messages into [`RawEvent`]s.
//!
//! Two shapes are accepted:
//!
//! - the normalized form, `{"type": "comment", "user": {...}, "content": "..."}`
//! - the platform wire form, `{"Type": 1, "Data": "<json string>"}`, where the
//!   numeric type is 1 comment, 2 like, 3 enter, 4 follow, 5 gift, 6 room stats.
//!
//! Room statistics and unknown wire types are ignored (`Ok(None)`).

use crate::error::{LiveError, Result};
use crate::events::{Interaction, RawEvent, UserInfo};
use serde_json::Value;
use std::collections::HashMap;

const MAX_NICKNAME_CHARS: usize = 15;

/// Converts stream messages into raw events, cleaning nicknames for speech.
#[derive(Debug, Clone)]
pub struct MessageParser {
    clean_nicknames: bool,
    default_nickname: String,
}

impl MessageParser {
    pub fn new(clean_nicknames: bool, default_nickname: impl Into<String>) -> Self {
        Self {
            clean_nicknames,
            default_nickname: default_nickname.into(),
        }
    }

    /// Parse one message. `now_ms` stamps messages that carry no timestamp.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Validation` for malformed JSON or an unknown
    /// normalized `type`.
    pub fn parse(&self, line: &str, now_ms: u64) -> Result<Option<RawEvent>> {
        let message: Value = serde_json::from_str(line.trim())
            .map_err(|e| LiveError::Validation(format!("malformed message: {e}")))?;

        if let Some(wire_type) = message.get("Type").and_then(Value::as_u64) {
            return self.parse_wire(wire_type, &message, now_ms);
        }
        self.parse_normalized(&message, now_ms).map(Some)
    }

    fn parse_wire(&self, wire_type: u64, message: &Value, now_ms: u64) -> Result<Option<RawEvent>> {
        if wire_type == 6 || !(1..=5).contains(&wire_type) {
            tracing::debug!(wire_type, "ignoring wire message type");
            return Ok(None);
        }
        let data_str = message
            .get("Data")
            .and_then(Value::as_str)
            .ok_or_else(|| LiveError::Validation(format!("type {wire_type} missing Data")))?;
        let data: Value = serde_json::from_str(data_str)
            .map_err(|e| LiveError::Validation(format!("malformed Data field: {e}")))?;

        let user_data = data.get("User").cloned().unwrap_or(Value::Null);
        let user = UserInfo {
            id: json_id(user_data.get("Id")),
            nickname: self.clean_nickname(str_field(&user_data, "Nickname")),
            level: u32_field(&user_data, "Level").unwrap_or(0),
        };

        let interaction = match wire_type {
            1 => Interaction::Comment {
                text: str_field(&data, "Content").to_owned(),
            },
            2 => Interaction::Like {
                count: u32_field(&data, "Total")
                    .or_else(|| u32_field(&data, "Count"))
                    .unwrap_or(1),
            },
            3 => Interaction::Enter,
            4 => Interaction::Follow,
            _ => Interaction::Gift {
                name: non_empty_or(str_field(&data, "GiftName"), "gift"),
                count: u32_field(&data, "GiftCount").unwrap_or(1),
                unit_value: data.get("DiamondCount").and_then(Value::as_u64).unwrap_or(0),
            },
        };

        let mut metadata = HashMap::new();
        if let Some(room) = data.get("RoomId") {
            metadata.insert("room_id".to_owned(), room.clone());
        }
        if let Some(msg_id) = data.get("MsgId") {
            metadata.insert("msg_id".to_owned(), msg_id.clone());
        }
        if let Some(raw) = user_data.get("Nickname") {
            metadata.insert("original_nickname".to_owned(), raw.clone());
        }

        Ok(Some(RawEvent {
            id: None,
            interaction,
            arrival_ms: data
                .get("Timestamp")
                .and_then(Value::as_u64)
                .unwrap_or(now_ms),
            user,
            metadata,
        }))
    }

    fn parse_normalized(&self, message: &Value, now_ms: u64) -> Result<RawEvent> {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| LiveError::Validation("message has no type".into()))?;

        let content = message
            .get("content")
            .or_else(|| message.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let interaction = match kind {
            "comment" => Interaction::Comment {
                text: content.to_owned(),
            },
            "gift" => Interaction::Gift {
                name: non_empty_or(
                    message
                        .get("gift_name")
                        .or_else(|| message.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    "gift",
                ),
                count: u32_field(message, "count").unwrap_or(1),
                unit_value: message
                    .get("unit_value")
                    .or_else(|| message.get("diamonds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            },
            "follow" => Interaction::Follow,
            "enter" | "user_enter" => Interaction::Enter,
            "like" => Interaction::Like {
                count: u32_field(message, "count").unwrap_or(1),
            },
            other => {
                return Err(LiveError::Validation(format!("unknown event type '{other}'")));
            }
        };

        let user_data = message.get("user").cloned().unwrap_or(Value::Null);
        let user = UserInfo {
            id: json_id(user_data.get("id")),
            nickname: self.clean_nickname(str_field(&user_data, "nickname")),
            level: u32_field(&user_data, "level").unwrap_or(0),
        };

        let metadata = match message.get("metadata") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => HashMap::new(),
        };

        Ok(RawEvent {
            id: message.get("id").and_then(Value::as_str).map(str::to_owned),
            interaction,
            arrival_ms: message
                .get("timestamp")
                .and_then(Value::as_u64)
                .unwrap_or(now_ms),
            user,
            metadata,
        })
    }

    /// Make a nickname safe to speak.
    ///
    /// Purely numeric names become the default nickname, symbols and emoji are
    /// dropped, whitespace is collapsed, and long names are cut to 15
    /// characters followed by `...`.
    pub fn clean_nickname(&self, nickname: &str) -> String {
        if !self.clean_nicknames {
            return nickname.to_owned();
        }
        if !nickname.is_empty() && nickname.chars().all(|c| c.is_ascii_digit()) {
            return self.default_nickname.clone();
        }

        let kept: String = nickname
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,!?-_".contains(*c))
            .collect();
        let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");

        if collapsed.is_empty() {
            return self.default_nickname.clone();
        }
        if collapsed.chars().count() > MAX_NICKNAME_CHARS {
            let cut: String = collapsed.chars().take(MAX_NICKNAME_CHARS).collect();
            return format!("{cut}...");
        }
        collapsed
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// User ids arrive as strings or numbers depending on the source.
fn json_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_owned()
    } else {
        value.to_owned()
    }
}
