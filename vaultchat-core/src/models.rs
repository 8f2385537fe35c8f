use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Partition key for stored sessions, taken from connection metadata.
/// Not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chat turn, held as the JSON value the caller sent.
///
/// Turns are stored and forwarded unchanged: `content` may be a string,
/// `null` (tool-call turns), an array of parts, or absent, and any other
/// fields travel along with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatMessage(serde_json::Value);

impl ChatMessage {
    /// Plain `{role, content}` turn with string content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self(serde_json::json!({
            "role": role.into(),
            "content": content.into(),
        }))
    }

    pub fn role(&self) -> Option<&str> {
        self.0.get("role").and_then(serde_json::Value::as_str)
    }

    pub fn content(&self) -> Option<&serde_json::Value> {
        self.0.get("content")
    }

    /// Displayable text: string content as is, or the first `text` part of
    /// array content.
    pub fn text(&self) -> Option<&str> {
        match self.content()? {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Array(parts) => parts
                .iter()
                .find_map(|p| p.get("text").and_then(serde_json::Value::as_str)),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for ChatMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Stored form of a session: IV and ciphertext (with GCM tag appended),
/// both serialized as JSON arrays of byte values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub data: Vec<u8>,
}

/// A listed session. `data` is `None` when the stored entry could not be
/// decrypted; consumers are expected to skip those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub data: Option<Vec<ChatMessage>>,
}

impl SessionRecord {
    /// Creation time encoded in the key suffix (`..._<millis>`).
    pub fn created_at_millis(&self) -> Option<i64> {
        self.id
            .rsplit_once('_')
            .and_then(|(_, millis)| millis.parse().ok())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at_millis()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// First `max_chars` characters of the opening message's text, if any.
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|messages| messages.first())
            .and_then(ChatMessage::text)
            .map(|text| text.chars().take(max_chars).collect())
    }
}
