//! Conversation Messages
//!
//! The committed, immutable turns of a conversation and the identifiers that
//! name them.
//!
//! # Identifier Spaces
//!
//! A message shown before the backend has confirmed it carries a
//! [`MessageId::Local`] id, handed out by a per-session counter. Messages
//! loaded from (or reconciled with) the backend carry
//! [`MessageId::Server`] ids. The two spaces are distinct variants, so a
//! provisional id can never be mistaken for a confirmed one no matter what
//! numeric values they hold.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Message identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageId {
    /// Provisional id generated on this client (never reused within a session)
    Local(u64),
    /// Id assigned by the backend once the message is persisted
    Server(i64),
}

impl MessageId {
    /// Whether this id was generated locally and still awaits confirmation
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(n) => write!(f, "local-{n}"),
            Self::Server(n) => write!(f, "{n}"),
        }
    }
}

/// Session identifier
///
/// Opaque and stable for the lifetime of a conversation. For the HTTP
/// backend this is the chat id used in request paths.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a session id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The person using the client
    User,
    /// The AI persona
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// A committed conversational turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id (provisional or confirmed)
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current time
    pub fn new(id: MessageId, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether the message still awaits backend confirmation
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}

impl From<ServerMessage> for ChatMessage {
    fn from(msg: ServerMessage) -> Self {
        Self {
            id: MessageId::Server(msg.id),
            role: msg.role,
            content: msg.content,
            created_at: msg.created_at,
        }
    }
}

/// A message as returned by the chat backend
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ServerMessage {
    /// Backend-assigned id
    pub id: i64,
    /// Chat the message belongs to
    #[serde(default)]
    pub chat_id: Option<i64>,
    /// Author role
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Creation time (RFC 3339, or naive ISO 8601 interpreted as UTC)
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Chat detail payload; only the message list is consumed
#[derive(Clone, Debug, Deserialize)]
pub struct ChatDetail {
    /// Chat id
    pub id: i64,
    /// Conversation history, oldest first
    #[serde(default)]
    pub messages: Vec<ServerMessage>,
}

/// The backend emits naive timestamps (no offset); those are UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
