//! Message types - channel identity, raw messages and ledger keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a monitored channel (e.g. `"42"` or `"os_Community"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Accepts either a bare handle or a `https://t.me/<handle>` link.
    pub fn from_link(link: &str) -> Self {
        let trimmed = link.trim().trim_end_matches('/');
        let handle = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self(handle.trim_start_matches('@').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for ChannelId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Platform message id, monotonically increasing within a channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The `(channel, message id)` pair recorded in the dedup ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessedKey {
    pub channel: ChannelId,
    pub message_id: MessageId,
}

impl ProcessedKey {
    pub fn new(channel: impl Into<ChannelId>, message_id: i64) -> Self {
        Self {
            channel: channel.into(),
            message_id: MessageId(message_id),
        }
    }
}

impl fmt::Display for ProcessedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.message_id)
    }
}

/// Where to resume reading a channel's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Only messages with an id strictly greater than this one.
    AfterId(MessageId),

    /// Only messages posted at or after this instant.
    Since(DateTime<Utc>),
}

impl ReadCursor {
    /// Whether an entry lies past the cursor.
    pub fn admits(&self, id: MessageId, posted_at: DateTime<Utc>) -> bool {
        match self {
            Self::AfterId(after) => id > *after,
            Self::Since(since) => posted_at >= *since,
        }
    }
}

/// An open handle on one channel, returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSession {
    pub channel: ChannelId,

    /// Human readable title (falls back to the id).
    pub title: String,
}

impl ChannelSession {
    pub fn new(channel: ChannelId, title: impl Into<String>) -> Self {
        Self {
            channel,
            title: title.into(),
        }
    }
}

/// One history entry as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    pub text: String,
    #[serde(default)]
    pub embedded_urls: Vec<String>,
}

impl RawEntry {
    pub fn new(id: i64, timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId(id),
            timestamp,
            sender: None,
            text: text.into(),
            embedded_urls: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.embedded_urls.push(url.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A message read from a channel. Immutable once read; never persisted itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub key: ProcessedKey,

    /// When the message was posted
    pub timestamp: DateTime<Utc>,

    /// Sender label, or the channel title for channel posts
    pub sender: String,

    /// Channel title at read time
    pub channel_title: String,

    /// Plain text body
    pub text: String,

    /// URLs attached by the platform (entities, buttons)
    pub embedded_urls: Vec<String>,
}

impl RawMessage {
    pub fn from_entry(session: &ChannelSession, entry: RawEntry) -> Self {
        Self {
            key: ProcessedKey {
                channel: session.channel.clone(),
                message_id: entry.id,
            },
            timestamp: entry.timestamp,
            sender: entry.sender.unwrap_or_else(|| session.title.clone()),
            channel_title: session.title.clone(),
            text: entry.text,
            embedded_urls: entry.embedded_urls,
        }
    }

    /// Convenience constructor used heavily by tests.
    pub fn new(key: ProcessedKey, text: impl Into<String>) -> Self {
        let title = key.channel.to_string();
        Self {
            key,
            timestamp: Utc::now(),
            sender: title.clone(),
            channel_title: title,
            text: text.into(),
            embedded_urls: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
