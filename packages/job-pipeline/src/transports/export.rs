//! Transport over Telegram Desktop JSON history exports.
//!
//! Each channel is a file `<dir>/<channel>.json` in the export format
//! (`{"name": ..., "messages": [...]}`). Message text is either a plain
//! string or an array mixing strings and entity objects; `link` and
//! `text_link` entities become embedded URLs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{UpstreamError, UpstreamResult};
use crate::traits::transport::ChannelTransport;
use crate::types::message::{ChannelId, ChannelSession, RawEntry, ReadCursor};

#[derive(Debug, Deserialize)]
struct ExportFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    date: String,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    text: ExportText,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportText {
    Plain(String),
    Parts(Vec<ExportTextPart>),
}

impl Default for ExportText {
    fn default() -> Self {
        Self::Plain(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExportTextPart {
    Plain(String),
    Entity {
        #[serde(rename = "type")]
        kind: String,
        text: String,
        #[serde(default)]
        href: Option<String>,
    },
}

impl ExportText {
    /// Flattened text and the URLs carried by link entities.
    fn flatten(self) -> (String, Vec<String>) {
        match self {
            Self::Plain(text) => (text, Vec::new()),
            Self::Parts(parts) => {
                let mut text = String::new();
                let mut urls = Vec::new();
                for part in parts {
                    match part {
                        ExportTextPart::Plain(s) => text.push_str(&s),
                        ExportTextPart::Entity { kind, text: s, href } => {
                            match (kind.as_str(), href) {
                                ("text_link", Some(href)) => urls.push(href),
                                ("link", _) => urls.push(s.clone()),
                                _ => {}
                            }
                            text.push_str(&s);
                        }
                    }
                }
                (text, urls)
            }
        }
    }
}

impl ExportMessage {
    fn timestamp(&self) -> UpstreamResult<DateTime<Utc>> {
        if let Some(ts) = self
            .date_unixtime
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            return Ok(ts);
        }

        NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%dT%H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|e| UpstreamError::Malformed(format!("message {} date {:?}: {}", self.id, self.date, e)))
    }

    fn into_entry(self) -> UpstreamResult<Option<RawEntry>> {
        if self.kind.as_deref().is_some_and(|k| k != "message") {
            return Ok(None);
        }

        let timestamp = self.timestamp()?;
        let (text, urls) = self.text.flatten();
        let mut entry = RawEntry::new(self.id, timestamp, text);
        entry.sender = self.from;
        entry.embedded_urls = urls;
        Ok(Some(entry))
    }
}

struct LoadedChannel {
    title: String,
    entries: Vec<RawEntry>,
}

/// Reads channel history from export files on disk.
///
/// Files are parsed once on `open` and served from memory afterwards.
pub struct ExportTransport {
    dir: PathBuf,
    loaded: RwLock<HashMap<ChannelId, Arc<LoadedChannel>>>,
}

impl ExportTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, channel: &ChannelId) -> PathBuf {
        self.dir.join(format!("{}.json", channel.as_str()))
    }

    async fn load(&self, channel: &ChannelId) -> UpstreamResult<Arc<LoadedChannel>> {
        if let Some(loaded) = self.loaded.read().await.get(channel) {
            return Ok(loaded.clone());
        }

        let path = self.path_for(channel);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpstreamError::NotFound(format!(
                    "no export for {} at {}",
                    channel,
                    path.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(UpstreamError::Auth(format!("cannot read {}: {}", path.display(), e)))
            }
            Err(e) => return Err(UpstreamError::Transport(Box::new(e))),
        };

        let file: ExportFile = serde_json::from_str(&raw)
            .map_err(|e| UpstreamError::Malformed(format!("{}: {}", path.display(), e)))?;

        let mut entries = Vec::with_capacity(file.messages.len());
        for message in file.messages {
            match message.into_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("Skipping entry in {}: {}", path.display(), e),
            }
        }
        entries.sort_by_key(|e| e.id);

        debug!("Loaded {} entries from {}", entries.len(), path.display());

        let loaded = Arc::new(LoadedChannel {
            title: file.name.unwrap_or_else(|| channel.to_string()),
            entries,
        });
        self.loaded
            .write()
            .await
            .insert(channel.clone(), loaded.clone());
        Ok(loaded)
    }
}

#[async_trait]
impl ChannelTransport for ExportTransport {
    async fn open(&self, channel: &ChannelId) -> UpstreamResult<ChannelSession> {
        let loaded = self.load(channel).await?;
        Ok(ChannelSession::new(channel.clone(), loaded.title.clone()))
    }

    async fn read_history(
        &self,
        session: &ChannelSession,
        cursor: Option<ReadCursor>,
        limit: usize,
    ) -> UpstreamResult<Vec<RawEntry>> {
        let loaded = self.load(&session.channel).await?;

        Ok(loaded
            .entries
            .iter()
            .filter(|e| cursor.is_none_or(|c| c.admits(e.id, e.timestamp)))
            .take(limit)
            .cloned()
            .collect())
    }
}
