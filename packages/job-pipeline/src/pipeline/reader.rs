//! Channel reader - lazy, forward-ordered message streams per channel.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tracing::{debug, info, warn};

use crate::error::ReadError;
use crate::pipeline::governor::RateGovernor;
use crate::traits::transport::ChannelTransport;
use crate::types::config::{CallKind, ReaderConfig};
use crate::types::message::{ChannelId, RawMessage, ReadCursor};

/// Messages of one channel, oldest first. Ends after the first `Err`.
pub type MessageStream<'a> = Pin<Box<dyn Stream<Item = Result<RawMessage, ReadError>> + Send + 'a>>;

/// Pages through channel history via a [`ChannelTransport`].
///
/// Every `open` and page fetch is a `platform-read` call on the governor, so
/// throttling is absorbed before it ever reaches the stream consumer.
pub struct ChannelReader<T: ChannelTransport> {
    transport: T,
    governor: Arc<RateGovernor>,
    config: ReaderConfig,
}

impl<T: ChannelTransport> ChannelReader<T> {
    pub fn new(transport: T, governor: Arc<RateGovernor>, config: ReaderConfig) -> Self {
        Self {
            transport,
            governor,
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Stream the channel's messages past `cursor`.
    ///
    /// The stream is finite: it ends when history is exhausted, when the
    /// per-channel cap is reached, or right after yielding a read error.
    /// Entries without text are skipped.
    pub fn read(&self, channel: ChannelId, cursor: Option<ReadCursor>) -> MessageStream<'_> {
        Box::pin(stream! {
            let session = match self
                .governor
                .guard(CallKind::PlatformRead, || self.transport.open(&channel))
                .await
            {
                Ok(session) => session,
                Err(source) => {
                    warn!("Failed to open channel {}: {}", channel, source);
                    yield Err(ReadError::Open { channel, source });
                    return;
                }
            };

            debug!("Reading {} ({}) from {:?}", session.title, channel, cursor);

            let page_size = self.config.page_size.max(1);
            let cap = self.config.max_messages_per_channel;
            let mut cursor = cursor;
            let mut delivered = 0usize;

            while delivered < cap {
                let limit = page_size.min(cap - delivered);
                let page_cursor = cursor;
                let fetched = self
                    .governor
                    .guard(CallKind::PlatformRead, || {
                        self.transport.read_history(&session, page_cursor, limit)
                    })
                    .await;

                let mut page = match fetched {
                    Ok(page) => page,
                    Err(source) => {
                        warn!(
                            "Reading {} stopped after {} messages: {}",
                            channel, delivered, source
                        );
                        yield Err(ReadError::History { channel, source });
                        return;
                    }
                };

                page.sort_by_key(|entry| entry.id);
                page.retain(|entry| {
                    page_cursor.is_none_or(|c| c.admits(entry.id, entry.timestamp))
                });

                let Some(last_id) = page.last().map(|entry| entry.id) else {
                    break;
                };
                let short_page = page.len() < limit;

                for entry in page {
                    if entry.text.trim().is_empty() {
                        continue;
                    }
                    delivered += 1;
                    yield Ok(RawMessage::from_entry(&session, entry));
                    if delivered >= cap {
                        break;
                    }
                }

                if short_page {
                    break;
                }
                cursor = Some(ReadCursor::AfterId(last_id));
            }

            info!("Read {} messages from {}", delivered, session.title);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernorError;
    use crate::testing::{entry, MockTransport};
    use crate::types::message::{MessageId, ProcessedKey};
    use chrono::{Duration as ChronoDuration, Utc};
    use futures::StreamExt;
    use std::time::Duration;

    fn reader(transport: MockTransport, config: ReaderConfig) -> ChannelReader<MockTransport> {
        ChannelReader::new(transport, Arc::new(RateGovernor::unthrottled()), config)
    }

    #[tokio::test]
    async fn test_reads_all_pages_oldest_first() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            (1..=5).map(|id| entry(id, &format!("message number {}", id))),
        );
        let reader = reader(transport.clone(), ReaderConfig::default().with_page_size(2));

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;
        let ids: Vec<i64> = messages
            .into_iter()
            .map(|m| m.unwrap().key.message_id.0)
            .collect();

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        // Two full pages and a short one.
        assert_eq!(transport.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_cursor_is_respected() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            (1..=5).map(|id| entry(id, "some text")),
        );
        let reader = reader(transport, ReaderConfig::default());

        let messages: Vec<_> = reader
            .read("42".into(), Some(ReadCursor::AfterId(MessageId(3))))
            .collect()
            .await;

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].as_ref().unwrap().key,
            ProcessedKey::new("42", 4)
        );
    }

    #[tokio::test]
    async fn test_since_cursor_skips_old_messages() {
        let old = entry(1, "old post").with_timestamp(Utc::now() - ChronoDuration::days(30));
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            vec![old, entry(2, "new post")],
        );
        let reader = reader(transport, ReaderConfig::default());

        let since = ReadCursor::Since(Utc::now() - ChronoDuration::days(7));
        let messages: Vec<_> = reader.read("42".into(), Some(since)).collect().await;

        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_cap_limits_messages() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            (1..=10).map(|id| entry(id, "some text")),
        );
        let reader = reader(
            transport,
            ReaderConfig::default().with_page_size(3).with_max_messages(4),
        );

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_text_is_skipped() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            vec![entry(1, "  "), entry(2, "photo caption")],
        );
        let reader = reader(transport, ReaderConfig::default());

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_throttle_is_absorbed() {
        let transport = MockTransport::new()
            .with_channel("42", "Freshers Hub", vec![entry(1, "some text")])
            .throttle_reads(2, Duration::from_millis(1));
        let reader = reader(transport.clone(), ReaderConfig::default());

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;

        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_ok());
        assert_eq!(transport.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_ends_stream_with_error() {
        let transport = MockTransport::new()
            .with_channel("42", "Freshers Hub", vec![entry(1, "some text")])
            .deny("42");
        let reader = reader(transport, ReaderConfig::default());

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Err(ReadError::Open { source, .. }) => assert!(source.is_permanent()),
            other => panic!("expected open error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let reader = reader(MockTransport::new(), ReaderConfig::default());

        let messages: Vec<_> = reader.read("missing".into(), None).collect().await;

        assert!(matches!(
            messages.as_slice(),
            [Err(ReadError::Open {
                source: GovernorError::Upstream(_),
                ..
            })]
        ));
    }

    #[tokio::test]
    async fn test_failure_mid_history_keeps_earlier_messages() {
        let transport = MockTransport::new()
            .with_channel(
                "42",
                "Freshers Hub",
                (1..=4).map(|id| entry(id, "some text")),
            )
            .fail_history_after("42", 1);
        let reader = reader(transport, ReaderConfig::default().with_page_size(2));

        let messages: Vec<_> = reader.read("42".into(), None).collect().await;

        assert_eq!(messages.len(), 3);
        assert!(messages[..2].iter().all(|m| m.is_ok()));
        assert!(matches!(messages[2], Err(ReadError::History { .. })));
    }
}
