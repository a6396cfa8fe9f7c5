//! Transport trait for reading channel history from a messaging platform.

use async_trait::async_trait;

use crate::error::UpstreamResult;
use crate::types::message::{ChannelId, ChannelSession, RawEntry, ReadCursor};

/// Access to a messaging platform's channel history.
///
/// Implementations signal rate limiting with
/// [`UpstreamError::Throttled`](crate::error::UpstreamError::Throttled) and
/// credential or permission problems with `Auth`; they never sleep or retry
/// themselves. Pacing is the governor's job.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Resolve a channel and open a session on it.
    async fn open(&self, channel: &ChannelId) -> UpstreamResult<ChannelSession>;

    /// Fetch up to `limit` entries past `cursor`, oldest first.
    ///
    /// An empty result means the history is exhausted. With no cursor the
    /// transport starts from the beginning of what it retains.
    async fn read_history(
        &self,
        session: &ChannelSession,
        cursor: Option<ReadCursor>,
        limit: usize,
    ) -> UpstreamResult<Vec<RawEntry>>;
}
