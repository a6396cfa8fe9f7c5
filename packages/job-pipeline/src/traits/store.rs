//! Storage traits for the dedup ledger, record persistence and browsing.
//!
//! The storage layer is split into focused traits:
//! - `DedupLedger`: which `(channel, message id)` pairs are done
//! - `RecordStore`: append-only persistence of decisions per destination
//! - `RecordQuery`: read side used by the presentation layer
//!
//! A single backend may implement all three; the ledger and the record
//! tables only have to agree on what was actually flushed.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{StoreResult, UpstreamResult};
use crate::types::{
    decision::{Decision, Destination},
    message::ProcessedKey,
    query::{DashboardStats, PageRequest, RecordFilter, RecordPage, SourceCount},
};

/// Tracks messages that completed the pipeline.
///
/// A key present here is never reprocessed. The ledger outlives a run; it
/// spans the whole deployment.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Whether the message already completed the pipeline.
    async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool>;

    /// Record a message as done.
    async fn mark(&self, key: &ProcessedKey) -> StoreResult<()>;

    /// Record many messages as done.
    async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
        for key in keys {
            self.mark(key).await?;
        }
        Ok(())
    }

    /// Number of keys in the ledger.
    async fn len(&self) -> StoreResult<usize>;
}

/// Append-only persistence of classified records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append rows to a destination as one write.
    ///
    /// Throttling is reported as `UpstreamError::Throttled` so the writer's
    /// governor can back off.
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()>;
}

/// Read-side query surface over persisted records.
#[async_trait]
pub trait RecordQuery: Send + Sync {
    /// Filtered, paginated listing, newest first.
    async fn list(&self, filter: &RecordFilter, page: PageRequest) -> StoreResult<RecordPage>;

    /// Aggregate counts; `today` decides the "today" bucket.
    async fn stats(&self, today: NaiveDate) -> StoreResult<DashboardStats>;

    /// All sources with their message counts, sorted by name.
    async fn sources(&self) -> StoreResult<Vec<SourceCount>>;

    /// Single record by key.
    async fn get(&self, key: &ProcessedKey) -> StoreResult<Option<Decision>>;
}

#[async_trait]
impl<L: DedupLedger + ?Sized> DedupLedger for &L {
    async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool> {
        (**self).seen(key).await
    }

    async fn mark(&self, key: &ProcessedKey) -> StoreResult<()> {
        (**self).mark(key).await
    }

    async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
        (**self).mark_all(keys).await
    }

    async fn len(&self) -> StoreResult<usize> {
        (**self).len().await
    }
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for &S {
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()> {
        (**self).append_rows(destination, rows).await
    }
}

#[async_trait]
impl<L: DedupLedger + ?Sized> DedupLedger for std::sync::Arc<L> {
    async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool> {
        (**self).seen(key).await
    }

    async fn mark(&self, key: &ProcessedKey) -> StoreResult<()> {
        (**self).mark(key).await
    }

    async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
        (**self).mark_all(keys).await
    }

    async fn len(&self) -> StoreResult<usize> {
        (**self).len().await
    }
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()> {
        (**self).append_rows(destination, rows).await
    }
}
