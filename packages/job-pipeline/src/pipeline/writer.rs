//! Batched writer - buffers decisions per destination and flushes them under
//! the `sheet-write` quota.
//!
//! A key reaches the dedup ledger only after the chunk holding its record has
//! been confirmed by the store. Anything still buffered when the process dies
//! is simply read and classified again on the next run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::StoreResult;
use crate::pipeline::governor::RateGovernor;
use crate::traits::store::{DedupLedger, RecordStore};
use crate::types::config::{CallKind, WriterConfig};
use crate::types::decision::{Decision, Destination};
use crate::types::message::ProcessedKey;
use crate::types::stats::FailedBatch;

/// Ordered buffer for one destination.
#[derive(Debug, Default)]
struct Batch {
    records: Vec<Decision>,

    /// When the oldest buffered record arrived.
    opened_at: Option<Instant>,

    failed_attempts: u32,
}

impl Batch {
    fn is_expired(&self, max_age: std::time::Duration) -> bool {
        self.opened_at
            .is_some_and(|opened| !self.records.is_empty() && opened.elapsed() >= max_age)
    }
}

/// Buffers decisions and writes them to a [`RecordStore`] in chunks.
pub struct BatchedWriter<S: RecordStore, L: DedupLedger> {
    store: S,
    ledger: L,
    governor: Arc<RateGovernor>,
    config: WriterConfig,
    batches: HashMap<Destination, Batch>,

    /// Keys queued in this run and not yet confirmed
    pending: HashSet<ProcessedKey>,

    /// Destinations given up on for the rest of the run
    disabled: HashMap<Destination, FailedBatch>,

    written: usize,
}

impl<S: RecordStore, L: DedupLedger> BatchedWriter<S, L> {
    pub fn new(store: S, ledger: L, governor: Arc<RateGovernor>, config: WriterConfig) -> Self {
        Self {
            store,
            ledger,
            governor,
            config,
            batches: HashMap::new(),
            pending: HashSet::new(),
            disabled: HashMap::new(),
            written: 0,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Whether the key is buffered (or stuck in a failed batch) in this run.
    pub fn is_pending(&self, key: &ProcessedKey) -> bool {
        self.pending.contains(key)
    }

    /// Records buffered across all destinations.
    pub fn buffered(&self) -> usize {
        self.batches.values().map(|b| b.records.len()).sum()
    }

    /// Records confirmed by the store so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Enqueue a decision; flushes its destination once the batch is full.
    pub async fn add(&mut self, mut decision: Decision) -> StoreResult<()> {
        let destination = decision.destination();
        decision.truncate_text(self.config.max_text_len);
        self.pending.insert(decision.key().clone());

        if let Some(failed) = self.disabled.get_mut(&destination) {
            debug!("{} is disabled, leaving {} unwritten", destination, decision.key());
            failed.records += 1;
            return Ok(());
        }

        let batch = self.batches.entry(destination).or_default();
        batch.opened_at.get_or_insert_with(Instant::now);
        batch.records.push(decision);

        if batch.records.len() >= self.config.max_batch_size.max(1) {
            self.flush(destination).await?;
        }
        Ok(())
    }

    /// Write everything buffered for `destination`, one chunk per append.
    ///
    /// Returns the number of records confirmed. A failed chunk stays in the
    /// batch for a later attempt; only ledger errors are returned, after the
    /// chunk has left the batch.
    pub async fn flush(&mut self, destination: Destination) -> StoreResult<usize> {
        if self.disabled.contains_key(&destination) {
            return Ok(0);
        }

        let chunk_size = self.config.max_batch_size.max(1);
        let mut flushed = 0;

        loop {
            let Some(batch) = self.batches.get_mut(&destination) else {
                return Ok(flushed);
            };
            if batch.records.is_empty() {
                batch.opened_at = None;
                return Ok(flushed);
            }

            let n = chunk_size.min(batch.records.len());
            let chunk = &batch.records[..n];
            let store = &self.store;
            let result = self
                .governor
                .guard(CallKind::SheetWrite, || store.append_rows(destination, chunk))
                .await;

            match result {
                Ok(()) => {
                    batch.failed_attempts = 0;
                    let keys: Vec<ProcessedKey> = batch
                        .records
                        .drain(..n)
                        .map(|record| record.key().clone())
                        .collect();
                    for key in &keys {
                        self.pending.remove(key);
                    }
                    self.written += n;
                    flushed += n;
                    info!("Flushed {} records to {}", n, destination);

                    self.ledger.mark_all(&keys).await?;
                }
                Err(e) => {
                    batch.failed_attempts += 1;
                    let attempts = batch.failed_attempts;
                    warn!(
                        "Flush of {} records to {} failed (attempt {}/{}): {}",
                        batch.records.len(),
                        destination,
                        attempts,
                        self.config.max_flush_retries,
                        e
                    );

                    if attempts >= self.config.max_flush_retries {
                        let records = std::mem::take(&mut batch.records);
                        batch.opened_at = None;
                        error!(
                            "Disabling {} for this run, {} records left unwritten",
                            destination,
                            records.len()
                        );
                        self.disabled.insert(
                            destination,
                            FailedBatch {
                                destination,
                                records: records.len(),
                                attempts,
                                error: e.to_string(),
                            },
                        );
                    }
                    return Ok(flushed);
                }
            }
        }
    }

    /// Flush every batch whose oldest record exceeded the max age.
    pub async fn flush_expired(&mut self) -> StoreResult<usize> {
        let max_age = self.config.max_batch_age();
        let expired: Vec<Destination> = Destination::ALL
            .into_iter()
            .filter(|d| self.batches.get(d).is_some_and(|b| b.is_expired(max_age)))
            .collect();

        let mut flushed = 0;
        for destination in expired {
            debug!("Batch for {} expired", destination);
            flushed += self.flush(destination).await?;
        }
        Ok(flushed)
    }

    /// Flush everything, retrying failed chunks until they succeed or their
    /// destination is disabled.
    ///
    /// A ledger error does not stop the drain: every destination is still
    /// flushed and the first error is returned at the end.
    pub async fn drain(&mut self) -> StoreResult<usize> {
        let mut flushed = 0;
        let mut first_error = None;

        for destination in Destination::ALL {
            while self.has_buffered(destination) && !self.disabled.contains_key(&destination) {
                match self.flush(destination).await {
                    Ok(n) => flushed += n,
                    Err(e) => {
                        // The chunk was written, only its marking failed.
                        error!("Failed to mark flushed {} records: {}", destination, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Batches given up on during this run.
    pub fn failures(&self) -> Vec<FailedBatch> {
        Destination::ALL
            .iter()
            .filter_map(|d| self.disabled.get(d).cloned())
            .collect()
    }

    fn has_buffered(&self, destination: Destination) -> bool {
        self.batches
            .get(&destination)
            .is_some_and(|b| !b.records.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, UpstreamError};
    use crate::stores::MemoryStore;
    use crate::testing::{relevant_decision, uncategorized_decision, FailingStore, RecordingStore};
    use crate::types::config::{CallPolicy, GovernorConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Ledger whose first `mark_all` fails.
    #[derive(Clone, Default)]
    struct FlakyLedger {
        inner: MemoryStore,
        failed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DedupLedger for FlakyLedger {
        async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool> {
            self.inner.seen(key).await
        }

        async fn mark(&self, key: &ProcessedKey) -> StoreResult<()> {
            self.inner.mark(key).await
        }

        async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.mark_all(keys).await
        }

        async fn len(&self) -> StoreResult<usize> {
            self.inner.len().await
        }
    }

    fn writer<S: RecordStore>(
        store: S,
        ledger: MemoryStore,
        config: WriterConfig,
    ) -> BatchedWriter<S, MemoryStore> {
        BatchedWriter::new(store, ledger, Arc::new(RateGovernor::unthrottled()), config)
    }

    #[tokio::test]
    async fn test_full_batches_flush_in_chunks() {
        let store = RecordingStore::new();
        let ledger = MemoryStore::new();
        let mut writer = writer(
            store.clone(),
            ledger.clone(),
            WriterConfig::default().with_max_batch_size(3),
        );

        for id in 1..=7 {
            writer.add(relevant_decision("42", id)).await.unwrap();
        }
        writer.drain().await.unwrap();

        assert_eq!(store.append_sizes(Destination::Relevant), vec![3, 3, 1]);
        assert_eq!(ledger.len().await.unwrap(), 7);
        assert_eq!(writer.written(), 7);
    }

    #[tokio::test]
    async fn test_keys_marked_only_after_flush() {
        let ledger = MemoryStore::new();
        let mut writer = writer(
            RecordingStore::new(),
            ledger.clone(),
            WriterConfig::default().with_max_batch_size(10),
        );

        let decision = uncategorized_decision("42", 777);
        let key = decision.key().clone();
        writer.add(decision).await.unwrap();

        assert!(writer.is_pending(&key));
        assert!(!ledger.seen(&key).await.unwrap());

        writer.drain().await.unwrap();

        assert!(!writer.is_pending(&key));
        assert!(ledger.seen(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_batches_flush() {
        let store = RecordingStore::new();
        let mut writer = writer(
            store.clone(),
            MemoryStore::new(),
            WriterConfig::default().with_max_batch_age(Duration::from_millis(5)),
        );

        writer.add(relevant_decision("42", 1)).await.unwrap();
        assert_eq!(writer.flush_expired().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(writer.flush_expired().await.unwrap(), 1);
        assert_eq!(store.append_sizes(Destination::Relevant), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let store = RecordingStore::new().fail_next(1);
        let ledger = MemoryStore::new();
        let mut writer = writer(store.clone(), ledger.clone(), WriterConfig::default());

        writer.add(relevant_decision("42", 1)).await.unwrap();
        assert_eq!(writer.flush(Destination::Relevant).await.unwrap(), 0);
        assert_eq!(ledger.len().await.unwrap(), 0);
        assert_eq!(writer.buffered(), 1);

        writer.drain().await.unwrap();
        assert_eq!(ledger.len().await.unwrap(), 1);
        assert!(writer.failures().is_empty());
    }

    #[tokio::test]
    async fn test_destination_disabled_after_max_retries() {
        let store = FailingStore::new(|| UpstreamError::Unavailable("sheet gone".into()));
        let ledger = MemoryStore::new();
        let mut writer = writer(
            store.clone(),
            ledger.clone(),
            WriterConfig::default().with_max_flush_retries(2),
        );

        writer.add(relevant_decision("42", 1)).await.unwrap();
        writer.add(relevant_decision("42", 2)).await.unwrap();
        writer.drain().await.unwrap();

        // Later adds to a disabled destination are counted, not written.
        writer.add(relevant_decision("42", 3)).await.unwrap();
        writer.add(uncategorized_decision("42", 4)).await.unwrap();

        let failures = writer.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].destination, Destination::Relevant);
        assert_eq!(failures[0].records, 3);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(store.calls(), 2);
        assert_eq!(ledger.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_text_is_truncated() {
        let store = RecordingStore::new();
        let mut config = WriterConfig::default();
        config.max_text_len = 5;
        let mut writer = writer(store.clone(), MemoryStore::new(), config);

        writer.add(relevant_decision("42", 1)).await.unwrap();
        writer.drain().await.unwrap();

        assert_eq!(store.rows(Destination::Relevant)[0].text().chars().count(), 5);
    }

    #[tokio::test]
    async fn test_ledger_error_does_not_stop_other_destinations() {
        let store = RecordingStore::new();
        let ledger = FlakyLedger::default();
        let mut writer = BatchedWriter::new(
            store.clone(),
            ledger.clone(),
            Arc::new(RateGovernor::unthrottled()),
            WriterConfig::default(),
        );

        writer.add(relevant_decision("42", 1)).await.unwrap();
        writer.add(uncategorized_decision("42", 2)).await.unwrap();

        let result = writer.drain().await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.append_sizes(Destination::Relevant), vec![1]);
        assert_eq!(store.append_sizes(Destination::Uncategorized), vec![1]);
        assert_eq!(writer.buffered(), 0);
        assert_eq!(writer.written(), 2);

        // Only the batch whose marking failed is missing from the ledger.
        assert_eq!(ledger.len().await.unwrap(), 1);
        assert!(ledger
            .seen(uncategorized_decision("42", 2).key())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_throttled_writes_disable_destination() {
        let store = FailingStore::new(|| UpstreamError::throttled_for(Duration::from_millis(1)));
        let ledger = MemoryStore::new();
        let governor = RateGovernor::new(&GovernorConfig::uniform(
            CallPolicy::unthrottled().with_max_retries(2),
        ));
        let mut writer = BatchedWriter::new(
            store.clone(),
            ledger.clone(),
            Arc::new(governor),
            WriterConfig::default().with_max_flush_retries(2),
        );

        writer.add(relevant_decision("42", 1)).await.unwrap();
        writer.drain().await.unwrap();

        // Each flush attempt is one call plus two throttle retries.
        assert_eq!(store.calls(), 3 * 2);
        assert_eq!(ledger.len().await.unwrap(), 0);
        assert_eq!(writer.buffered(), 0);

        let failures = writer.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].destination, Destination::Relevant);
        assert_eq!(failures[0].records, 1);
        assert_eq!(failures[0].attempts, 2);
        assert!(writer.is_pending(relevant_decision("42", 1).key()));
    }
}
