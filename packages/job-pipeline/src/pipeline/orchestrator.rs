//! Pipeline orchestrator - one run over the configured channels.
//!
//! Per message: dedup check, noise filter, classification, enqueue, expired
//! batch flush. Failures are isolated to the channel or destination they came
//! from; a run with some failed channels still returns its stats.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::governor::RateGovernor;
use crate::pipeline::reader::ChannelReader;
use crate::pipeline::writer::BatchedWriter;
use crate::traits::{
    extractor::JobExtractor,
    store::{DedupLedger, RecordStore},
    transport::ChannelTransport,
};
use crate::types::{
    config::PipelineConfig,
    decision::{Decision, Enrichment},
    message::{ChannelId, RawMessage, ReadCursor},
    stats::{ChannelFailure, RunStats},
};

/// Ingestion pipeline wiring reader, classifier and writer together.
///
/// # Example
///
/// ```rust,ignore
/// use job_pipeline::{Pipeline, PipelineConfig, MemoryStore, DisabledExtractor};
///
/// let store = MemoryStore::new();
/// let pipeline = Pipeline::new(
///     PipelineConfig::default(),
///     transport,
///     DisabledExtractor,
///     store.clone(),
///     store,
/// )?;
///
/// let stats = pipeline.run(&channels, &CancellationToken::new()).await?;
/// println!("{} relevant of {} seen", stats.relevant, stats.messages_seen);
/// ```
pub struct Pipeline<T, E, S, L>
where
    T: ChannelTransport,
    E: JobExtractor,
    S: RecordStore,
    L: DedupLedger,
{
    reader: ChannelReader<T>,
    classifier: Classifier<E>,
    store: S,
    ledger: L,
    governor: Arc<RateGovernor>,
    config: PipelineConfig,
}

impl<T, E, S, L> Pipeline<T, E, S, L>
where
    T: ChannelTransport,
    E: JobExtractor,
    S: RecordStore,
    L: DedupLedger,
{
    /// Build a pipeline with its own governor from `config.governor`.
    pub fn new(config: PipelineConfig, transport: T, extractor: E, store: S, ledger: L) -> Result<Self> {
        let governor = Arc::new(RateGovernor::new(&config.governor));
        Self::with_governor(config, transport, extractor, store, ledger, governor)
    }

    /// Build a pipeline sharing an existing governor.
    pub fn with_governor(
        config: PipelineConfig,
        transport: T,
        extractor: E,
        store: S,
        ledger: L,
        governor: Arc<RateGovernor>,
    ) -> Result<Self> {
        if config.writer.max_batch_size == 0 {
            return Err(PipelineError::Config("writer.max_batch_size must be > 0".into()));
        }

        Ok(Self {
            reader: ChannelReader::new(transport, governor.clone(), config.reader.clone()),
            classifier: Classifier::new(&config.rules, extractor, governor.clone())?,
            store,
            ledger,
            governor,
            config,
        })
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run once over `channels`.
    ///
    /// Cancellation stops reading between messages; whatever was queued is
    /// still drained before returning. Returns
    /// [`PipelineError::NoChannelReadable`] only if every channel failed
    /// before yielding a single message.
    pub async fn run(&self, channels: &[ChannelId], cancel: &CancellationToken) -> Result<RunStats> {
        let mut stats = RunStats::new();
        let mut writer = BatchedWriter::new(
            &self.store,
            &self.ledger,
            self.governor.clone(),
            self.config.writer.clone(),
        );
        let since = lookback_start(Utc::now(), self.config.reader.lookback_days);
        let mut unreadable = 0usize;

        info!(
            "Starting run {} over {} channels (since {})",
            stats.run_id,
            channels.len(),
            since.format("%Y-%m-%d %H:%M")
        );

        'channels: for channel in channels {
            let mut stream = self.reader.read(channel.clone(), Some(ReadCursor::Since(since)));
            let mut read = 0usize;

            loop {
                // In-flight calls finish; the token is only honored here.
                if cancel.is_cancelled() {
                    info!("Run cancelled while reading {}", channel);
                    stats.cancelled = true;
                    break 'channels;
                }

                let message = match stream.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        if read == 0 {
                            unreadable += 1;
                        }
                        stats.failed_channels.push(ChannelFailure {
                            channel: channel.clone(),
                            messages_read: read,
                            error: e.to_string(),
                        });
                        break;
                    }
                    None => break,
                };

                read += 1;
                self.process(message, &mut writer, &mut stats).await;
            }
        }

        match writer.drain().await {
            Ok(n) if n > 0 => debug!("Drained {} records", n),
            Ok(_) => {}
            Err(e) => {
                warn!("Ledger update failed during drain: {}", e);
                stats.errors += 1;
            }
        }
        stats.failed_batches = writer.failures();
        stats.finish();

        info!(
            "Run {} finished: {} seen, {} relevant, {} uncategorized, {} skipped, {} errors",
            stats.run_id,
            stats.messages_seen,
            stats.relevant,
            stats.uncategorized,
            stats.skipped,
            stats.errors
        );

        if !channels.is_empty() && unreadable == channels.len() {
            return Err(PipelineError::NoChannelReadable { failed: unreadable });
        }
        Ok(stats)
    }

    async fn process(
        &self,
        message: RawMessage,
        writer: &mut BatchedWriter<&S, &L>,
        stats: &mut RunStats,
    ) {
        stats.messages_seen += 1;
        let key = &message.key;

        match self.ledger.seen(key).await {
            Ok(true) => {
                stats.skipped += 1;
                return;
            }
            Ok(false) if writer.is_pending(key) => {
                stats.skipped += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Ledger lookup failed for {}, skipping: {}", key, e);
                stats.errors += 1;
                return;
            }
        }

        if message.text.trim().chars().count() < self.config.reader.min_text_len {
            stats.discarded += 1;
            if let Err(e) = self.ledger.mark(key).await {
                warn!("Failed to mark noise message {}: {}", key, e);
                stats.errors += 1;
            }
            return;
        }

        let decision = self.classifier.classify(&message).await;
        match &decision {
            Decision::Relevant(record) => {
                stats.record_relevant(&record.meta.source);
                if record.enrichment == Enrichment::AiUnavailableFallback {
                    stats.ai_fallbacks += 1;
                }
            }
            Decision::Uncategorized(_) => stats.uncategorized += 1,
        }

        if let Err(e) = writer.add(decision).await {
            warn!("Ledger update failed after flush: {}", e);
            stats.errors += 1;
        }
        if let Err(e) = writer.flush_expired().await {
            warn!("Ledger update failed after flush: {}", e);
            stats.errors += 1;
        }
    }
}

/// Start of the read window, clamped to the earliest representable instant.
fn lookback_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{entry, MockExtractor, MockTransport};
    use crate::types::config::{CallPolicy, GovernorConfig};
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_governor(GovernorConfig::uniform(CallPolicy::unthrottled()))
    }

    #[tokio::test]
    async fn test_run_counts_decisions() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            vec![
                entry(1, "Hiring freshers for SDE role, 0-1 yrs exp, apply: jobs.co/x"),
                entry(2, "Senior Backend Engineer, 5+ years required"),
                entry(3, "ok"),
            ],
        );
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(
            config(),
            transport,
            MockExtractor::new(),
            store.clone(),
            store.clone(),
        )
        .unwrap();

        let stats = pipeline
            .run(&["42".into()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.messages_seen, 3);
        assert_eq!(stats.relevant, 1);
        assert_eq!(stats.uncategorized, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.relevant_by_source.get("Freshers Hub"), Some(&1));
        assert!(stats.is_success());
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_all_channels_failing_is_an_error() {
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(
            config(),
            MockTransport::new(),
            MockExtractor::new(),
            store.clone(),
            store,
        )
        .unwrap();

        let result = pipeline
            .run(&["a".into(), "b".into()], &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::NoChannelReadable { failed: 2 })));
    }

    #[tokio::test]
    async fn test_no_channels_is_an_empty_run() {
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(
            config(),
            MockTransport::new(),
            MockExtractor::new(),
            store.clone(),
            store,
        )
        .unwrap();

        let stats = pipeline.run(&[], &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.messages_seen, 0);
        assert!(stats.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_run_still_returns_stats() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            vec![entry(1, "Hiring freshers for SDE role, 0-1 yrs exp")],
        );
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(
            config(),
            transport,
            MockExtractor::new(),
            store.clone(),
            store.clone(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = pipeline.run(&["42".into()], &cancel).await.unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.messages_seen, 0);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = config();
        config.writer.max_batch_size = 0;
        let store = MemoryStore::new();

        let result = Pipeline::new(config, MockTransport::new(), MockExtractor::new(), store.clone(), store);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_read_finish() {
        let transport = MockTransport::new()
            .with_channel(
                "42",
                "Freshers Hub",
                vec![entry(1, "Hiring freshers for SDE role, 0-1 yrs exp")],
            )
            .with_read_delay(Duration::from_millis(200));
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(
            config(),
            transport.clone(),
            MockExtractor::new(),
            store.clone(),
            store.clone(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let stats = pipeline.run(&["42".into()], &cancel).await.unwrap();

        assert!(stats.cancelled);
        assert_eq!(transport.completed_reads(), 1);
        // The message from the finished read is processed and written.
        assert_eq!(stats.messages_seen, 1);
        assert_eq!(stats.relevant, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_lookback_reads_everything() {
        let transport = MockTransport::new().with_channel(
            "42",
            "Freshers Hub",
            vec![entry(1, "Hiring freshers for SDE role, 0-1 yrs exp")],
        );
        let mut config = config();
        config.reader.lookback_days = i64::MAX;
        let store = MemoryStore::new();
        let pipeline =
            Pipeline::new(config, transport, MockExtractor::new(), store.clone(), store).unwrap();

        let stats = pipeline
            .run(&["42".into()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.relevant, 1);
    }

    #[test]
    fn test_lookback_start_clamps_on_overflow() {
        let now = Utc::now();
        assert_eq!(lookback_start(now, 7), now - TimeDelta::days(7));
        assert_eq!(lookback_start(now, i64::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(lookback_start(now, i64::MIN), DateTime::<Utc>::MIN_UTC);
    }
}
