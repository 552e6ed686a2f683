// Copyright 2025 Pulse Contributors (https://github.com/pulse-obs/pulse)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Consumer loop
//!
//! Polls the reader on a fixed interval, applies records in sequence
//! order to the downstream sink, retries failures up to a budget, and
//! escalates exhausted records to the dead-letter queue before
//! advancing the checkpoint past them.
//!
//! Retry counters live in memory only: a restart grants records still
//! below the checkpoint a fresh retry budget. That trade-off favors
//! eventual dead-lettering over strict retry accounting across
//! restarts.

use crate::dead_letter::DeadLetterQueue;
use crate::reader::WalReader;
use pulse_core::{Result, WalConfig, WalRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Downstream apply seam. Implementations MUST be idempotent: applying
/// the same record twice (same primary keys) must not create duplicates
/// or error — that is what makes the WAL's at-least-once delivery
/// acceptable.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn apply(&self, record: &WalRecord) -> anyhow::Result<()>;
}

/// Tuning for the consumer loop.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// How often to poll for new records.
    pub poll_interval: Duration,
    /// Maximum records drained per tick.
    pub batch_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 100,
        }
    }
}

/// Polling consumer for one WAL partition.
///
/// Exactly one listener owns a partition's checkpoint; the reader only
/// ever reads it.
pub struct StreamListener {
    reader: WalReader,
    dlq: DeadLetterQueue,
    sink: Arc<dyn RecordSink>,
    max_retries: u32,
    batch_size: usize,
    /// Per-sequence attempt counts. In-memory only by design.
    retry_count: HashMap<u64, u32>,
}

impl StreamListener {
    pub fn new(
        config: WalConfig,
        listener_config: &ListenerConfig,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        let dlq = DeadLetterQueue::new(&config.wal_dir)?;
        let max_retries = config.max_retries;
        Ok(Self {
            reader: WalReader::new(config),
            dlq,
            sink,
            max_retries,
            batch_size: listener_config.batch_size,
            retry_count: HashMap::new(),
        })
    }

    /// Drain and apply one batch. Returns how many records were fully
    /// handled (applied or dead-lettered).
    ///
    /// Records are applied strictly in sequence order, one at a time.
    /// A failing record below its retry budget stops the batch — a
    /// later record must never be acked while an earlier one is still
    /// pending retry. A record at its budget goes to the DLQ and the
    /// batch continues behind it.
    pub async fn process_batch(&mut self) -> Result<usize> {
        let pass = self.reader.read_batch(self.batch_size)?;
        if pass.records.is_empty() {
            return Ok(0);
        }

        let mut handled = 0usize;
        let mut max_processed: Option<u64> = None;

        for record in &pass.records {
            match self.sink.apply(record).await {
                Ok(()) => {
                    self.retry_count.remove(&record.sequence);
                    max_processed = Some(record.sequence);
                    handled += 1;
                }
                Err(err) => {
                    let retries = self.retry_count.get(&record.sequence).copied().unwrap_or(0);
                    if retries < self.max_retries {
                        self.retry_count.insert(record.sequence, retries + 1);
                        warn!(
                            sequence = record.sequence,
                            attempt = retries + 1,
                            max_retries = self.max_retries,
                            error = %err,
                            "record apply failed, will retry"
                        );
                        break;
                    }

                    error!(
                        sequence = record.sequence,
                        retries = self.max_retries,
                        error = %err,
                        "retry budget exhausted, dead-lettering record"
                    );
                    if let Err(dlq_err) = self.dlq.write(record, &err.to_string(), self.max_retries)
                    {
                        // Blocking the whole partition on a DLQ disk
                        // fault is worse than the small risk of losing
                        // this entry, so the record still counts as
                        // handled.
                        error!(
                            sequence = record.sequence,
                            error = %dlq_err,
                            "failed to write dead-letter entry"
                        );
                    }
                    self.retry_count.remove(&record.sequence);
                    max_processed = Some(record.sequence);
                    handled += 1;
                }
            }
        }

        if let Some(max_processed) = max_processed {
            self.reader.mark_next_sequence(max_processed + 1)?;
            debug!(next_sequence = max_processed + 1, handled, "checkpoint advanced");
        }
        Ok(handled)
    }

    /// Run the polling loop on a background task until told to stop.
    ///
    /// One tick fully finishes before the next starts (the loop awaits
    /// `process_batch` between ticks), which is the single-flight
    /// guarantee: two batches never run concurrently against the same
    /// checkpoint.
    pub fn spawn(mut self, listener_config: &ListenerConfig) -> ListenerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poll_interval = listener_config.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.process_batch().await {
                            error!(error = %err, "listener batch failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("listener stopped");
        });

        ListenerHandle { shutdown_tx, task }
    }
}

/// Handle to a running listener task.
pub struct ListenerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop the timer and wait for any in-flight tick to finish
    /// naturally — ticks are never forcibly aborted.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::reader::test_support::trace_payload;
    use crate::writer::WalWriter;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink that records applied sequences; optionally fails the first
    /// N apply attempts for a given sequence.
    struct TestSink {
        applied: Mutex<Vec<u64>>,
        fail_sequence: Option<u64>,
        failures_remaining: AtomicUsize,
    }

    impl TestSink {
        fn ok() -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_sequence: None,
                failures_remaining: AtomicUsize::new(0),
            }
        }

        fn failing(sequence: u64, failures: usize) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_sequence: Some(sequence),
                failures_remaining: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait::async_trait]
    impl RecordSink for TestSink {
        async fn apply(&self, record: &WalRecord) -> anyhow::Result<()> {
            if self.fail_sequence == Some(record.sequence)
                && self
                    .failures_remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                anyhow::bail!("simulated apply failure");
            }
            self.applied.lock().push(record.sequence);
            Ok(())
        }
    }

    fn populated(dir: &std::path::Path, count: u64) -> WalConfig {
        let config = WalConfig::new(dir);
        let mut writer = WalWriter::new(config.clone());
        writer.initialize().unwrap();
        for _ in 0..count {
            writer.append(trace_payload("p1")).unwrap();
        }
        writer.close().unwrap();
        config
    }

    fn checkpoint_value(dir: &std::path::Path) -> u64 {
        let mut checkpoint = Checkpoint::new(dir);
        checkpoint.load().unwrap();
        checkpoint.next_sequence()
    }

    #[tokio::test]
    async fn test_applies_in_order_and_advances_checkpoint() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = populated(dir.path(), 3);
        let sink = Arc::new(TestSink::ok());

        let mut listener =
            StreamListener::new(config, &ListenerConfig::default(), sink.clone()).unwrap();
        let handled = listener.process_batch().await.unwrap();

        assert_eq!(handled, 3);
        assert_eq!(*sink.applied.lock(), vec![0, 1, 2]);
        assert_eq!(checkpoint_value(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_empty_log_is_a_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = WalConfig::new(dir.path());
        let sink = Arc::new(TestSink::ok());

        let mut listener =
            StreamListener::new(config, &ListenerConfig::default(), sink).unwrap();
        assert_eq!(listener.process_batch().await.unwrap(), 0);
        assert_eq!(checkpoint_value(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failing_record_stops_batch_to_preserve_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = populated(dir.path(), 3);
        // Sequence 1 fails once; sequence 2 must not be applied first.
        let sink = Arc::new(TestSink::failing(1, 1));

        let mut listener =
            StreamListener::new(config, &ListenerConfig::default(), sink.clone()).unwrap();

        let handled = listener.process_batch().await.unwrap();
        assert_eq!(handled, 1);
        assert_eq!(*sink.applied.lock(), vec![0]);
        assert_eq!(checkpoint_value(dir.path()), 1);

        // Next tick: the retry succeeds, the rest of the batch follows.
        let handled = listener.process_batch().await.unwrap();
        assert_eq!(handled, 2);
        assert_eq!(*sink.applied.lock(), vec![0, 1, 2]);
        assert_eq!(checkpoint_value(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter_and_advance() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = populated(dir.path(), 2);
        config.max_retries = 2;
        // Sequence 0 always fails.
        let sink = Arc::new(TestSink::failing(0, usize::MAX));

        let mut listener =
            StreamListener::new(config.clone(), &ListenerConfig::default(), sink.clone()).unwrap();

        // max_retries ticks end in a pending retry, nothing handled.
        for _ in 0..config.max_retries {
            assert_eq!(listener.process_batch().await.unwrap(), 0);
        }
        assert_eq!(checkpoint_value(dir.path()), 0);

        // Budget exhausted: dead-letter, then the batch continues.
        let handled = listener.process_batch().await.unwrap();
        assert_eq!(handled, 2);
        assert_eq!(*sink.applied.lock(), vec![1]);
        assert_eq!(checkpoint_value(dir.path()), 2);

        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        let entries = dlq.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 0);
        assert_eq!(entries[0].retries, 2);
    }

    #[tokio::test]
    async fn test_dead_lettered_record_is_never_replayed() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = populated(dir.path(), 1);
        config.max_retries = 0;
        let sink = Arc::new(TestSink::failing(0, usize::MAX));

        let mut listener =
            StreamListener::new(config, &ListenerConfig::default(), sink.clone()).unwrap();
        assert_eq!(listener.process_batch().await.unwrap(), 1);
        assert_eq!(checkpoint_value(dir.path()), 1);

        // Replays see nothing: the checkpoint is past the DLQ'd record.
        assert_eq!(listener.process_batch().await.unwrap(), 0);
        assert!(sink.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_listener_drains_and_stops() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = populated(dir.path(), 3);
        let sink = Arc::new(TestSink::ok());

        let listener_config = ListenerConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 100,
        };
        let listener =
            StreamListener::new(config, &listener_config, sink.clone()).unwrap();
        let handle = listener.spawn(&listener_config);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert_eq!(*sink.applied.lock(), vec![0, 1, 2]);
        assert_eq!(checkpoint_value(dir.path()), 3);
    }
}
