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

//! Partitioned WAL service
//!
//! One `WalService` owns every partition of a stream: a writer and a
//! running listener per partition directory. It is constructed once at
//! process startup and passed by handle to callers — no ambient
//! singletons, so tests can run multiple independent instances.

use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::index::WalIndex;
use crate::listener::{ListenerConfig, ListenerHandle, RecordSink, StreamListener};
use crate::partition::{partition_dir, partition_for_key};
use crate::segment::Segment;
use crate::writer::WalWriter;
use parking_lot::Mutex;
use pulse_core::{Payload, Result, WalConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for one partitioned stream.
#[derive(Debug, Clone)]
pub struct WalServiceConfig {
    /// Thresholds and the stream's root directory. Each partition gets
    /// a subdirectory beneath it (or the root itself when unpartitioned).
    pub wal: WalConfig,
    pub partitions: u32,
    pub listener: ListenerConfig,
}

struct Partition {
    dir: PathBuf,
    writer: Mutex<WalWriter>,
}

/// A running, partitioned WAL with its consumer loops.
pub struct WalService {
    config: WalServiceConfig,
    partitions: Vec<Partition>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl WalService {
    /// Initialize every partition's writer and start its listener.
    ///
    /// Initialization failure is fatal by design: serving with broken
    /// sequence bookkeeping is worse than not starting.
    pub fn start(config: WalServiceConfig, sink: Arc<dyn RecordSink>) -> Result<Self> {
        let count = config.partitions.max(1);
        let mut partitions = Vec::with_capacity(count as usize);
        let mut listeners = Vec::with_capacity(count as usize);

        for idx in 0..count {
            let dir = partition_dir(&config.wal.wal_dir, count, idx);
            let partition_config = config.wal.with_dir(&dir);

            let mut writer = WalWriter::new(partition_config.clone());
            writer.initialize()?;

            let listener =
                StreamListener::new(partition_config, &config.listener, Arc::clone(&sink))?;
            listeners.push(listener.spawn(&config.listener));

            partitions.push(Partition {
                dir,
                writer: Mutex::new(writer),
            });
        }

        info!(
            root = %config.wal.wal_dir.display(),
            partitions = count,
            "WAL service started"
        );

        Ok(Self {
            config,
            partitions,
            listeners: Mutex::new(listeners),
        })
    }

    /// Append a payload to the partition selected by the routing key
    /// and return its assigned sequence.
    pub fn publish(&self, routing_key: &str, payload: Payload) -> Result<u64> {
        let partition = self.partition_for(routing_key);
        let mut writer = self.partitions[partition as usize].writer.lock();
        writer.append(payload)
    }

    /// Partition index a routing key maps to.
    pub fn partition_for(&self, routing_key: &str) -> u32 {
        partition_for_key(routing_key, self.partitions.len() as u32)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Dead-letter entries across all partitions, tagged with their
    /// partition index.
    pub fn dead_letters(&self) -> Vec<(u32, DeadLetterEntry)> {
        let mut all = Vec::new();
        for (idx, partition) in self.partitions.iter().enumerate() {
            if let Ok(dlq) = DeadLetterQueue::new(&partition.dir) {
                all.extend(dlq.list().into_iter().map(|e| (idx as u32, e)));
            }
        }
        all
    }

    pub fn dead_letter_count(&self) -> usize {
        self.partitions
            .iter()
            .filter_map(|p| DeadLetterQueue::new(&p.dir).ok())
            .map(|dlq| dlq.count())
            .sum()
    }

    /// Remove one dead-letter entry. Returns whether a file was
    /// deleted.
    pub fn delete_dead_letter(&self, partition: u32, sequence: u64) -> bool {
        self.partitions
            .get(partition as usize)
            .and_then(|p| DeadLetterQueue::new(&p.dir).ok())
            .map(|dlq| dlq.delete(sequence))
            .unwrap_or(false)
    }

    /// Best-effort removal of every dead-letter entry in every
    /// partition.
    pub fn clear_dead_letters(&self) {
        for partition in &self.partitions {
            if let Ok(dlq) = DeadLetterQueue::new(&partition.dir) {
                dlq.clear();
            }
        }
    }

    /// Delete closed segments past retention in every partition.
    /// Best-effort: per-partition failures are logged and skipped.
    pub fn cleanup(&self) -> usize {
        let mut deleted = 0usize;
        for partition in &self.partitions {
            let mut index = WalIndex::new(&partition.dir);
            if let Err(err) = index.scan() {
                warn!(dir = %partition.dir.display(), error = %err, "cleanup scan failed");
                continue;
            }

            for meta in index.get_cleanup_candidates(&self.config.wal) {
                let mut segment = Segment::open(&partition.dir, meta.start_sequence);
                segment.delete();
                deleted += 1;
                info!(
                    dir = %partition.dir.display(),
                    segment = %meta.filename,
                    "deleted expired segment"
                );
            }

            if index.scan().is_ok() {
                if let Err(err) = index.save() {
                    warn!(dir = %partition.dir.display(), error = %err, "cleanup index save failed");
                }
            }
        }
        deleted
    }

    /// Graceful shutdown: stop the listeners first (in-flight ticks
    /// finish naturally), then close every writer with a final sync.
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<ListenerHandle> = std::mem::take(&mut *self.listeners.lock());
        for handle in handles {
            handle.stop().await;
        }

        for partition in &self.partitions {
            partition.writer.lock().close()?;
        }

        info!(root = %self.config.wal.wal_dir.display(), "WAL service stopped");
        Ok(())
    }
}
