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

//! Dead-letter queue
//!
//! Terminal store for records that exhausted their retry budget. Each
//! entry is an individually inspectable JSON file named by its
//! zero-padded sequence, so filenames sort the same lexicographically
//! and numerically — matching the segment-file convention. Entries are
//! never retried by the online path; reinspection and replay are
//! out-of-band operations.

use chrono::Utc;
use pulse_core::{format_sequence, Result, WalRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Subdirectory of the WAL root that holds dead-letter entries.
pub const DEAD_LETTER_DIR: &str = "dead-letter";
const DLQ_SUFFIX: &str = ".dlq.json";

/// One dead-lettered record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    #[serde(with = "crate::seq_string")]
    pub sequence: u64,
    pub original_record: WalRecord,
    /// Stringified error from the final failed apply.
    pub error: String,
    /// Unix ms.
    pub failed_at: i64,
    pub retries: u32,
}

/// Dead-letter queue for one WAL partition.
pub struct DeadLetterQueue {
    dir: PathBuf,
}

impl DeadLetterQueue {
    pub fn new(wal_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = wal_dir.into().join(DEAD_LETTER_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persist a failed record. Entries are append-only and never
    /// mutated.
    pub fn write(&self, record: &WalRecord, error: &str, retries: u32) -> Result<()> {
        let entry = DeadLetterEntry {
            sequence: record.sequence,
            original_record: record.clone(),
            error: error.to_string(),
            failed_at: Utc::now().timestamp_millis(),
            retries,
        };

        let path = self.entry_path(record.sequence);
        fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
        Ok(())
    }

    /// All entries sorted by sequence. Entries that fail to parse are
    /// skipped and logged — corruption in the DLQ must not crash the
    /// lister.
    pub fn list(&self) -> Vec<DeadLetterEntry> {
        let mut entries = Vec::new();

        let dir_entries = match fs::read_dir(&self.dir) {
            Ok(dir_entries) => dir_entries,
            Err(_) => return entries,
        };

        for dir_entry in dir_entries.flatten() {
            let filename = dir_entry.file_name().to_string_lossy().to_string();
            if !filename.ends_with(DLQ_SUFFIX) {
                continue;
            }

            match fs::read_to_string(dir_entry.path())
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str(&c).map_err(|e| e.to_string()))
            {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(file = %filename, error = %err, "failed to read DLQ entry");
                }
            }
        }

        entries.sort_by_key(|e: &DeadLetterEntry| e.sequence);
        entries
    }

    /// Number of entries on disk.
    pub fn count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().ends_with(DLQ_SUFFIX))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Remove one entry. Returns whether a file was deleted.
    pub fn delete(&self, sequence: u64) -> bool {
        fs::remove_file(self.entry_path(sequence)).is_ok()
    }

    /// Best-effort removal of every entry.
    pub fn clear(&self) {
        for entry in self.list() {
            self.delete(entry.sequence);
        }
    }

    fn entry_path(&self, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("{}{DLQ_SUFFIX}", format_sequence(sequence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_support::trace_payload;
    use tempfile::TempDir;

    fn record(sequence: u64) -> WalRecord {
        WalRecord {
            sequence,
            timestamp: 1_000,
            payload: trace_payload("p1"),
        }
    }

    #[test]
    fn test_write_and_list_sorted() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();

        dlq.write(&record(12), "boom", 3).unwrap();
        dlq.write(&record(3), "boom", 3).unwrap();
        dlq.write(&record(100), "boom", 3).unwrap();

        let entries = dlq.list();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 12, 100]);
        assert_eq!(entries[0].error, "boom");
        assert_eq!(entries[0].retries, 3);
    }

    #[test]
    fn test_filenames_are_zero_padded() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        dlq.write(&record(7), "err", 1).unwrap();

        let path = dir
            .path()
            .join(DEAD_LETTER_DIR)
            .join("0000000000000007.dlq.json");
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        dlq.write(&record(1), "err", 1).unwrap();

        fs::write(
            dir.path().join(DEAD_LETTER_DIR).join("junk.dlq.json"),
            "{broken",
        )
        .unwrap();

        assert_eq!(dlq.list().len(), 1);
        assert_eq!(dlq.count(), 2); // count is raw file count
    }

    #[test]
    fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path()).unwrap();
        dlq.write(&record(1), "err", 1).unwrap();
        dlq.write(&record(2), "err", 1).unwrap();

        assert!(dlq.delete(1));
        assert!(!dlq.delete(1));
        assert_eq!(dlq.count(), 1);

        dlq.clear();
        assert_eq!(dlq.count(), 0);
    }
}
