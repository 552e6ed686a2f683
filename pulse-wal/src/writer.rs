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

//! WAL writer
//!
//! Owns the active segment of one partition, assigns monotonically
//! increasing sequence numbers, rotates segments on size/age/line
//! thresholds and controls fsync cadence. Exactly one writer per
//! partition directory — that single-writer assumption is what makes
//! rotation safe without locking.

use crate::index::{SegmentMeta, WalIndex};
use crate::segment::Segment;
use chrono::Utc;
use pulse_core::{
    decode_record, encode_record, Payload, PulseError, Result, WalConfig, WalRecord,
};
use tracing::{debug, info, warn};

/// Appender for one WAL partition.
pub struct WalWriter {
    config: WalConfig,
    index: WalIndex,
    current_segment: Option<Segment>,
    /// Next sequence to assign. Recovered from segment contents at
    /// initialization, never from a cached counter.
    current_sequence: u64,
    write_count: u64,
    segment_created_at: i64,
}

impl WalWriter {
    pub fn new(config: WalConfig) -> Self {
        let index = WalIndex::new(&config.wal_dir);
        Self {
            config,
            index,
            current_segment: None,
            current_sequence: 0,
            write_count: 0,
            segment_created_at: 0,
        }
    }

    /// Scan the log, recover the true next sequence and resume or
    /// create the active segment.
    ///
    /// The authoritative sequence source is the data itself: every
    /// segment's records are scanned and the counter resumes at
    /// `max(sequence) + 1`, which makes the writer crash-safe without a
    /// persisted counter of its own.
    pub fn initialize(&mut self) -> Result<()> {
        self.index.load()?;
        self.current_sequence = self.next_sequence_from_disk()?;

        if let Some(active) = self.index.get_active_segment() {
            debug!(
                wal_dir = %self.config.wal_dir.display(),
                start_sequence = active.start_sequence,
                "resuming active segment"
            );
            self.current_segment =
                Some(Segment::open(&self.config.wal_dir, active.start_sequence));
            self.segment_created_at = active.created_at;
            // A crash between an append and its rotation can leave the
            // resumed segment already past a threshold; rotate now
            // instead of overfilling it by one more record.
            self.check_rotation()?;
        } else {
            self.rotate()?;
        }

        info!(
            wal_dir = %self.config.wal_dir.display(),
            next_sequence = self.current_sequence,
            "WAL writer initialized"
        );
        Ok(())
    }

    /// Append a payload as the next record and return its sequence.
    pub fn append(&mut self, payload: Payload) -> Result<u64> {
        let segment = self
            .current_segment
            .as_mut()
            .ok_or(PulseError::NotInitialized("WalWriter"))?;

        let record = WalRecord {
            sequence: self.current_sequence,
            timestamp: Utc::now().timestamp_millis(),
            payload,
        };
        let line = encode_record(&record)?;
        segment.append(&line)?;
        self.write_count += 1;

        if self.config.fsync_every > 0 && self.write_count % self.config.fsync_every == 0 {
            // Close the handle to force a flush; the next append reopens.
            segment.sync()?;
        }

        self.current_sequence += 1;
        self.check_rotation()?;
        Ok(record.sequence)
    }

    fn check_rotation(&mut self) -> Result<()> {
        let Some(segment) = self.current_segment.as_ref() else {
            return Ok(());
        };

        let size = segment.size();
        let age = Utc::now().timestamp_millis() - self.segment_created_at;
        let lines = self.current_sequence - segment.start_sequence();

        let needs_rotation = size >= self.config.max_segment_size
            || age >= self.config.max_segment_age_ms
            || lines >= self.config.max_segment_lines;

        if needs_rotation {
            self.rotate()?;
        }
        Ok(())
    }

    /// Close the current active segment and start a new one at the
    /// current sequence. The only place segment boundaries are created.
    fn rotate(&mut self) -> Result<()> {
        if let Some(segment) = self.current_segment.as_mut() {
            segment.sync()?;
            if let Some(active) = self.index.get_active_segment() {
                let closed_at = Utc::now().timestamp_millis();
                let size = segment.size();
                let lines = self.current_sequence - segment.start_sequence();
                self.index.update(&active.filename, |meta| {
                    meta.closed_at = Some(closed_at);
                    meta.file_size = size;
                    meta.line_count = lines;
                });
            }
        }

        let new_segment = Segment::create(&self.config.wal_dir, self.current_sequence)?;
        let filename = new_segment
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        debug!(
            wal_dir = %self.config.wal_dir.display(),
            filename = %filename,
            "rotated to new segment"
        );

        let now = Utc::now().timestamp_millis();
        self.index.register(SegmentMeta {
            filename,
            start_sequence: self.current_sequence,
            line_count: 0,
            file_size: 0,
            created_at: now,
            closed_at: None,
        });
        self.index.save()?;

        self.current_segment = Some(new_segment);
        self.segment_created_at = now;
        self.write_count = 0;
        Ok(())
    }

    /// Final sync and index save. Called on graceful shutdown.
    pub fn close(&mut self) -> Result<()> {
        if let Some(segment) = self.current_segment.as_mut() {
            segment.sync()?;
        }
        self.index.save()?;
        Ok(())
    }

    /// Next sequence to assign, for diagnostics.
    pub fn next_sequence(&self) -> u64 {
        self.current_sequence
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    fn next_sequence_from_disk(&self) -> Result<u64> {
        let mut max_sequence: Option<u64> = None;

        for meta in self.index.get_all_segments() {
            let segment = Segment::open(&self.config.wal_dir, meta.start_sequence);
            for raw_line in segment.read_lines(0)? {
                match decode_record(&raw_line) {
                    Ok(record) => {
                        max_sequence = Some(match max_sequence {
                            Some(max) => max.max(record.sequence),
                            None => record.sequence,
                        });
                    }
                    Err(err) => {
                        warn!(
                            filename = %meta.filename,
                            error = %err,
                            "skipping invalid WAL line while bootstrapping"
                        );
                    }
                }
            }
        }

        Ok(max_sequence.map(|max| max + 1).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_support::trace_payload;
    use tempfile::TempDir;

    fn test_config(dir: &std::path::Path) -> WalConfig {
        WalConfig::new(dir)
    }

    #[test]
    fn test_append_before_initialize_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::new(test_config(dir.path()));
        let err = writer.append(trace_payload("p1")).unwrap_err();
        assert!(matches!(err, PulseError::NotInitialized(_)));
    }

    #[test]
    fn test_sequences_are_assigned_in_order() {
        let dir = TempDir::new().unwrap();
        let mut writer = WalWriter::new(test_config(dir.path()));
        writer.initialize().unwrap();

        for expected in 0..5 {
            let seq = writer.append(trace_payload("p1")).unwrap();
            assert_eq!(seq, expected);
        }
    }

    #[test]
    fn test_sequence_recovery_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::new(test_config(dir.path()));
            writer.initialize().unwrap();
            for _ in 0..3 {
                writer.append(trace_payload("p1")).unwrap();
            }
            writer.close().unwrap();
        }

        let mut writer = WalWriter::new(test_config(dir.path()));
        writer.initialize().unwrap();
        assert_eq!(writer.next_sequence(), 3);
        assert_eq!(writer.append(trace_payload("p1")).unwrap(), 3);
    }

    #[test]
    fn test_rotation_on_line_threshold() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.max_segment_lines = 2;

        let mut writer = WalWriter::new(config);
        writer.initialize().unwrap();
        for _ in 0..5 {
            writer.append(trace_payload("p1")).unwrap();
        }
        writer.close().unwrap();

        let mut index = WalIndex::new(dir.path());
        index.scan().unwrap();
        let segments = index.get_all_segments();

        let starts: Vec<u64> = segments.iter().map(|s| s.start_sequence).collect();
        let lines: Vec<u64> = segments.iter().map(|s| s.line_count).collect();
        assert_eq!(starts, vec![0, 2, 4]);
        assert_eq!(lines, vec![2, 2, 1]);
    }

    #[test]
    fn test_segments_are_contiguous_after_rotations() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.max_segment_lines = 3;

        let mut writer = WalWriter::new(config);
        writer.initialize().unwrap();
        for _ in 0..10 {
            writer.append(trace_payload("p1")).unwrap();
        }
        writer.close().unwrap();

        let mut index = WalIndex::new(dir.path());
        index.scan().unwrap();
        let segments = index.get_all_segments();
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start_sequence, pair[0].end_sequence());
        }
    }

    #[test]
    fn test_resumed_full_segment_rotates_on_initialize() {
        let dir = TempDir::new().unwrap();
        {
            // Three records land in one segment under a generous limit.
            let mut writer = WalWriter::new(test_config(dir.path()));
            writer.initialize().unwrap();
            for _ in 0..3 {
                writer.append(trace_payload("p1")).unwrap();
            }
            writer.close().unwrap();
        }

        // Restart with a tighter limit: the resumed segment is already
        // over it, so the writer must not append into it again.
        let mut config = test_config(dir.path());
        config.max_segment_lines = 2;
        let mut writer = WalWriter::new(config);
        writer.initialize().unwrap();
        assert_eq!(writer.append(trace_payload("p1")).unwrap(), 3);
        writer.close().unwrap();

        let mut index = WalIndex::new(dir.path());
        index.scan().unwrap();
        let segments = index.get_all_segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].line_count, 3);
        assert_eq!(segments[1].start_sequence, 3);
        assert_eq!(segments[1].line_count, 1);
    }

    #[test]
    fn test_fsync_cadence_does_not_break_appends() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.fsync_every = 2;

        let mut writer = WalWriter::new(config);
        writer.initialize().unwrap();
        for expected in 0..6 {
            assert_eq!(writer.append(trace_payload("p1")).unwrap(), expected);
        }
    }
}
