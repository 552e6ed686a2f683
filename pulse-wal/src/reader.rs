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

//! WAL reader
//!
//! Replays records forward from the checkpoint. Every read pass
//! re-derives its cursor from scratch — rescan the index, reload the
//! checkpoint — which trades a little per-poll overhead for full
//! crash-safety and correctness under concurrent writer rotation.
//!
//! Corruption (a line that fails to parse, or a sequence that does not
//! advance the watermark) is a hard boundary: the segment is truncated
//! at the bad line, the index is patched, and the pass stops rather
//! than skipping past a hole in sequence accounting.

use crate::checkpoint::Checkpoint;
use crate::index::WalIndex;
use crate::segment::Segment;
use pulse_core::{decode_record, Result, WalConfig, WalRecord};
use tracing::{debug, error};

/// Why a read pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadHalt {
    /// All segments exhausted; nothing left to read.
    EndOfStream,
    /// The requested batch size was reached.
    BatchFull,
    /// A corrupt or out-of-order line was found. The segment has been
    /// truncated at `line` and the pass stopped without reading later
    /// segments.
    Corruption { segment: String, line: u64 },
}

/// Result of one read pass: in-order unconsumed records plus the reason
/// the pass ended.
#[derive(Debug)]
pub struct ReadPass {
    pub records: Vec<WalRecord>,
    pub halt: ReadHalt,
}

/// Replays one partition's records from the checkpoint forward.
pub struct WalReader {
    config: WalConfig,
    checkpoint: Checkpoint,
    index: WalIndex,
    /// Debounce for the per-pass state log.
    last_logged_state: Option<(u64, usize)>,
}

impl WalReader {
    pub fn new(config: WalConfig) -> Self {
        let checkpoint = Checkpoint::new(&config.wal_dir);
        let index = WalIndex::new(&config.wal_dir);
        Self {
            config,
            checkpoint,
            index,
            last_logged_state: None,
        }
    }

    /// Run one restartable read pass, yielding up to `max_records`
    /// unconsumed records in sequence order.
    ///
    /// Each call rescans the segment directory and reloads the
    /// checkpoint, so it observes writer progress made since the last
    /// call. Records below the checkpoint are skipped without being
    /// yielded; a strict-monotonicity watermark is enforced across all
    /// segments in the pass.
    pub fn read_batch(&mut self, max_records: usize) -> Result<ReadPass> {
        self.index.scan()?;
        self.checkpoint.load()?;

        let next_sequence = self.checkpoint.next_sequence();
        let segments = self.index.get_all_segments();

        let state = (next_sequence, segments.len());
        if self.last_logged_state != Some(state) {
            debug!(
                wal_dir = %self.config.wal_dir.display(),
                next_sequence,
                segments = segments.len(),
                "read pass state"
            );
            self.last_logged_state = Some(state);
        }

        let mut records = Vec::new();
        let mut last_seen: Option<u64> = None;

        for meta in &segments {
            let segment = Segment::open(&self.config.wal_dir, meta.start_sequence);
            let mut line_index: u64 = 0;

            for raw_line in segment.read_lines(0)? {
                let verdict = match decode_record(&raw_line) {
                    Ok(record) => match last_seen {
                        Some(seen) if record.sequence <= seen => Err(format!(
                            "out-of-order sequence {} (last seen {seen})",
                            record.sequence
                        )),
                        _ => Ok(record),
                    },
                    Err(err) => Err(format!("failed to decode record: {err}")),
                };

                match verdict {
                    Ok(record) => {
                        last_seen = Some(record.sequence);
                        if record.sequence >= next_sequence {
                            records.push(record);
                            if records.len() >= max_records {
                                return Ok(ReadPass {
                                    records,
                                    halt: ReadHalt::BatchFull,
                                });
                            }
                        }
                        line_index += 1;
                    }
                    Err(reason) => {
                        self.truncate_corrupt(meta.filename.clone(), line_index, &reason)?;
                        return Ok(ReadPass {
                            records,
                            halt: ReadHalt::Corruption {
                                segment: meta.filename.clone(),
                                line: line_index,
                            },
                        });
                    }
                }
            }
        }

        Ok(ReadPass {
            records,
            halt: ReadHalt::EndOfStream,
        })
    }

    /// Cut the segment back to the last good line and patch the index.
    fn truncate_corrupt(&mut self, filename: String, line: u64, reason: &str) -> Result<()> {
        error!(
            wal_dir = %self.config.wal_dir.display(),
            segment = %filename,
            line,
            reason,
            "WAL corruption detected, truncating segment"
        );

        if let Some(meta) = self
            .index
            .get_all_segments()
            .into_iter()
            .find(|s| s.filename == filename)
        {
            let mut segment = Segment::open(&self.config.wal_dir, meta.start_sequence);
            segment.truncate_at_line(line as usize)?;
            let size = segment.size();
            self.index.update(&filename, |m| {
                m.line_count = line;
                m.file_size = size;
            });
            self.index.save()?;
        }
        Ok(())
    }

    /// Advance the durable cursor. Delegates to the checkpoint's atomic
    /// save.
    pub fn mark_next_sequence(&mut self, next_sequence: u64) -> Result<()> {
        self.checkpoint.save(next_sequence)
    }

    pub fn next_sequence(&self) -> u64 {
        self.checkpoint.next_sequence()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::trace_payload;
    use super::*;
    use crate::writer::WalWriter;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn populated_wal(dir: &std::path::Path, count: u64) -> WalConfig {
        let config = WalConfig::new(dir);
        let mut writer = WalWriter::new(config.clone());
        writer.initialize().unwrap();
        for _ in 0..count {
            writer.append(trace_payload("p1")).unwrap();
        }
        writer.close().unwrap();
        config
    }

    #[test]
    fn test_reads_all_records_in_order() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 3);

        let mut reader = WalReader::new(config);
        let pass = reader.read_batch(100).unwrap();

        assert_eq!(pass.halt, ReadHalt::EndOfStream);
        let sequences: Vec<u64> = pass.records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_skips_records_below_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 5);

        let mut reader = WalReader::new(config);
        reader.mark_next_sequence(3).unwrap();
        let pass = reader.read_batch(100).unwrap();

        let sequences: Vec<u64> = pass.records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
    }

    #[test]
    fn test_batch_limit() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 10);

        let mut reader = WalReader::new(config);
        let pass = reader.read_batch(4).unwrap();
        assert_eq!(pass.halt, ReadHalt::BatchFull);
        assert_eq!(pass.records.len(), 4);
    }

    #[test]
    fn test_restartable_passes_observe_writer_progress() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 2);

        let mut reader = WalReader::new(config.clone());
        assert_eq!(reader.read_batch(100).unwrap().records.len(), 2);

        // New writes land between passes; resuming the writer re-scans.
        let mut writer = WalWriter::new(config);
        writer.initialize().unwrap();
        writer.append(trace_payload("p1")).unwrap();
        writer.close().unwrap();

        assert_eq!(reader.read_batch(100).unwrap().records.len(), 3);
    }

    #[test]
    fn test_malformed_line_truncates_and_stops() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 3);

        // Append a malformed tail line to the only segment.
        let segments_dir = dir.path().join("segments");
        let segment_path = fs::read_dir(&segments_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut file = fs::OpenOptions::new().append(true).open(&segment_path).unwrap();
        file.write_all(b"{definitely not json\n").unwrap();
        drop(file);

        let mut reader = WalReader::new(config);
        let pass = reader.read_batch(100).unwrap();

        assert_eq!(pass.records.len(), 3);
        assert!(matches!(pass.halt, ReadHalt::Corruption { line: 3, .. }));

        // The file keeps exactly the 3 valid lines.
        let content = fs::read_to_string(&segment_path).unwrap();
        assert_eq!(content.lines().filter(|l| !l.is_empty()).count(), 3);

        // Subsequent passes are clean.
        let pass = reader.read_batch(100).unwrap();
        assert_eq!(pass.halt, ReadHalt::EndOfStream);
        assert_eq!(pass.records.len(), 3);
    }

    #[test]
    fn test_out_of_order_sequence_is_corruption() {
        let dir = TempDir::new().unwrap();
        let config = populated_wal(dir.path(), 2);

        let segments_dir = dir.path().join("segments");
        let segment_path = fs::read_dir(&segments_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut file = fs::OpenOptions::new().append(true).open(&segment_path).unwrap();
        // Sequence 1 repeats: violates strict monotonicity.
        file.write_all(
            b"{\"sequence\":1,\"timestamp\":0,\"payload\":{\"projectId\":\"p1\",\"traces\":[]}}\n",
        )
        .unwrap();
        drop(file);

        let mut reader = WalReader::new(config);
        let pass = reader.read_batch(100).unwrap();
        assert_eq!(pass.records.len(), 2);
        assert!(matches!(pass.halt, ReadHalt::Corruption { line: 2, .. }));
    }

    #[test]
    fn test_corruption_does_not_continue_into_later_segments() {
        let dir = TempDir::new().unwrap();
        let config = {
            let mut config = WalConfig::new(dir.path());
            config.max_segment_lines = 2;
            let mut writer = WalWriter::new(config.clone());
            writer.initialize().unwrap();
            for _ in 0..5 {
                writer.append(trace_payload("p1")).unwrap();
            }
            writer.close().unwrap();
            config
        };

        // Corrupt the first line of the FIRST segment.
        let first = dir.path().join("segments").join("0000000000000000.ndjson");
        fs::write(&first, "garbage\n").unwrap();

        let mut reader = WalReader::new(config);
        let pass = reader.read_batch(100).unwrap();
        assert!(pass.records.is_empty());
        assert!(matches!(pass.halt, ReadHalt::Corruption { line: 0, .. }));
    }
}
