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

//! WAL segment catalog
//!
//! Tracks which segments exist and their properties. The segments
//! directory is the source of truth: `load()` always rebuilds by
//! scanning, and the on-disk `wal-index.json` is only a cache hint,
//! because a crash can leave it stale.

use crate::segment::SEGMENTS_DIR;
use chrono::Utc;
use pulse_core::{parse_sequence, Result, WalConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Name of the cached index file inside a WAL directory.
pub const INDEX_FILE: &str = "wal-index.json";

/// Metadata for one segment file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMeta {
    pub filename: String,
    /// Sequence of the first record in this segment.
    #[serde(with = "crate::seq_string")]
    pub start_sequence: u64,
    pub line_count: u64,
    pub file_size: u64,
    /// Unix ms.
    pub created_at: i64,
    /// Unix ms; absent while the segment is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
}

impl SegmentMeta {
    /// Exclusive end of this segment's sequence range.
    pub fn end_sequence(&self) -> u64 {
        self.start_sequence + self.line_count
    }
}

/// On-disk shape of `wal-index.json`.
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    segments: Vec<SegmentMeta>,
}

/// In-memory segment catalog for one WAL directory.
pub struct WalIndex {
    wal_dir: PathBuf,
    index_path: PathBuf,
    segments: HashMap<String, SegmentMeta>,
}

impl WalIndex {
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        let wal_dir = wal_dir.into();
        let index_path = wal_dir.join(INDEX_FILE);
        Self {
            wal_dir,
            index_path,
            segments: HashMap::new(),
        }
    }

    /// Load the catalog. Always re-scans the segments directory rather
    /// than trusting the cached index file.
    pub fn load(&mut self) -> Result<()> {
        self.scan()
    }

    /// Clear in-memory state and rebuild it from the segments directory.
    ///
    /// Idempotent and safe to call while a writer is appending to the
    /// last segment — the line count may then lag by a few lines, so
    /// consumers re-scan before relying on it. Files whose base name is
    /// not all digits or that lack the segment extension are ignored.
    pub fn scan(&mut self) -> Result<()> {
        self.segments.clear();

        let segments_dir = self.wal_dir.join(SEGMENTS_DIR);
        let entries = match fs::read_dir(&segments_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            let Some(start_sequence) = parse_sequence(&filename) else {
                continue;
            };

            let meta = entry.metadata()?;
            let modified_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(|| Utc::now().timestamp_millis());

            let content = fs::read_to_string(entry.path())?;
            let line_count = content.split('\n').filter(|l| !l.is_empty()).count() as u64;

            self.segments.insert(
                filename.clone(),
                SegmentMeta {
                    filename,
                    start_sequence,
                    line_count,
                    file_size: meta.len(),
                    created_at: modified_ms,
                    closed_at: None,
                },
            );
        }

        // A scan cannot recover close timestamps from the files alone.
        // Only the highest-start segment can still be active, so mark
        // every earlier one closed to restore the single-active
        // invariant after a crash.
        let active_start = self.segments.values().map(|s| s.start_sequence).max();
        if let Some(active_start) = active_start {
            for meta in self.segments.values_mut() {
                if meta.start_sequence != active_start {
                    meta.closed_at = Some(meta.created_at);
                }
            }
        }

        Ok(())
    }

    /// Persist the catalog atomically (write temp file, then rename).
    pub fn save(&self) -> Result<()> {
        let data = IndexFile {
            segments: self.get_all_segments(),
        };
        let json = serde_json::to_string_pretty(&data)?;

        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.index_path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.index_path)?;
        Ok(())
    }

    /// Add a newly created segment. Called by the writer on rotation.
    pub fn register(&mut self, meta: SegmentMeta) {
        self.segments.insert(meta.filename.clone(), meta);
    }

    /// Patch fields of a known segment in place.
    pub fn update<F: FnOnce(&mut SegmentMeta)>(&mut self, filename: &str, patch: F) {
        if let Some(meta) = self.segments.get_mut(filename) {
            patch(meta);
        }
    }

    /// All segments sorted ascending by start sequence.
    pub fn get_all_segments(&self) -> Vec<SegmentMeta> {
        let mut all: Vec<SegmentMeta> = self.segments.values().cloned().collect();
        all.sort_by_key(|s| s.start_sequence);
        all
    }

    /// The unique segment with no close timestamp, if any. When every
    /// segment is closed the writer must rotate before appending.
    pub fn get_active_segment(&self) -> Option<SegmentMeta> {
        self.segments.values().find(|s| s.closed_at.is_none()).cloned()
    }

    /// Closed segments eligible for deletion: older than the retention
    /// age ceiling and outside the most-recent count floor. Segments
    /// satisfying neither rule are kept.
    pub fn get_cleanup_candidates(&self, config: &WalConfig) -> Vec<SegmentMeta> {
        let closed: Vec<SegmentMeta> = self
            .get_all_segments()
            .into_iter()
            .filter(|s| s.closed_at.is_some())
            .collect();
        if closed.is_empty() {
            return Vec::new();
        }

        let keep_count = config.max_segments.min(closed.len());
        let keep_from = closed.len() - keep_count;
        let now = Utc::now().timestamp_millis();

        closed
            .iter()
            .take(keep_from)
            .filter(|s| now - s.created_at > config.max_retention_age_ms)
            .cloned()
            .collect()
    }

    /// The segment whose range contains `sequence`, if any.
    pub fn find_segment_for_sequence(&self, sequence: u64) -> Option<SegmentMeta> {
        self.segments
            .values()
            .find(|s| sequence >= s.start_sequence && sequence < s.end_sequence())
            .cloned()
    }

    /// Highest end-of-range sequence across all segments.
    pub fn get_max_sequence(&self) -> u64 {
        self.segments.values().map(|s| s.end_sequence()).max().unwrap_or(0)
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}
