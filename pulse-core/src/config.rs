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

//! WAL configuration
//!
//! One `WalConfig` describes a single partition root directory. The
//! partitioned service clones it per partition, substituting the
//! partition subdirectory for `wal_dir`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one WAL instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Root directory for this WAL (segments/, wal-index.json,
    /// wal.checkpoint, dead-letter/ live beneath it).
    pub wal_dir: PathBuf,

    /// Maximum segment size in bytes before rotation.
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u64,

    /// Maximum segment age in milliseconds before rotation.
    #[serde(default = "default_max_segment_age")]
    pub max_segment_age_ms: i64,

    /// Maximum lines per segment before rotation.
    #[serde(default = "default_max_segment_lines")]
    pub max_segment_lines: u64,

    /// fsync every N writes. 0 means sync only on rotation/close.
    #[serde(default)]
    pub fsync_every: u64,

    /// Retention count floor: this many recent closed segments are kept
    /// regardless of age.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Retention age ceiling in milliseconds: closed segments older
    /// than this (and outside the count floor) become cleanup
    /// candidates.
    #[serde(default = "default_max_retention_age")]
    pub max_retention_age_ms: i64,

    /// Per-record retry budget before dead-lettering.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_segment_size() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

fn default_max_segment_age() -> i64 {
    60 * 60 * 1000 // 1 hour
}

fn default_max_segment_lines() -> u64 {
    100_000
}

fn default_max_segments() -> usize {
    8
}

fn default_max_retention_age() -> i64 {
    7 * 24 * 60 * 60 * 1000 // 7 days
}

fn default_max_retries() -> u32 {
    3
}

impl WalConfig {
    /// Build a config rooted at `wal_dir` with default thresholds.
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
            max_segment_size: default_max_segment_size(),
            max_segment_age_ms: default_max_segment_age(),
            max_segment_lines: default_max_segment_lines(),
            fsync_every: 0,
            max_segments: default_max_segments(),
            max_retention_age_ms: default_max_retention_age(),
            max_retries: default_max_retries(),
        }
    }

    /// Same thresholds, different root. Used when fanning one stream
    /// config out across partition subdirectories.
    pub fn with_dir(&self, wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
            ..self.clone()
        }
    }
}
