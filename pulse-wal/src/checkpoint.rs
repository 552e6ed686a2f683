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

//! Durable consume cursor
//!
//! Persists "next sequence to consume" with the write-to-temp-then-
//! rename pattern, so a crash mid-save leaves either the old value or
//! the new value on disk, never a torn file. A missing or corrupt
//! checkpoint falls back to 0 — replay from the start is safe because
//! the downstream apply is idempotent.

use chrono::Utc;
use pulse_core::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Name of the checkpoint file inside a WAL directory.
pub const CHECKPOINT_FILE: &str = "wal.checkpoint";
const CHECKPOINT_TMP: &str = "wal.checkpoint.tmp";

/// On-disk checkpoint contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    /// All records with sequence below this have been durably handled
    /// (applied or dead-lettered).
    #[serde(with = "crate::seq_string")]
    pub next_sequence: u64,
    /// Unix ms of the last save.
    pub processed_at: i64,
}

impl CheckpointData {
    fn start_of_log() -> Self {
        Self {
            next_sequence: 0,
            processed_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Checkpoint manager for one WAL directory.
pub struct Checkpoint {
    path: PathBuf,
    data: CheckpointData,
}

impl Checkpoint {
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: wal_dir.into().join(CHECKPOINT_FILE),
            data: CheckpointData::start_of_log(),
        }
    }

    /// Load the checkpoint from disk.
    ///
    /// A missing file or parse failure must never block startup; both
    /// fall back to sequence 0 and cause idempotent reprocessing.
    pub fn load(&mut self) -> Result<()> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.data = CheckpointData::start_of_log();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str(&content) {
            Ok(data) => self.data = data,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err,
                    "failed to parse checkpoint, starting from 0");
                self.data = CheckpointData::start_of_log();
            }
        }
        Ok(())
    }

    /// Save atomically: write a temp file in the same directory, then
    /// rename over the checkpoint path.
    pub fn save(&mut self, next_sequence: u64) -> Result<()> {
        let data = CheckpointData {
            next_sequence,
            processed_at: Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string_pretty(&data)?;

        let dir = self.path.parent().expect("checkpoint path has a parent");
        fs::create_dir_all(dir)?;
        let tmp_path = dir.join(CHECKPOINT_TMP);
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        self.data = data;
        Ok(())
    }

    pub fn next_sequence(&self) -> u64 {
        self.data.next_sequence
    }

    pub fn data(&self) -> &CheckpointData {
        &self.data
    }
}
