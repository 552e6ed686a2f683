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

//! A single WAL segment file
//!
//! Append-only NDJSON file named after the sequence of its first record.
//! Handles appending, bounded reads from a line offset, and truncation
//! for corruption recovery.

use pulse_core::{format_sequence, PulseError, Result, SEGMENT_EXT};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Subdirectory of the WAL root that holds segment files.
pub const SEGMENTS_DIR: &str = "segments";

/// One append-only segment file within a WAL directory.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    start_sequence: u64,
    /// Write handle, opened lazily on first append. `sync()` closes it
    /// so size and content become observable to external readers.
    file: Option<File>,
}

impl Segment {
    fn segment_path(wal_dir: &Path, start_sequence: u64) -> PathBuf {
        wal_dir
            .join(SEGMENTS_DIR)
            .join(format!("{}.{SEGMENT_EXT}", format_sequence(start_sequence)))
    }

    /// Exclusively create a new, empty segment file.
    ///
    /// Fails with [`PulseError::SegmentExists`] if the file is already
    /// present — a collision here means sequence bookkeeping is broken
    /// (double rotation), and the caller must abort rather than risk
    /// duplicate sequences.
    pub fn create(wal_dir: &Path, start_sequence: u64) -> Result<Self> {
        let path = Self::segment_path(wal_dir, start_sequence);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self {
                path,
                start_sequence,
                file: None,
            }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(PulseError::SegmentExists(path.display().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open a handle to a segment without touching the filesystem. The
    /// file may not exist yet; reads of a missing file yield nothing.
    pub fn open(wal_dir: &Path, start_sequence: u64) -> Self {
        Self {
            path: Self::segment_path(wal_dir, start_sequence),
            start_sequence,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_sequence(&self) -> u64 {
        self.start_sequence
    }

    fn open_for_write(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().append(true).create(true).open(&self.path)?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("write handle opened above"))
    }

    /// Append one raw line. The caller supplies the trailing newline.
    pub fn append(&mut self, line: &str) -> Result<()> {
        let file = self.open_for_write()?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Current file size in bytes; 0 if the file does not exist yet.
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Read raw lines starting at a 0-based line index, streamed from
    /// disk — an abandoned iterator never pays for the rest of the file.
    ///
    /// Empty lines are skipped, which defends against the dangling
    /// trailing newline every append leaves behind. Restartable: call
    /// again from any offset for a fresh pass.
    pub fn read_lines(&self, from_line: usize) -> Result<impl Iterator<Item = String>> {
        let file = match File::open(&self.path) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        Ok(file
            .map(|file| BufReader::new(file).lines())
            .into_iter()
            .flatten()
            .map_while(|line| line.ok())
            .filter(|line| !line.is_empty())
            .skip(from_line))
    }

    /// Rewrite the file keeping only the first `line_count` lines.
    ///
    /// Corruption recovery: the reader calls this when it hits a
    /// malformed or out-of-order record. A `line_count` at or beyond
    /// the current length is a no-op.
    pub fn truncate_at_line(&mut self, line_count: usize) -> Result<()> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let lines: Vec<&str> = content.split('\n').filter(|l| !l.is_empty()).collect();
        if line_count >= lines.len() {
            return Ok(());
        }

        // Drop any open append handle before rewriting in place.
        self.sync()?;

        let mut kept = lines[..line_count].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        fs::write(&self.path, kept)?;
        Ok(())
    }

    /// Flush and close the write handle so `size()` and external
    /// readers observe accurate state.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Remove the segment file. Best-effort cleanup: I/O errors are
    /// logged, not propagated.
    pub fn delete(&mut self) {
        self.file = None;
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to delete segment");
            }
        }
    }
}
