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

//! Error types shared across the Pulse crates

use thiserror::Error;

/// Result type for Pulse operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// Errors that can occur across the WAL and ingestion pipeline
#[derive(Debug, Error)]
pub enum PulseError {
    /// A component was used before its `initialize`/`start` ran.
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    /// Segment file creation collided with an existing file. This means
    /// sequence bookkeeping is broken and startup must abort.
    #[error("Segment already exists: {0}")]
    SegmentExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
