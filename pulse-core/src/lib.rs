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

//! Pulse Core
//!
//! Fundamental data structures shared across the Pulse ingestion
//! pipeline: the WAL record and its trace/span payloads, WAL
//! configuration, and the common error type.

pub mod config;
pub mod error;
pub mod record;

pub use config::WalConfig;
pub use error::{PulseError, Result};
pub use record::{
    decode_record, encode_record, format_sequence, parse_sequence, IngestStatus, Payload, Provider,
    SpanInput, SpanKind, SpanSource, TraceInput, WalRecord, SEGMENT_EXT,
};
