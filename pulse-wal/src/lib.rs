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

//! Pulse WAL
//!
//! Filesystem-backed write-ahead log for the ingestion pipeline. Records
//! are appended to rotating NDJSON segment files, consumed by a polling
//! listener that applies them idempotently to a downstream store, and
//! escalated to a dead-letter queue when their retry budget runs out.
//!
//! ## Architecture
//!
//! ```text
//! publish(key, payload)
//!     │ hash(key) % partitions
//!     ▼
//! WalWriter ── append ──▶ segments/<seq>.ndjson
//!     │ rotation                  │
//!     ▼                           ▼
//! WalIndex ◀── scan ──────── WalReader ◀── wal.checkpoint
//!                                │
//!                                ▼
//! StreamListener ── apply ──▶ RecordSink (idempotent upsert)
//!     │ retries exhausted
//!     ▼
//! dead-letter/<seq>.dlq.json
//! ```
//!
//! Every partition is an independent directory with its own writer,
//! index, checkpoint and listener. Ordering is guaranteed only within a
//! partition. On-disk JSON state (index, checkpoint) is always written
//! with the write-to-temp-then-rename pattern, and the segment
//! directory itself is the source of truth — the index file is a hint.

pub mod checkpoint;
pub mod dead_letter;
pub mod index;
pub mod listener;
pub mod partition;
pub mod reader;
pub mod segment;
mod seq_string;
pub mod service;
pub mod writer;

pub use checkpoint::{Checkpoint, CheckpointData};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use index::{SegmentMeta, WalIndex};
pub use listener::{ListenerConfig, ListenerHandle, RecordSink, StreamListener};
pub use partition::{partition_dir, partition_for_key};
pub use reader::{ReadHalt, ReadPass, WalReader};
pub use segment::Segment;
pub use service::{WalService, WalServiceConfig};
pub use writer::WalWriter;
