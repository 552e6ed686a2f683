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

//! Partition routing
//!
//! Maps a string routing key (project id) to one of N independent WAL
//! directories. Partitions never share sequence space; ordering is
//! guaranteed only within a partition. The hash is a plain shift-add-
//! xor string hash — even distribution is all that matters, there is no
//! cryptographic requirement.

use std::path::{Path, PathBuf};

/// Pick the partition for a routing key.
///
/// `partition_count <= 1` always maps to partition 0 without hashing.
pub fn partition_for_key(key: &str, partition_count: u32) -> u32 {
    if partition_count <= 1 {
        return 0;
    }

    let mut hash: u32 = 0;
    for byte in key.bytes() {
        hash ^= hash
            .wrapping_shl(5)
            .wrapping_add(hash >> 2)
            .wrapping_add(byte as u32);
    }
    hash % partition_count
}

/// Directory for a partition under a stream root.
///
/// A single-partition stream uses the root itself — no subdirectory
/// nesting, matching the no-hashing fast path.
pub fn partition_dir(root: &Path, partition_count: u32, partition: u32) -> PathBuf {
    if partition_count <= 1 {
        root.to_path_buf()
    } else {
        root.join(format!("partition-{partition}"))
    }
}
