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

//! Pulse server configuration
//!
//! Loaded from an optional TOML file with serde field defaults, then
//! overridden by CLI flags/env in `main`.

use anyhow::{Context, Result};
use pulse_core::WalConfig;
use pulse_wal::{ListenerConfig, WalServiceConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub wal: WalSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP API listen address (e.g., "127.0.0.1:8787")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// WAL settings shared by the trace and span streams.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalSection {
    /// Root data directory; the trace and span streams live in
    /// `traces/` and `spans/` beneath it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_partitions")]
    pub trace_partitions: u32,

    #[serde(default = "default_partitions")]
    pub span_partitions: u32,

    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u64,

    #[serde(default = "default_max_segment_age_ms")]
    pub max_segment_age_ms: i64,

    #[serde(default = "default_max_segment_lines")]
    pub max_segment_lines: u64,

    /// fsync every N writes; 0 = sync only on rotation/close.
    #[serde(default)]
    pub fsync_every: u64,

    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    #[serde(default = "default_max_retention_age_ms")]
    pub max_retention_age_ms: i64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Listener poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Records drained per listener tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WalSection {
    fn default() -> Self {
        // serde(default) on every field makes this equivalent to an
        // empty TOML table.
        toml::from_str("").expect("empty WAL section deserializes")
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/wal")
}

fn default_partitions() -> u32 {
    1
}

fn default_max_segment_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_segment_age_ms() -> i64 {
    60 * 60 * 1000
}

fn default_max_segment_lines() -> u64 {
    100_000
}

fn default_max_segments() -> usize {
    8
}

fn default_max_retention_age_ms() -> i64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    100
}

impl ServerConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self {
                server: HttpServerConfig::default(),
                wal: WalSection::default(),
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.listen_addr.parse::<std::net::SocketAddr>().is_ok(),
            "invalid listen_addr: {}",
            self.server.listen_addr
        );
        anyhow::ensure!(self.wal.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(
            self.wal.poll_interval_ms > 0,
            "poll_interval_ms must be positive"
        );
        Ok(())
    }

    fn stream_config(&self, subdir: &str, partitions: u32) -> WalServiceConfig {
        let mut wal = WalConfig::new(self.wal.data_dir.join(subdir));
        wal.max_segment_size = self.wal.max_segment_size;
        wal.max_segment_age_ms = self.wal.max_segment_age_ms;
        wal.max_segment_lines = self.wal.max_segment_lines;
        wal.fsync_every = self.wal.fsync_every;
        wal.max_segments = self.wal.max_segments;
        wal.max_retention_age_ms = self.wal.max_retention_age_ms;
        wal.max_retries = self.wal.max_retries;

        WalServiceConfig {
            wal,
            partitions,
            listener: ListenerConfig {
                poll_interval: Duration::from_millis(self.wal.poll_interval_ms),
                batch_size: self.wal.batch_size,
            },
        }
    }

    /// Service config for the LLM-trace stream.
    pub fn trace_stream(&self) -> WalServiceConfig {
        self.stream_config("traces", self.wal.trace_partitions)
    }

    /// Service config for the agent-span stream.
    pub fn span_stream(&self) -> WalServiceConfig {
        self.stream_config("spans", self.wal.span_partitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::load(None).unwrap();
        config.validate().unwrap();
        assert_eq!(config.wal.trace_partitions, 1);
        assert_eq!(config.wal.batch_size, 100);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [wal]
            data_dir = "/var/lib/pulse"
            trace_partitions = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.wal.data_dir, PathBuf::from("/var/lib/pulse"));
        assert_eq!(config.wal.trace_partitions, 4);
        assert_eq!(config.wal.span_partitions, 1);
        assert_eq!(config.server.listen_addr, "127.0.0.1:8787");
    }

    #[test]
    fn test_stream_configs_use_separate_dirs() {
        let config = ServerConfig::load(None).unwrap();
        let traces = config.trace_stream();
        let spans = config.span_stream();
        assert_ne!(traces.wal.wal_dir, spans.wal.wal_dir);
    }

    #[test]
    fn test_invalid_listen_addr_rejected() {
        let mut config = ServerConfig::load(None).unwrap();
        config.server.listen_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }
}
