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

//! WAL record and ingestion payload types
//!
//! A [`WalRecord`] is one NDJSON line in a segment file. Its payload is
//! either a batch of LLM-call traces or a batch of agent-event spans,
//! always scoped to a single project.
//!
//! ## Segment file naming
//!
//! Segment files are named with a zero-padded 16-digit start sequence:
//!
//! ```text
//! 0000000000000000.ndjson   // first segment, starts at sequence 0
//! 0000000000010000.ndjson   // starts at sequence 10,000
//! ```
//!
//! Zero padding makes lexicographic order equal numeric order, so a
//! plain directory listing yields segments in sequence order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// File extension for WAL segment files.
pub const SEGMENT_EXT: &str = "ndjson";

/// Width of the zero-padded sequence in segment filenames.
const SEQUENCE_WIDTH: usize = 16;

/// One durably logged ingestion event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalRecord {
    /// Monotonically increasing, unique within a partition.
    pub sequence: u64,
    /// Unix timestamp in milliseconds when the record was appended.
    pub timestamp: i64,
    pub payload: Payload,
}

/// Payload of a WAL record: a project-scoped batch of traces or spans.
///
/// Untagged on the wire — the `traces` / `spans` key discriminates, so
/// the NDJSON format stays `{"projectId":"...","traces":[...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Traces {
        #[serde(rename = "projectId")]
        project_id: String,
        traces: Vec<TraceInput>,
    },
    Spans {
        #[serde(rename = "projectId")]
        project_id: String,
        spans: Vec<SpanInput>,
    },
}

impl Payload {
    /// Project this payload belongs to; also the partition routing key.
    pub fn project_id(&self) -> &str {
        match self {
            Payload::Traces { project_id, .. } => project_id,
            Payload::Spans { project_id, .. } => project_id,
        }
    }

    /// Number of traces or spans carried by this payload.
    pub fn item_count(&self) -> usize {
        match self {
            Payload::Traces { traces, .. } => traces.len(),
            Payload::Spans { spans, .. } => spans.len(),
        }
    }
}

/// LLM provider that served a traced call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Openrouter,
}

/// Terminal status of a trace or span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
}

/// One LLM API call as reported by a client SDK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceInput {
    /// Unique identifier for this trace (UUID). Primary key downstream,
    /// which is what makes replay idempotent.
    pub trace_id: String,
    /// RFC 3339 timestamp of the call.
    pub timestamp: String,
    pub provider: Provider,
    pub model_requested: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
    pub request_body: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_cents: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

/// Which CLI tool produced a span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanSource {
    ClaudeCode,
    Opencode,
    Openclaw,
}

/// What category of agent event a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    ToolUse,
    AgentRun,
    Session,
    UserPrompt,
    Notification,
}

/// One agent execution event — a tool call, a subagent run, a session
/// lifecycle event. The agent-layer complement to [`TraceInput`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanInput {
    /// Unique identifier for this span (UUID). Primary key downstream.
    pub span_id: String,
    /// Groups spans into a conversation or agent run.
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// RFC 3339 timestamp of the event.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub source: SpanSource,
    pub kind: SpanKind,
    /// Source-specific event type, e.g. "pre_tool_use", "stop".
    pub event_type: String,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interrupt: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

/// Serialize a record to one NDJSON line, trailing newline included.
pub fn encode_record(record: &WalRecord) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

/// Decode a single NDJSON line into a record.
pub fn decode_record(line: &str) -> serde_json::Result<WalRecord> {
    serde_json::from_str(line)
}

/// Format a sequence number as a zero-padded 16-digit string.
pub fn format_sequence(seq: u64) -> String {
    format!("{seq:0width$}", width = SEQUENCE_WIDTH)
}

/// Parse a start sequence from a segment filename.
///
/// `"0000000000000420.ndjson"` → `Some(420)`. Files whose base name is
/// not all digits or that lack the `.ndjson` extension return `None`.
pub fn parse_sequence(filename: &str) -> Option<u64> {
    let base = filename.strip_suffix(&format!(".{SEGMENT_EXT}"))?;
    if base.is_empty() || !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    base.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> TraceInput {
        TraceInput {
            trace_id: "2b3c1a9e-68f1-4a2e-9a3e-0c1d2e3f4a5b".to_string(),
            timestamp: "2025-01-15T10:30:00Z".to_string(),
            provider: Provider::Anthropic,
            model_requested: "claude-sonnet-4".to_string(),
            model_used: None,
            provider_request_id: None,
            request_body: HashMap::new(),
            response_body: None,
            input_tokens: Some(120),
            output_tokens: Some(480),
            output_text: None,
            finish_reason: Some("end_turn".to_string()),
            status: IngestStatus::Success,
            error: None,
            latency_ms: 912.5,
            cost_cents: None,
            session_id: None,
            metadata: None,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = WalRecord {
            sequence: 42,
            timestamp: 1_736_935_800_000,
            payload: Payload::Traces {
                project_id: "p1".to_string(),
                traces: vec![sample_trace()],
            },
        };

        let line = encode_record(&record).unwrap();
        assert!(line.ends_with('\n'));

        let decoded = decode_record(line.trim_end()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_payload_discriminated_by_key() {
        let json = r#"{"sequence":0,"timestamp":1000,"payload":{"projectId":"p1","spans":[]}}"#;
        let record = decode_record(json).unwrap();
        assert!(matches!(record.payload, Payload::Spans { .. }));
        assert_eq!(record.payload.project_id(), "p1");
    }

    #[test]
    fn test_format_sequence_is_sortable() {
        assert_eq!(format_sequence(1), "0000000000000001");
        assert_eq!(format_sequence(420), "0000000000000420");
        assert!(format_sequence(9) < format_sequence(10));
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("0000000000000001.ndjson"), Some(1));
        assert_eq!(parse_sequence("0000000000000420.ndjson"), Some(420));
        assert_eq!(parse_sequence("invalid.ndjson"), None);
        assert_eq!(parse_sequence("0000000000000001.txt"), None);
        assert_eq!(parse_sequence(".ndjson"), None);
    }
}
