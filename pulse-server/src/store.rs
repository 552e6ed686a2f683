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

//! In-memory idempotent trace/span store
//!
//! Keyed by (project id, record id) with last-write-wins upsert
//! semantics — applying the same item twice yields one stored row.
//! That idempotency is the correctness linchpin that makes the WAL's
//! at-least-once delivery acceptable.

use dashmap::DashMap;
use pulse_core::{Payload, SpanInput, TraceInput, WalRecord};
use pulse_wal::RecordSink;

type Key = (String, String);

/// Concurrent keyed store for ingested traces and spans.
#[derive(Default)]
pub struct MemoryTraceStore {
    traces: DashMap<Key, TraceInput>,
    spans: DashMap<Key, SpanInput>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a batch of traces. Returns how many were written.
    pub fn insert_traces(&self, project_id: &str, traces: &[TraceInput]) -> usize {
        for trace in traces {
            self.traces
                .insert((project_id.to_string(), trace.trace_id.clone()), trace.clone());
        }
        traces.len()
    }

    /// Upsert a batch of spans. Returns how many were written.
    pub fn insert_spans(&self, project_id: &str, spans: &[SpanInput]) -> usize {
        for span in spans {
            self.spans
                .insert((project_id.to_string(), span.span_id.clone()), span.clone());
        }
        spans.len()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn get_trace(&self, project_id: &str, trace_id: &str) -> Option<TraceInput> {
        self.traces
            .get(&(project_id.to_string(), trace_id.to_string()))
            .map(|t| t.clone())
    }

    pub fn get_span(&self, project_id: &str, span_id: &str) -> Option<SpanInput> {
        self.spans
            .get(&(project_id.to_string(), span_id.to_string()))
            .map(|s| s.clone())
    }
}

#[async_trait::async_trait]
impl RecordSink for MemoryTraceStore {
    async fn apply(&self, record: &WalRecord) -> anyhow::Result<()> {
        match &record.payload {
            Payload::Traces { project_id, traces } => {
                self.insert_traces(project_id, traces);
            }
            Payload::Spans { project_id, spans } => {
                self.insert_spans(project_id, spans);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{IngestStatus, Provider};
    use std::collections::HashMap;

    fn trace(trace_id: &str, model: &str) -> TraceInput {
        TraceInput {
            trace_id: trace_id.to_string(),
            timestamp: "2025-01-15T10:30:00Z".to_string(),
            provider: Provider::Openai,
            model_requested: model.to_string(),
            model_used: None,
            provider_request_id: None,
            request_body: HashMap::new(),
            response_body: None,
            input_tokens: None,
            output_tokens: None,
            output_text: None,
            finish_reason: None,
            status: IngestStatus::Success,
            error: None,
            latency_ms: 1.0,
            cost_cents: None,
            session_id: None,
            metadata: None,
        }
    }

    #[test]
    fn test_double_insert_is_one_row() {
        let store = MemoryTraceStore::new();
        store.insert_traces("p1", &[trace("t1", "gpt-4o")]);
        store.insert_traces("p1", &[trace("t1", "gpt-4o")]);
        assert_eq!(store.trace_count(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryTraceStore::new();
        store.insert_traces("p1", &[trace("t1", "gpt-4o")]);
        store.insert_traces("p1", &[trace("t1", "gpt-4o-mini")]);
        assert_eq!(
            store.get_trace("p1", "t1").unwrap().model_requested,
            "gpt-4o-mini"
        );
    }

    #[test]
    fn test_projects_are_isolated() {
        let store = MemoryTraceStore::new();
        store.insert_traces("p1", &[trace("t1", "m")]);
        store.insert_traces("p2", &[trace("t1", "m")]);
        assert_eq!(store.trace_count(), 2);
    }
}
