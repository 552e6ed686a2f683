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

//! Input validation for ingest requests
//!
//! Rejected payloads never reach the WAL: a record that passes here is
//! one the downstream consumer can always apply, so a sink failure
//! means a transient downstream problem rather than bad data.

use crate::api::ApiError;
use pulse_core::{SpanInput, TraceInput};

/// Maximum items allowed per ingest batch.
pub const MAX_BATCH_SIZE: usize = 100;

fn validate_batch_size(count: usize) -> Result<(), ApiError> {
    if count == 0 {
        return Err(ApiError::BadRequest(
            "empty batch: at least one item is required".to_string(),
        ));
    }
    if count > MAX_BATCH_SIZE {
        return Err(ApiError::BadRequest(format!(
            "batch size {count} exceeds limit of {MAX_BATCH_SIZE}"
        )));
    }
    Ok(())
}

fn require(field: &str, value: &str, idx: usize) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "item {idx}: {field} must be a non-empty string"
        )));
    }
    Ok(())
}

fn require_timestamp(value: &str, idx: usize) -> Result<(), ApiError> {
    if chrono::DateTime::parse_from_rfc3339(value).is_err() {
        return Err(ApiError::BadRequest(format!(
            "item {idx}: timestamp must be an RFC 3339 datetime"
        )));
    }
    Ok(())
}

pub fn validate_trace_batch(traces: &[TraceInput]) -> Result<(), ApiError> {
    validate_batch_size(traces.len())?;
    for (idx, trace) in traces.iter().enumerate() {
        require("trace_id", &trace.trace_id, idx)?;
        require("model_requested", &trace.model_requested, idx)?;
        require_timestamp(&trace.timestamp, idx)?;
        if trace.latency_ms < 0.0 {
            return Err(ApiError::BadRequest(format!(
                "item {idx}: latency_ms must be non-negative"
            )));
        }
    }
    Ok(())
}

pub fn validate_span_batch(spans: &[SpanInput]) -> Result<(), ApiError> {
    validate_batch_size(spans.len())?;
    for (idx, span) in spans.iter().enumerate() {
        require("span_id", &span.span_id, idx)?;
        require("session_id", &span.session_id, idx)?;
        require("event_type", &span.event_type, idx)?;
        require_timestamp(&span.timestamp, idx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{IngestStatus, Provider};
    use std::collections::HashMap;

    fn trace() -> TraceInput {
        TraceInput {
            trace_id: "t-1".to_string(),
            timestamp: "2025-01-15T10:30:00Z".to_string(),
            provider: Provider::Anthropic,
            model_requested: "claude-sonnet".to_string(),
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
            latency_ms: 12.0,
            cost_cents: None,
            session_id: None,
            metadata: None,
        }
    }

    #[test]
    fn test_valid_trace_batch_passes() {
        validate_trace_batch(&[trace()]).unwrap();
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(validate_trace_batch(&[]).is_err());
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let batch: Vec<TraceInput> = (0..MAX_BATCH_SIZE + 1).map(|_| trace()).collect();
        assert!(validate_trace_batch(&batch).is_err());
    }

    #[test]
    fn test_blank_trace_id_rejected() {
        let mut bad = trace();
        bad.trace_id = "  ".to_string();
        assert!(validate_trace_batch(&[bad]).is_err());
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut bad = trace();
        bad.timestamp = "yesterday".to_string();
        assert!(validate_trace_batch(&[bad]).is_err());
    }
}
