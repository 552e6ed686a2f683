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

//! Ingest handlers for LLM-call traces and agent-event spans
//!
//! The `/async` routes are the durable path: validate, append to the
//! partitioned WAL, answer `202 {status:"queued"}` immediately. The
//! consumer loop applies the records to the store out of band. The
//! `/batch` routes bypass the WAL and upsert synchronously.

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use pulse_core::{Payload, SpanInput, TraceInput};
use pulse_wal::DeadLetterEntry;
use serde::Serialize;
use tracing::{debug, error};

use crate::api::{ApiError, AppState};
use crate::validation;

/// Response for the async (WAL-backed) ingest routes.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub count: usize,
}

/// Response for the synchronous batch routes.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub inserted: usize,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterReport {
    pub traces: Vec<DeadLetterItem>,
    pub spans: Vec<DeadLetterItem>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    pub partition: u32,
    #[serde(flatten)]
    pub entry: DeadLetterEntry,
}

fn project_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-project-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("missing x-project-id header".to_string()))
}

/// POST /v1/traces/async
pub async fn enqueue_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(traces): Json<Vec<TraceInput>>,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    let project = project_id(&headers)?;
    validation::validate_trace_batch(&traces)?;

    let count = traces.len();
    debug!(project = %project, count, "enqueueing traces");

    let payload = Payload::Traces {
        project_id: project.clone(),
        traces,
    };
    state.traces.publish(&project, payload).map_err(|err| {
        error!(project = %project, error = %err, "trace enqueue failed");
        ApiError::Unavailable("failed to enqueue traces".to_string())
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            status: "queued",
            count,
        }),
    ))
}

/// POST /v1/spans/async
pub async fn enqueue_spans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spans): Json<Vec<SpanInput>>,
) -> Result<(StatusCode, Json<QueuedResponse>), ApiError> {
    let project = project_id(&headers)?;
    validation::validate_span_batch(&spans)?;

    let count = spans.len();
    debug!(project = %project, count, "enqueueing spans");

    let payload = Payload::Spans {
        project_id: project.clone(),
        spans,
    };
    state.spans.publish(&project, payload).map_err(|err| {
        error!(project = %project, error = %err, "span enqueue failed");
        ApiError::Unavailable("failed to enqueue spans".to_string())
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedResponse {
            status: "queued",
            count,
        }),
    ))
}

/// POST /v1/traces/batch
pub async fn batch_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(traces): Json<Vec<TraceInput>>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let project = project_id(&headers)?;
    validation::validate_trace_batch(&traces)?;

    let inserted = state.store.insert_traces(&project, &traces);
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            status: "ok",
            inserted,
        }),
    ))
}

/// POST /v1/spans/batch
pub async fn batch_spans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spans): Json<Vec<SpanInput>>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let project = project_id(&headers)?;
    validation::validate_span_batch(&spans)?;

    let inserted = state.store.insert_spans(&project, &spans);
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            status: "ok",
            inserted,
        }),
    ))
}

/// GET /v1/dead-letters — operator view of records that exhausted
/// their retries, per stream.
pub async fn dead_letters(State(state): State<AppState>) -> Json<DeadLetterReport> {
    let collect = |service: &pulse_wal::WalService| {
        service
            .dead_letters()
            .into_iter()
            .map(|(partition, entry)| DeadLetterItem { partition, entry })
            .collect()
    };

    Json(DeadLetterReport {
        traces: collect(&state.traces),
        spans: collect(&state.spans),
    })
}
