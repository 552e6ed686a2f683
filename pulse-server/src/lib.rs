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

//! Pulse ingest server
//!
//! Thin HTTP glue over the WAL: two partitioned streams (LLM-call
//! traces and agent-event spans) feeding one idempotent in-memory
//! store through their consumer loops.

pub mod api;
pub mod config;
pub mod store;
pub mod validation;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::store::MemoryTraceStore;
use anyhow::{Context, Result};
use pulse_wal::{RecordSink, WalService};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hard ceiling on graceful shutdown. Past this the process exits with
/// whatever has been synced; the WAL replays the rest on next start.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Retention sweep cadence for expired closed segments.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_server=info,pulse_wal=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        data_dir = %config.wal.data_dir.display(),
        "starting pulse server"
    );

    let store = Arc::new(MemoryTraceStore::new());
    let sink: Arc<dyn RecordSink> = store.clone();

    let traces = Arc::new(
        WalService::start(config.trace_stream(), Arc::clone(&sink))
            .context("starting trace WAL")?,
    );
    let spans = Arc::new(
        WalService::start(config.span_stream(), Arc::clone(&sink)).context("starting span WAL")?,
    );

    let cleanup = tokio::spawn(cleanup_loop(Arc::clone(&traces), Arc::clone(&spans)));

    let state = AppState {
        store,
        traces: Arc::clone(&traces),
        spans: Arc::clone(&spans),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;
    tracing::info!(addr = %config.server.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    cleanup.abort();

    // Stop listeners and close writers with a final sync, bounded so a
    // wedged sink cannot hold the process open forever.
    tracing::info!("shutting down WAL services");
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        traces.shutdown().await?;
        spans.shutdown().await
    })
    .await;

    match drained {
        Ok(result) => result?,
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "shutdown timed out; unsynced records will replay on next start"
        ),
    }

    tracing::info!("pulse server stopped");
    Ok(())
}

async fn cleanup_loop(traces: Arc<WalService>, spans: Arc<WalService>) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup stays quiet.
    interval.tick().await;
    loop {
        interval.tick().await;
        let deleted = traces.cleanup() + spans.cleanup();
        if deleted > 0 {
            tracing::info!(deleted, "retention sweep removed expired segments");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
