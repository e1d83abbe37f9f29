//! Status API for the `watch` mode, served with Axum.

use crate::error::{Error, Result};
use crate::model::Source;
use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourcesResponse {
    sources: Vec<Source>,
    count: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct InvalidationCount {
    key: String,
    count: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/invalidations", get(list_invalidations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the status API on all interfaces and serve until `token` is cancelled.
pub async fn run_server(port: u16, state: AppState, token: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
        addr: addr.to_string(),
        source,
    })?;
    serve(listener, state, token).await
}

pub async fn serve(listener: TcpListener, state: AppState, token: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().map_err(|source| Error::Bind {
        addr: "status listener".to_string(),
        source,
    })?;
    info!("Starting status server on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })
}

async fn health() -> &'static str {
    "OK"
}

async fn list_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    let sources = state.sources.read().await.clone();
    Json(SourcesResponse {
        count: sources.len(),
        sources,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn list_invalidations(State(state): State<AppState>) -> Json<Vec<InvalidationCount>> {
    let counts = state
        .tracker
        .snapshot()
        .into_iter()
        .map(|(key, count)| InvalidationCount {
            key: key.to_string(),
            count,
        })
        .collect();
    Json(counts)
}
