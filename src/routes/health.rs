// src/routes/health.rs
//! Liveness endpoint for the pipeline's status server.
//!
//! Internal to this file: the handler and its response type. Exports to the
//! gateway (`mod.rs`): a subrouter containing the `/health` route.

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
///
/// Answers as long as the process is serving requests; it does not touch any
/// sink, so a degraded object store or local disk still reports `ok`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the application state so it merges into the gateway router
/// regardless of the state type.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
