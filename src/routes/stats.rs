// src/routes/stats.rs
//! Read-only view of the running pipeline's counters.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::stats::{Stats, StatsAggregator};

/// JSON body of `GET /stats`: the snapshot plus derived values.
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    stats: Stats,
    uptime_seconds: i64,
    /// Percentage of readings classified anomalous.
    anomaly_rate: f64,
}

impl From<Stats> for StatsResponse {
    fn from(stats: Stats) -> Self {
        // ---
        let uptime_seconds = stats.uptime_seconds();
        let anomaly_rate = stats.anomaly_rate();
        Self {
            stats,
            uptime_seconds,
            anomaly_rate,
        }
    }
}

async fn handler(State(stats): State<Arc<StatsAggregator>>) -> Json<StatsResponse> {
    // ---
    tracing::debug!("GET /stats");
    Json(stats.snapshot().into())
}

pub fn router() -> Router<Arc<StatsAggregator>> {
    Router::new().route("/stats", get(handler))
}
