use std::sync::Arc;

use axum::Router;

use crate::StatsAggregator;

mod health;
mod stats;

pub use stats::StatsResponse;

// ---

pub fn router(stats: Arc<StatsAggregator>) -> Router {
    // ---
    Router::new()
        .merge(stats::router())
        .merge(health::router())
        .with_state(stats)
}
