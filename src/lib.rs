//! Sensor telemetry ingestion with anomaly classification and tiered storage.
//!
//! Each reading is scored by an isolation-forest [`AnomalyModel`], routed to
//! the bronze tier plus either silver (normal) or gold (anomalous), and fanned
//! out to every configured [`Sink`]. A failing sink never blocks the others;
//! every outcome lands in the shared [`StatsAggregator`].
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): sibling
//! modules reach each other through the re-exports below rather than through
//! each other's internals.

pub mod anomaly;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod routes;
pub mod schema;
pub mod sinks;
pub mod source;
pub mod stats;

pub use anomaly::{AnomalyModel, ModelConfig, ModelError};
pub use config::{Config, SinkKind};
pub use dispatcher::{DispatchReport, IngestionDispatcher};
pub use error::StartupError;
pub use models::{Classification, Reading};
pub use pipeline::Pipeline;
pub use router::{Tier, TierDecision};
pub use sinks::{Sink, SinkSet, SinkWriteError, SinkWriteOutcome};
pub use stats::{Stats, StatsAggregator};
