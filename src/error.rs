//! Startup errors that terminate the process.
//!
//! Everything that can go wrong while the cycle loop runs is absorbed into
//! sink outcomes and counters; only these propagate out of startup.

use thiserror::Error;

use crate::anomaly::ModelError;

// ---

#[derive(Debug, Error)]
pub enum StartupError {
    /// The primary relational store cannot be reached. There is no fallback
    /// for the durable record, so the pipeline refuses to run.
    #[error("relational store unreachable at {url}: {source}")]
    RelationalUnavailable {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create relational schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model initialization failed: {0}")]
    Model(#[from] ModelError),

    #[error("failed to bind status server on {addr}: {source}")]
    StatusServer {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
