//! Storage backends ("sinks") behind one write contract.
//!
//! Every sink decides at startup whether it is usable and keeps that decision
//! in an explicit [`SinkState`] for the rest of the process. Writes never
//! return `Err` to the dispatcher; backend failures come back as a failed
//! [`SinkWriteOutcome`] so one sink can never stop another from being tried.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Classification, Reading};
use crate::router::TierDecision;

pub mod layout;
pub mod local_file;
pub mod object_store;
pub mod relational;

pub use self::local_file::LocalFileSink;
pub use self::object_store::ObjectStoreSink;
pub use self::relational::RelationalSink;

// ---

/// Connection state fixed at startup. A disabled sink is never reconnected.
#[derive(Debug)]
pub enum SinkState<C> {
    Enabled(C),
    Disabled { reason: String },
}

impl<C> SinkState<C> {
    // ---
    pub fn is_enabled(&self) -> bool {
        matches!(self, SinkState::Enabled(_))
    }

    /// The live connection, or [`SinkWriteError::Disabled`] without touching I/O.
    pub fn connection(&self) -> Result<&C, SinkWriteError> {
        match self {
            SinkState::Enabled(conn) => Ok(conn),
            SinkState::Disabled { reason } => Err(SinkWriteError::Disabled {
                reason: reason.clone(),
            }),
        }
    }
}

/// Startup health probe failed against every candidate endpoint.
#[derive(Debug, Error)]
#[error("{sink}: no candidate endpoint responded ({})", .attempts.join("; "))]
pub struct SinkConnectionError {
    pub sink: &'static str,
    /// One `endpoint: reason` entry per failed candidate.
    pub attempts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SinkWriteError {
    /// The sink was disabled at startup; no I/O was attempted.
    #[error("sink disabled: {reason}")]
    Disabled { reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] ::object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SinkWriteError {
    // ---
    pub fn is_disabled(&self) -> bool {
        matches!(self, SinkWriteError::Disabled { .. })
    }
}

/// Result of one write attempt against one sink.
#[derive(Debug)]
pub struct SinkWriteOutcome {
    pub sink_name: &'static str,
    pub error: Option<SinkWriteError>,
}

impl SinkWriteOutcome {
    // ---
    pub fn success(sink_name: &'static str) -> Self {
        Self {
            sink_name,
            error: None,
        }
    }

    pub fn failure(sink_name: &'static str, error: SinkWriteError) -> Self {
        Self {
            sink_name,
            error: Some(error),
        }
    }

    pub fn from_result(sink_name: &'static str, result: Result<(), SinkWriteError>) -> Self {
        match result {
            Ok(()) => Self::success(sink_name),
            Err(e) => Self::failure(sink_name, e),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Failed because the sink is disabled, as opposed to a transient write error.
    pub fn is_disabled(&self) -> bool {
        self.error.as_ref().is_some_and(SinkWriteError::is_disabled)
    }
}

/// Uniform write contract shared by every backend.
#[async_trait]
pub trait Sink: Send + Sync {
    // ---
    /// Stable name used in stats and logs.
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool;

    /// Store `reading` in every tier of `decision` this backend handles.
    ///
    /// Must not panic or return early on backend errors; failures are
    /// reported through the outcome.
    async fn write(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> SinkWriteOutcome;

    /// Flush and release the connection. Called once at shutdown.
    async fn close(&self) {}
}

/// Ordered collection of sinks the dispatcher fans out to.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn Sink>>,
}

impl SinkSet {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Arc<dyn Sink>) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// `(name, enabled)` per sink, in configuration order.
    pub fn states(&self) -> Vec<(&'static str, bool)> {
        self.sinks.iter().map(|s| (s.name(), s.is_enabled())).collect()
    }

    /// Attempt the write on every sink. Each sink is invoked regardless of
    /// earlier outcomes; one outcome is returned per sink, in order.
    pub async fn write_all(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> Vec<SinkWriteOutcome> {
        // ---
        let mut outcomes = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            outcomes.push(sink.write(decision, reading, classification).await);
        }
        outcomes
    }

    pub async fn close_all(&self) {
        // ---
        for sink in &self.sinks {
            sink.close().await;
            tracing::debug!("Closed sink {}", sink.name());
        }
    }
}
