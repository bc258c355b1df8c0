//! Typed records passed between pipeline stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Temperature above which an anomalous reading is raised as a high severity alert.
const HIGH_SEVERITY_TEMPERATURE: f64 = 100.0;

/// One telemetry sample produced by a reading source.
///
/// Immutable once produced; the dispatcher consumes it exactly once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub sensor_id: String,
    pub observed_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,

    /// Label known only for synthetic readings. Used for training diagnostics
    /// and persisted alongside the model prediction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_anomaly: Option<bool>,
}

impl Reading {
    // ---
    pub fn new(
        sensor_id: impl Into<String>,
        observed_at: DateTime<Utc>,
        temperature: f64,
        humidity: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            observed_at,
            temperature,
            humidity,
            ground_truth_anomaly: None,
        }
    }

    pub fn with_ground_truth(mut self, is_anomaly: bool) -> Self {
        self.ground_truth_anomaly = Some(is_anomaly);
        self
    }
}

/// Binary verdict of the anomaly model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    Anomalous,
}

impl Classification {
    // ---
    pub fn is_anomalous(self) -> bool {
        matches!(self, Classification::Anomalous)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Anomalous => "anomalous",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Medium,
    High,
}

impl AlertSeverity {
    // ---
    pub fn for_reading(reading: &Reading) -> Self {
        if reading.temperature > HIGH_SEVERITY_TEMPERATURE {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
        }
    }
}
