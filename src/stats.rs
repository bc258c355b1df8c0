//! Process-lifetime pipeline counters.
//!
//! One [`StatsAggregator`] is created per pipeline and shared by handle; the
//! dispatcher records into it and reporting code reads snapshots, possibly
//! from another task. All fields live behind a single lock so a snapshot is
//! never partially updated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::Classification;
use crate::sinks::SinkWriteOutcome;

// ---

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_readings: u64,
    pub anomalies_detected: u64,
    /// Readings with at least one failed sink write.
    pub errors: u64,
    pub per_sink_successes: BTreeMap<String, u64>,
    pub per_sink_failures: BTreeMap<String, u64>,
    pub start_time: DateTime<Utc>,
}

impl Stats {
    // ---
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_readings: 0,
            anomalies_detected: 0,
            errors: 0,
            per_sink_successes: BTreeMap::new(),
            per_sink_failures: BTreeMap::new(),
            start_time,
        }
    }

    pub fn successes_for(&self, sink: &str) -> u64 {
        self.per_sink_successes.get(sink).copied().unwrap_or(0)
    }

    pub fn failures_for(&self, sink: &str) -> u64 {
        self.per_sink_failures.get(sink).copied().unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds().max(0)
    }

    /// Percentage of readings classified anomalous.
    pub fn anomaly_rate(&self) -> f64 {
        if self.total_readings == 0 {
            0.0
        } else {
            self.anomalies_detected as f64 / self.total_readings as f64 * 100.0
        }
    }
}

#[derive(Debug)]
pub struct StatsAggregator {
    inner: Mutex<Stats>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    // ---
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Stats::new(start_time)),
        }
    }

    /// Pre-register sink names so they show up with zero counts.
    pub fn register_sinks<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        // ---
        let mut stats = self.inner.lock();
        for name in names {
            stats.per_sink_successes.entry(name.to_string()).or_insert(0);
            stats.per_sink_failures.entry(name.to_string()).or_insert(0);
        }
    }

    /// Account for one dispatched reading.
    pub fn record(&self, outcomes: &[SinkWriteOutcome], classification: Classification) {
        // ---
        let mut guard = self.inner.lock();
        let stats = &mut *guard;

        stats.total_readings += 1;
        if classification.is_anomalous() {
            stats.anomalies_detected += 1;
        }

        let mut any_failed = false;
        for outcome in outcomes {
            let counters = if outcome.succeeded() {
                &mut stats.per_sink_successes
            } else {
                any_failed = true;
                &mut stats.per_sink_failures
            };
            *counters.entry(outcome.sink_name.to_string()).or_insert(0) += 1;
        }

        if any_failed {
            stats.errors += 1;
        }
    }

    pub fn snapshot(&self) -> Stats {
        self.inner.lock().clone()
    }
}
