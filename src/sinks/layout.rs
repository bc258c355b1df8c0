//! Key layout and document shape shared by the object-store and local-file sinks.
//!
//! Keys look like `<tier>/<sensor_id>/<date-path>/<epoch_millis>.json`. Bronze
//! and silver bucket by hour, gold by day. The leaf name is the reading's
//! `observed_at` in epoch milliseconds, so keys grow with time. Sinks create
//! keys exclusively: a second reading mapping to an existing key fails
//! instead of replacing the stored copy.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Classification, Reading};
use crate::router::Tier;

// ---

/// JSON body written for every tier copy of a reading.
#[derive(Debug, Serialize)]
pub struct TierDocument<'a> {
    pub sensor_id: &'a str,
    pub observed_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub classification: Classification,
    pub ground_truth_anomaly: Option<bool>,
    pub tier: Tier,
    pub processed_at: DateTime<Utc>,
}

impl<'a> TierDocument<'a> {
    // ---
    pub fn new(tier: Tier, reading: &'a Reading, classification: Classification) -> Self {
        Self {
            sensor_id: &reading.sensor_id,
            observed_at: reading.observed_at,
            temperature: reading.temperature,
            humidity: reading.humidity,
            classification,
            ground_truth_anomaly: reading.ground_truth_anomaly,
            tier,
            processed_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Relative key for one tier copy of `reading`.
pub fn object_key(tier: Tier, reading: &Reading) -> String {
    // ---
    let date_path = match tier {
        Tier::Bronze | Tier::Silver => reading.observed_at.format("%Y/%m/%d/%H"),
        Tier::Gold => reading.observed_at.format("%Y/%m/%d"),
    };

    format!(
        "{}/{}/{}/{}.json",
        tier,
        path_segment(&reading.sensor_id),
        date_path,
        reading.observed_at.timestamp_millis()
    )
}

/// Encode a sensor id as a single path segment.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so distinct ids always map to
/// distinct segments and no id can produce `.`, `..` or a separator. The empty
/// id maps to a lone `%`, which no other id can produce.
fn path_segment(raw: &str) -> String {
    // ---
    if raw.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
