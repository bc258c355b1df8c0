//! Feature extraction shared by training and inference.
//!
//! The anomaly model only ever sees vectors built here, so the decision
//! boundary learned at training time is applied to identically shaped input
//! at prediction time.

use crate::models::Reading;

// ---

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 3;

/// `(temperature, humidity, temperature / humidity)`, ratio is `0` when humidity is `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    // ---
    pub fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

/// Build the feature vector for one reading.
pub fn extract(reading: &Reading) -> FeatureVector {
    // ---
    let ratio = if reading.humidity == 0.0 {
        0.0
    } else {
        reading.temperature / reading.humidity
    };

    FeatureVector([reading.temperature, reading.humidity, ratio])
}

/// Build feature vectors for a batch, preserving order.
pub fn extract_batch(readings: &[Reading]) -> Vec<FeatureVector> {
    readings.iter().map(extract).collect()
}
