//! Reading sources.
//!
//! The pipeline pulls one reading per configured sensor per cycle from a
//! [`ReadingSource`]. [`SyntheticSource`] is the demo generator: normal
//! readings sit in a comfortable indoor band, injected anomalies are hot and
//! dry.

use std::ops::Range;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::models::Reading;

// ---

const NORMAL_TEMPERATURE: Range<f64> = 18.0..28.0;
const NORMAL_HUMIDITY: Range<f64> = 40.0..70.0;
const ANOMALY_TEMPERATURE: Range<f64> = 80.0..120.0;
const ANOMALY_HUMIDITY: Range<f64> = 0.0..20.0;

/// Anything that can produce the next reading for a sensor.
pub trait ReadingSource: Send + Sync {
    fn next_reading(&mut self, sensor_id: &str) -> Reading;
}

/// Random readings with a configurable injected anomaly rate.
pub struct SyntheticSource {
    rng: StdRng,
    anomaly_rate: f64,
}

impl SyntheticSource {
    // ---
    pub fn new(anomaly_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            anomaly_rate: anomaly_rate.clamp(0.0, 1.0),
        }
    }
}

impl ReadingSource for SyntheticSource {
    fn next_reading(&mut self, sensor_id: &str) -> Reading {
        // ---
        let is_anomaly = self.rng.gen_bool(self.anomaly_rate);
        synthesize(&mut self.rng, sensor_id, is_anomaly)
    }
}

fn synthesize(rng: &mut StdRng, sensor_id: &str, is_anomaly: bool) -> Reading {
    // ---
    let (temperature, humidity) = if is_anomaly {
        (rng.gen_range(ANOMALY_TEMPERATURE), rng.gen_range(ANOMALY_HUMIDITY))
    } else {
        (rng.gen_range(NORMAL_TEMPERATURE), rng.gen_range(NORMAL_HUMIDITY))
    };

    Reading::new(sensor_id, Utc::now(), round2(temperature), round2(humidity))
        .with_ground_truth(is_anomaly)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Labeled training set with exactly `round(n * anomaly_fraction)` anomalies,
/// shuffled, spread over five sensor ids.
pub fn training_set(n: usize, anomaly_fraction: f64, seed: u64) -> Vec<Reading> {
    // ---
    let mut rng = StdRng::seed_from_u64(seed);
    let anomalies = ((n as f64) * anomaly_fraction.clamp(0.0, 1.0)).round() as usize;

    let mut labels: Vec<bool> = (0..n).map(|i| i < anomalies).collect();
    labels.shuffle(&mut rng);

    labels
        .into_iter()
        .map(|is_anomaly| {
            let sensor_id = format!("sensor_{:03}", rng.gen_range(1..=5));
            synthesize(&mut rng, &sensor_id, is_anomaly)
        })
        .collect()
}
