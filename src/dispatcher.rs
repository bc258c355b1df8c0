//! Per-reading ingestion: classify, route, fan out, account.
//!
//! For each reading the order is fixed: feature extraction and
//! classification, tier routing, one write attempt per sink, then the stats
//! update. A sink failure never skips another sink; every outcome is counted.

use std::sync::Arc;

use crate::anomaly::AnomalyModel;
use crate::models::{Classification, Reading};
use crate::router::{self, TierDecision};
use crate::sinks::{SinkSet, SinkWriteOutcome};
use crate::stats::StatsAggregator;

// ---

/// What happened to one reading.
#[derive(Debug)]
pub struct DispatchReport {
    pub classification: Classification,
    pub decision: TierDecision,
    pub outcomes: Vec<SinkWriteOutcome>,
}

impl DispatchReport {
    // ---
    pub fn failed_sinks(&self) -> impl Iterator<Item = &SinkWriteOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn fully_stored(&self) -> bool {
        self.outcomes.iter().all(SinkWriteOutcome::succeeded)
    }
}

pub struct IngestionDispatcher {
    model: AnomalyModel,
    sinks: SinkSet,
    stats: Arc<StatsAggregator>,
}

impl IngestionDispatcher {
    // ---
    pub fn new(model: AnomalyModel, sinks: SinkSet, stats: Arc<StatsAggregator>) -> Self {
        stats.register_sinks(sinks.names());
        Self {
            model,
            sinks,
            stats,
        }
    }

    pub fn model(&self) -> &AnomalyModel {
        &self.model
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Classify a batch in one pass; same length and order as the input.
    pub fn classify(&self, readings: &[Reading]) -> Vec<Classification> {
        self.model.predict(readings)
    }

    /// Full per-reading procedure for a single reading.
    pub async fn dispatch(&self, reading: &Reading) -> DispatchReport {
        // ---
        let classification = self
            .classify(std::slice::from_ref(reading))
            .pop()
            .unwrap_or(Classification::Normal);
        self.dispatch_classified(reading, classification).await
    }

    /// Dispatch a batch, classifying it once up front. Readings are stored
    /// strictly one after another in input order.
    pub async fn dispatch_batch(&self, readings: &[Reading]) -> Vec<DispatchReport> {
        // ---
        let classifications = self.classify(readings);
        let mut reports = Vec::with_capacity(readings.len());
        for (reading, classification) in readings.iter().zip(classifications) {
            reports.push(self.dispatch_classified(reading, classification).await);
        }
        reports
    }

    /// Route, write to every sink, and record stats for an already classified reading.
    pub async fn dispatch_classified(
        &self,
        reading: &Reading,
        classification: Classification,
    ) -> DispatchReport {
        // ---
        let decision = router::route(classification);
        let outcomes = self.sinks.write_all(&decision, reading, classification).await;

        for outcome in &outcomes {
            match &outcome.error {
                None => {}
                Some(e) if e.is_disabled() => tracing::debug!(
                    sink = outcome.sink_name,
                    sensor_id = %reading.sensor_id,
                    observed_at = %reading.observed_at,
                    "Skipped disabled sink"
                ),
                Some(e) => tracing::error!(
                    sink = outcome.sink_name,
                    sensor_id = %reading.sensor_id,
                    observed_at = %reading.observed_at,
                    "Sink write failed: {}",
                    e
                ),
            }
        }

        if classification.is_anomalous() {
            tracing::warn!(
                "ANOMALY: {} - T:{:.2}C H:{:.2}% -> {:?}",
                reading.sensor_id,
                reading.temperature,
                reading.humidity,
                decision.tiers()
            );
        } else {
            tracing::info!(
                "Normal: {} - T:{:.2}C H:{:.2}%",
                reading.sensor_id,
                reading.temperature,
                reading.humidity
            );
        }

        self.stats.record(&outcomes, classification);

        DispatchReport {
            classification,
            decision,
            outcomes,
        }
    }

    /// Release every sink connection.
    pub async fn close(&self) {
        self.sinks.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::router::Tier;
    use crate::sinks::{Sink, SinkWriteError};
    use crate::source::training_set;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Records calls; optionally fails every write.
    struct ProbeSink {
        name: &'static str,
        fail: bool,
        calls: Mutex<Vec<(String, Vec<Tier>, bool)>>,
    }

    impl ProbeSink {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Sink for ProbeSink {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn write(
            &self,
            decision: &TierDecision,
            reading: &Reading,
            _classification: Classification,
        ) -> SinkWriteOutcome {
            self.calls.lock().push((
                reading.sensor_id.clone(),
                decision.tiers().to_vec(),
                decision.alert(),
            ));
            if self.fail {
                SinkWriteOutcome::failure(
                    self.name,
                    SinkWriteError::Io(std::io::Error::other("simulated outage")),
                )
            } else {
                SinkWriteOutcome::success(self.name)
            }
        }
    }

    fn trained_model() -> AnomalyModel {
        // ---
        let mut model = AnomalyModel::default();
        model.train(&training_set(1000, 0.1, 11)).unwrap();
        model
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        // ---
        let first = ProbeSink::new("first", true);
        let second = ProbeSink::new("second", false);
        let sinks = SinkSet::new().with(first.clone()).with(second.clone());
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = IngestionDispatcher::new(AnomalyModel::default(), sinks, stats.clone());

        let reading = Reading::new("sensor_001", Utc::now(), 22.0, 55.0);
        let report = dispatcher.dispatch(&reading).await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.fully_stored());
        assert_eq!(report.failed_sinks().count(), 1);
        assert_eq!(first.calls.lock().len(), 1);
        assert_eq!(second.calls.lock().len(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.total_readings, 1);
        assert_eq!(snap.failures_for("first"), 1);
        assert_eq!(snap.successes_for("second"), 1);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn test_untrained_model_routes_to_silver() {
        // ---
        let sink = ProbeSink::new("probe", false);
        let dispatcher = IngestionDispatcher::new(
            AnomalyModel::default(),
            SinkSet::new().with(sink.clone()),
            Arc::new(StatsAggregator::new()),
        );

        let report = dispatcher
            .dispatch(&Reading::new("sensor_002", Utc::now(), 110.0, 1.0))
            .await;

        assert_eq!(report.classification, Classification::Normal);
        assert_eq!(
            sink.calls.lock()[0],
            ("sensor_002".to_string(), vec![Tier::Bronze, Tier::Silver], false)
        );
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_routes_by_class() {
        // ---
        let sink = ProbeSink::new("probe", false);
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher =
            IngestionDispatcher::new(trained_model(), SinkSet::new().with(sink.clone()), stats.clone());

        let now = Utc::now();
        let readings = vec![
            Reading::new("a", now, 22.0, 55.0),
            Reading::new("b", now, 95.0, 8.0),
            Reading::new("c", now, 24.0, 50.0),
        ];
        let reports = dispatcher.dispatch_batch(&readings).await;

        let classes: Vec<Classification> = reports.iter().map(|r| r.classification).collect();
        assert_eq!(
            classes,
            vec![Classification::Normal, Classification::Anomalous, Classification::Normal]
        );

        let calls = sink.calls.lock();
        let order: Vec<&str> = calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(calls[1].1, vec![Tier::Bronze, Tier::Gold]);
        assert!(calls[1].2);
        assert!(!calls[0].2 && !calls[2].2);

        let snap = stats.snapshot();
        assert_eq!(snap.total_readings, 3);
        assert_eq!(snap.anomalies_detected, 1);
        assert_eq!(snap.errors, 0);
    }

    #[tokio::test]
    async fn test_empty_sink_set_still_counts() {
        // ---
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = IngestionDispatcher::new(AnomalyModel::default(), SinkSet::new(), stats.clone());

        let report = dispatcher
            .dispatch(&Reading::new("sensor_001", Utc::now(), 20.0, 45.0))
            .await;
        assert!(report.outcomes.is_empty());
        assert!(report.fully_stored());
        assert_eq!(stats.snapshot().total_readings, 1);
        assert_eq!(stats.snapshot().errors, 0);
    }
}
