//! Startup and the periodic cycle loop.
//!
//! [`Pipeline::start`] turns a [`Config`] into a running pipeline: it loads
//! (or trains and saves) the anomaly model, connects every configured sink,
//! and wires them into an [`IngestionDispatcher`]. [`Pipeline::run`] then
//! polls each sensor once per cycle until the shutdown channel flips.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::anomaly::AnomalyModel;
use crate::config::{Config, SinkKind};
use crate::dispatcher::IngestionDispatcher;
use crate::error::StartupError;
use crate::models::Reading;
use crate::sinks::{LocalFileSink, ObjectStoreSink, RelationalSink, SinkSet};
use crate::source::{training_set, ReadingSource, SyntheticSource};
use crate::stats::{Stats, StatsAggregator};

// ---

/// Anomaly fraction of the synthetic set used when no model can be loaded.
const TRAINING_ANOMALY_FRACTION: f64 = 0.1;

pub struct Pipeline {
    dispatcher: IngestionDispatcher,
    source: Box<dyn ReadingSource>,
    sensor_ids: Vec<String>,
    cycle_interval: Duration,
    relational: Option<Arc<RelationalSink>>,
    run_id: Uuid,
    cycles: u64,
}

impl Pipeline {
    // ---
    /// Assemble a pipeline from already constructed parts.
    pub fn new(
        dispatcher: IngestionDispatcher,
        source: Box<dyn ReadingSource>,
        sensor_ids: Vec<String>,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            source,
            sensor_ids,
            cycle_interval,
            relational: None,
            run_id: Uuid::new_v4(),
            cycles: 0,
        }
    }

    /// Persist stats snapshots and lifecycle events through this store.
    pub fn with_relational(mut self, relational: Arc<RelationalSink>) -> Self {
        self.relational = Some(relational);
        self
    }

    /// Bring the whole pipeline up from configuration.
    ///
    /// Only an unreachable relational store (or its schema) and an untrainable
    /// model are fatal. The object store and the local-file sink start
    /// disabled when they cannot be reached.
    pub async fn start(config: &Config) -> Result<Self, StartupError> {
        // ---
        let model = load_or_train_model(config)?;

        let mut sinks = SinkSet::new();
        let mut relational = None;
        let mut object_store = None;

        for kind in &config.sinks {
            match kind {
                SinkKind::Relational => {
                    let db_url = config.db_url.as_deref().ok_or_else(|| {
                        StartupError::InvalidConfig(
                            "DATABASE_URL is required by the relational sink".to_string(),
                        )
                    })?;
                    let sink = Arc::new(RelationalSink::connect(db_url, config.db_pool_max).await?);
                    sink.log_system_event("database_connection", "success", "All tables created")
                        .await;
                    relational = Some(Arc::clone(&sink));
                    sinks.push(sink);
                }
                SinkKind::ObjectStore => {
                    let sink = Arc::new(ObjectStoreSink::connect_s3(&config.object_store).await);
                    object_store = Some(Arc::clone(&sink));
                    sinks.push(sink);
                }
                SinkKind::LocalFile => {
                    sinks.push(Arc::new(LocalFileSink::connect(&config.local_root).await));
                }
            }
        }

        if let (Some(db), Some(store)) = (&relational, &object_store) {
            match store.endpoint() {
                Some(endpoint) => {
                    db.log_system_event(
                        "object_store_connection",
                        "success",
                        &format!("Connected to {}", endpoint),
                    )
                    .await
                }
                None => {
                    db.log_system_event("object_store_connection", "failed", "All endpoints failed")
                        .await
                }
            }
        }

        for (name, enabled) in sinks.states() {
            tracing::info!(
                "Sink {}: {}",
                name,
                if enabled { "enabled" } else { "disabled" }
            );
        }

        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = IngestionDispatcher::new(model, sinks, stats);
        let source = SyntheticSource::new(config.simulated_anomaly_rate, None);

        let pipeline = Self::new(
            dispatcher,
            Box::new(source),
            config.sensor_ids.clone(),
            config.cycle_interval,
        );
        Ok(match relational {
            Some(db) => pipeline.with_relational(db),
            None => pipeline,
        })
    }

    pub fn dispatcher(&self) -> &IngestionDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        Arc::clone(self.dispatcher.stats())
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One reading per sensor, classified together and stored in sensor
    /// order. Returns how many readings were dispatched; fewer than the
    /// sensor count when shutdown was requested mid-cycle.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> usize {
        // ---
        self.cycles += 1;
        tracing::debug!("Cycle {} starting", self.cycles);

        let readings: Vec<Reading> = self
            .sensor_ids
            .iter()
            .map(|id| self.source.next_reading(id))
            .collect();
        let classifications = self.dispatcher.classify(&readings);

        let mut dispatched = 0;
        for (reading, classification) in readings.iter().zip(classifications) {
            if *shutdown.borrow() {
                tracing::info!(
                    "Shutdown requested, dropping {} pending readings",
                    readings.len() - dispatched
                );
                break;
            }
            self.dispatcher
                .dispatch_classified(reading, classification)
                .await;
            dispatched += 1;
        }
        dispatched
    }

    /// Log the current counters and persist them when a relational store is attached.
    pub async fn publish_stats(&self) -> Stats {
        // ---
        let snapshot = self.dispatcher.stats().snapshot();
        tracing::info!(
            run_id = %self.run_id,
            "Stats: total={} anomalies={} ({:.1}%) errors={} uptime={}s",
            snapshot.total_readings,
            snapshot.anomalies_detected,
            snapshot.anomaly_rate(),
            snapshot.errors,
            snapshot.uptime_seconds()
        );

        if let Some(db) = &self.relational {
            if let Err(e) = db.record_stats(self.run_id, &snapshot).await {
                tracing::error!("Failed to record pipeline stats: {}", e);
            }
        }
        snapshot
    }

    /// Run cycles until `shutdown` becomes `true` (or its sender is dropped),
    /// then release every sink. Returns the final counters.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Stats {
        // ---
        tracing::info!(
            run_id = %self.run_id,
            "Pipeline running: {} sensors every {}s",
            self.sensor_ids.len(),
            self.cycle_interval.as_secs_f64()
        );
        self.log_system_event("pipeline_start", "success", "Pipeline started")
            .await;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle(&shutdown).await;
            self.publish_stats().await;

            tokio::select! {
                _ = tokio::time::sleep(self.cycle_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown channel closed, stopping");
                        break;
                    }
                }
            }
        }

        tracing::info!("Pipeline stopping after {} cycles", self.cycles);
        let final_stats = self.publish_stats().await;
        self.log_system_event("pipeline_shutdown", "success", "Stopped by request")
            .await;
        self.dispatcher.close().await;
        final_stats
    }

    async fn log_system_event(&self, event_type: &str, status: &str, message: &str) {
        if let Some(db) = &self.relational {
            db.log_system_event(event_type, status, message).await;
        }
    }
}

/// Set the shutdown flag once `signal` fires.
///
/// When the signal listener cannot be installed the flag is never set and the
/// sender stays alive, so the cycle loop keeps running.
pub async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    // ---
    match signal.await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            let _ = shutdown.send(true);
            shutdown.closed().await;
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Load the persisted model, or train a fresh one on synthetic data and
/// persist it. A failed save only costs the next start a retrain.
pub fn load_or_train_model(config: &Config) -> Result<AnomalyModel, StartupError> {
    // ---
    match AnomalyModel::load(&config.model_path) {
        Ok(model) if model.is_trained() => {
            tracing::info!("Loaded anomaly model from {}", config.model_path.display());
            if model.config() != &config.model {
                tracing::warn!(
                    "Persisted model parameters {:?} differ from configured {:?}; using persisted",
                    model.config(),
                    config.model
                );
            }
            return Ok(model);
        }
        Ok(_) => tracing::warn!(
            "Persisted model at {} is untrained; training a new model",
            config.model_path.display()
        ),
        Err(e) => tracing::warn!("{}; training a new model", e),
    }

    let mut model = AnomalyModel::new(config.model);
    let data = training_set(
        config.training_samples,
        TRAINING_ANOMALY_FRACTION,
        config.model.forest.seed,
    );
    model.train(&data)?;

    if let Err(e) = model.save(&config.model_path) {
        tracing::warn!("Could not persist trained model: {}", e);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn local_only_config(dir: &std::path::Path) -> Config {
        // ---
        let vars: HashMap<&str, String> = HashMap::from([
            ("PIPELINE_SINKS", "local_file".to_string()),
            ("LOCAL_FALLBACK_ROOT", dir.join("data").display().to_string()),
            ("MODEL_PATH", dir.join("models/model.json").display().to_string()),
            ("TRAINING_SAMPLES", "300".to_string()),
            ("SENSOR_IDS", "s1,s2,s3".to_string()),
            ("STATUS_ADDR", "off".to_string()),
        ]);
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    /// Replays a fixed list of readings, cycling through it.
    struct FixedSource {
        values: Vec<(f64, f64)>,
        next: usize,
    }

    impl ReadingSource for FixedSource {
        fn next_reading(&mut self, sensor_id: &str) -> Reading {
            let (t, h) = self.values[self.next % self.values.len()];
            self.next += 1;
            Reading::new(sensor_id, chrono::Utc::now(), t, h)
        }
    }

    #[test]
    fn test_model_trained_then_reloaded() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let config = local_only_config(dir.path());
        assert!(!config.model_path.exists());

        let trained = load_or_train_model(&config).unwrap();
        assert!(trained.is_trained());
        assert!(config.model_path.exists());

        let reloaded = load_or_train_model(&config).unwrap();
        let probe = [
            Reading::new("s1", chrono::Utc::now(), 22.0, 55.0),
            Reading::new("s1", chrono::Utc::now(), 100.0, 5.0),
        ];
        assert_eq!(trained.predict(&probe), reloaded.predict(&probe));
    }

    #[tokio::test]
    async fn test_start_with_local_sink_only() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let config = local_only_config(dir.path());

        let mut pipeline = Pipeline::start(&config).await.unwrap();
        assert_eq!(pipeline.dispatcher().sinks().names(), vec!["local_file"]);
        assert!(pipeline.dispatcher().model().is_trained());

        let (_tx, rx) = watch::channel(false);
        assert_eq!(pipeline.run_cycle(&rx).await, 3);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.total_readings, 3);
        assert_eq!(stats.successes_for("local_file"), 3);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_shutdown_between_readings() {
        // ---
        let stats = Arc::new(StatsAggregator::new());
        let dispatcher = IngestionDispatcher::new(AnomalyModel::default(), SinkSet::new(), stats);
        let source = FixedSource {
            values: vec![(22.0, 50.0)],
            next: 0,
        };
        let mut pipeline = Pipeline::new(
            dispatcher,
            Box::new(source),
            vec!["a".into(), "b".into()],
            Duration::from_millis(10),
        );

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert_eq!(pipeline.run_cycle(&rx).await, 0);
        assert_eq!(pipeline.stats().snapshot().total_readings, 0);
    }

    #[tokio::test]
    async fn test_signal_sets_shutdown_flag() {
        // ---
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(forward_shutdown(async { Ok::<(), std::io::Error>(()) }, tx));

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_failed_signal_listener_keeps_running() {
        // ---
        let (tx, rx) = watch::channel(false);
        let listener = async { Err::<(), _>(std::io::Error::other("no signal support")) };
        let handle = tokio::spawn(forward_shutdown(listener, tx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!*rx.borrow());
        // An open channel with no new value: the loop would keep cycling.
        assert_eq!(rx.has_changed().ok(), Some(false));
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        // ---
        let stats = Arc::new(StatsAggregator::new());
        let mut model = AnomalyModel::default();
        model.train(&training_set(500, 0.1, 5)).unwrap();
        let dispatcher = IngestionDispatcher::new(model, SinkSet::new(), stats.clone());
        let source = FixedSource {
            values: vec![(22.0, 50.0), (110.0, 3.0)],
            next: 0,
        };
        let pipeline = Pipeline::new(
            dispatcher,
            Box::new(source),
            vec!["a".into(), "b".into()],
            Duration::from_millis(20),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(rx));
        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(true).unwrap();

        let final_stats = handle.await.unwrap();
        assert!(final_stats.total_readings >= 2);
        assert_eq!(final_stats.total_readings % 2, 0);
        assert_eq!(final_stats.anomalies_detected * 2, final_stats.total_readings);
        assert_eq!(stats.snapshot(), final_stats);
    }
}
