//! PostgreSQL sink: the mandatory primary store.
//!
//! Unlike the object-store and file sinks there is no fallback for the
//! relational record, so failing to reach it at startup is fatal. Each write
//! inserts the reading and, for gold-routed readings, the alert row inside
//! one transaction.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{local_file, object_store, Sink, SinkWriteError, SinkWriteOutcome};
use crate::config::mask_db_url;
use crate::error::StartupError;
use crate::models::{AlertSeverity, Classification, Reading};
use crate::router::TierDecision;
use crate::schema;
use crate::stats::Stats;

// ---

pub const SINK_NAME: &str = "relational";

const ALERT_TYPE: &str = "ML_DETECTED";
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RelationalSink {
    pool: PgPool,
}

impl RelationalSink {
    // ---
    /// Connect and create the schema. Any failure here aborts startup.
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StartupError> {
        // ---
        tracing::info!("Attempting to connect to database: {}", mask_db_url(db_url));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(db_url)
            .await
            .map_err(|source| StartupError::RelationalUnavailable {
                url: mask_db_url(db_url),
                source,
            })?;

        tracing::info!("Successfully connected to database");

        schema::create_schema(&pool)
            .await
            .map_err(StartupError::Schema)?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool whose schema is already in place.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> Result<(), SinkWriteError> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sensor_readings (
                sensor_id, observed_at, temperature, humidity,
                ground_truth_anomaly, model_prediction
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&reading.sensor_id)
        .bind(reading.observed_at)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.ground_truth_anomaly)
        .bind(classification.as_str())
        .execute(&mut *tx)
        .await?;

        if decision.alert() {
            sqlx::query(
                r#"
                INSERT INTO anomaly_alerts (
                    sensor_id, observed_at, temperature, humidity, alert_type, severity
                ) VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&reading.sensor_id)
            .bind(reading.observed_at)
            .bind(reading.temperature)
            .bind(reading.humidity)
            .bind(ALERT_TYPE)
            .bind(AlertSeverity::for_reading(reading).as_str())
            .execute(&mut *tx)
            .await?;
        }

        // Dropping `tx` on an earlier `?` rolls both inserts back.
        tx.commit().await?;
        Ok(())
    }

    /// Persist a stats snapshot for dashboards.
    pub async fn record_stats(&self, run_id: Uuid, stats: &Stats) -> Result<(), sqlx::Error> {
        // ---
        let count = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO pipeline_stats (
                run_id, total_readings, anomalies_detected,
                relational_successes, relational_failures,
                object_store_successes, object_store_failures,
                local_file_successes, local_file_failures,
                errors, uptime_seconds
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(run_id)
        .bind(count(stats.total_readings))
        .bind(count(stats.anomalies_detected))
        .bind(count(stats.successes_for(SINK_NAME)))
        .bind(count(stats.failures_for(SINK_NAME)))
        .bind(count(stats.successes_for(object_store::SINK_NAME)))
        .bind(count(stats.failures_for(object_store::SINK_NAME)))
        .bind(count(stats.successes_for(local_file::SINK_NAME)))
        .bind(count(stats.failures_for(local_file::SINK_NAME)))
        .bind(count(stats.errors))
        .bind(stats.uptime_seconds())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a lifecycle event. Failures are logged and swallowed.
    pub async fn log_system_event(&self, event_type: &str, status: &str, message: &str) {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO system_events (event_type, event_status, message)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event_type)
        .bind(status)
        .bind(message)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to log system event '{}': {}", event_type, e);
        }
    }
}

#[async_trait]
impl Sink for RelationalSink {
    // ---
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    fn is_enabled(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn write(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> SinkWriteOutcome {
        // ---
        let result = self.insert(decision, reading, classification).await;
        SinkWriteOutcome::from_result(SINK_NAME, result)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
