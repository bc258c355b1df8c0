//! Relational schema management.
//!
//! Ensures the pipeline tables and indexes exist before the first write.
//! Applied once on startup by the relational sink.

use sqlx::PgPool;

// ---

/// Create the schema if missing (idempotent, single transaction).
///
/// Tables:
/// - `sensor_readings`: every dispatched reading with its model verdict
/// - `anomaly_alerts`: one row per reading routed to gold
/// - `pipeline_stats`: periodic stats snapshots
/// - `system_events`: connection and lifecycle events
pub async fn create_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id                   BIGSERIAL PRIMARY KEY,
            sensor_id            TEXT             NOT NULL,
            observed_at          TIMESTAMPTZ      NOT NULL,
            temperature          DOUBLE PRECISION NOT NULL,
            humidity             DOUBLE PRECISION NOT NULL,
            ground_truth_anomaly BOOLEAN,
            model_prediction     TEXT             NOT NULL,
            created_at           TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anomaly_alerts (
            id          BIGSERIAL PRIMARY KEY,
            sensor_id   TEXT             NOT NULL,
            observed_at TIMESTAMPTZ      NOT NULL,
            temperature DOUBLE PRECISION NOT NULL,
            humidity    DOUBLE PRECISION NOT NULL,
            alert_type  TEXT             NOT NULL,
            severity    TEXT             NOT NULL,
            created_at  TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_stats (
            id                       BIGSERIAL PRIMARY KEY,
            timestamp                TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            run_id                   UUID        NOT NULL,
            total_readings           BIGINT      NOT NULL,
            anomalies_detected       BIGINT      NOT NULL,
            relational_successes     BIGINT      NOT NULL,
            relational_failures      BIGINT      NOT NULL,
            object_store_successes   BIGINT      NOT NULL,
            object_store_failures    BIGINT      NOT NULL,
            local_file_successes     BIGINT      NOT NULL,
            local_file_failures      BIGINT      NOT NULL,
            errors                   BIGINT      NOT NULL,
            uptime_seconds           BIGINT      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_events (
            id           BIGSERIAL PRIMARY KEY,
            timestamp    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            event_type   TEXT        NOT NULL,
            event_status TEXT        NOT NULL,
            message      TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor_time
            ON sensor_readings (sensor_id, observed_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_anomaly_alerts_observed_at
            ON anomaly_alerts (observed_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
