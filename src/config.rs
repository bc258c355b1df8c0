//! Configuration loader for the `sensorflow-tiered` pipeline.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). Parsing goes through a lookup function so
//! tests can feed values without touching the process environment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::anomaly::{ForestParams, ModelConfig, DEFAULT_CONTAMINATION};
use crate::sinks::{local_file, object_store, relational};

/// Parse an optional environment variable of type `$ty` with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        $lookup($var_name).unwrap_or_else(|| $default.to_string())
    };
}

// ---

const DEFAULT_SINKS: &str = "relational,object_store,local_file";
const DEFAULT_OBJECT_STORE_ENDPOINTS: &str = "http://localhost:9000,http://127.0.0.1:9000";
const DEFAULT_SENSORS: &str = "sensor_001,sensor_002,sensor_003,sensor_004,sensor_005";
const DEFAULT_STATUS_ADDR: &str = "0.0.0.0:8080";

/// A storage backend that can be switched on in `PIPELINE_SINKS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Relational,
    ObjectStore,
    LocalFile,
}

impl SinkKind {
    // ---
    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Relational => relational::SINK_NAME,
            SinkKind::ObjectStore => object_store::SINK_NAME,
            SinkKind::LocalFile => local_file::SINK_NAME,
        }
    }
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "relational" | "postgres" => Ok(SinkKind::Relational),
            "object_store" | "minio" | "s3" => Ok(SinkKind::ObjectStore),
            "local_file" | "local" => Ok(SinkKind::LocalFile),
            other => bail!("unknown sink '{}'", other),
        }
    }
}

/// Connection settings for the S3-compatible object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    /// Candidate endpoints, tried in order at startup.
    pub endpoints: Vec<String>,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Active sinks, in fan-out order.
    pub sinks: Vec<SinkKind>,

    /// PostgreSQL connection string. Required when the relational sink is active.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub object_store: ObjectStoreSettings,

    /// Root directory of the local-file fallback sink.
    pub local_root: PathBuf,

    /// Fixed sensor set polled every cycle, in iteration order.
    pub sensor_ids: Vec<String>,

    /// Delay between cycles.
    pub cycle_interval: Duration,

    /// Where the trained model is persisted.
    pub model_path: PathBuf,

    pub model: ModelConfig,

    /// Size of the synthetic training set used when no model can be loaded.
    pub training_samples: usize,

    /// Injected anomaly rate of the demo reading generator.
    pub simulated_anomaly_rate: f64,

    /// Bind address of the read-only status server; `None` disables it.
    pub status_addr: Option<SocketAddr>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (when `relational` is active)
///
/// Optional:
/// - `PIPELINE_SINKS` – comma-separated active sinks (default: all three)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `OBJECT_STORE_ENDPOINTS`, `OBJECT_STORE_BUCKET`, `OBJECT_STORE_ACCESS_KEY`,
///   `OBJECT_STORE_SECRET_KEY`, `OBJECT_STORE_REGION`
/// - `LOCAL_FALLBACK_ROOT` – local sink root (default: `data`)
/// - `SENSOR_IDS` – comma-separated sensors (default: `sensor_001`..`sensor_005`)
/// - `CYCLE_INTERVAL_SECS` – seconds between cycles (default: 10)
/// - `MODEL_PATH` – persisted model (default: `models/anomaly_model.json`)
/// - `CONTAMINATION` – expected outlier fraction (default: 0.1)
/// - `MODEL_SEED` – forest and generator seed (default: 42)
/// - `TRAINING_SAMPLES` – fallback training size (default: 1000)
/// - `SIMULATED_ANOMALY_RATE` – demo generator anomaly rate (default: 0.12)
/// - `STATUS_ADDR` – status server address, `off` to disable (default: `0.0.0.0:8080`)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    Config::from_lookup(|key| env::var(key).ok())
}

impl Config {
    // ---
    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let sinks = split_list(&env_or!(lookup, "PIPELINE_SINKS", DEFAULT_SINKS))
            .iter()
            .map(|s| s.parse::<SinkKind>())
            .collect::<Result<Vec<_>>>()?;

        let db_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        if sinks.contains(&SinkKind::Relational) && db_url.is_none() {
            bail!("DATABASE_URL must be set in .env or environment when the relational sink is active");
        }

        let db_pool_max = parse_env!(lookup, "DB_POOL_MAX", u32, 5);

        let object_store = ObjectStoreSettings {
            endpoints: split_list(&env_or!(
                lookup,
                "OBJECT_STORE_ENDPOINTS",
                DEFAULT_OBJECT_STORE_ENDPOINTS
            )),
            bucket: env_or!(lookup, "OBJECT_STORE_BUCKET", "iot-lake"),
            access_key: env_or!(lookup, "OBJECT_STORE_ACCESS_KEY", "minioadmin"),
            secret_key: env_or!(lookup, "OBJECT_STORE_SECRET_KEY", "minioadmin"),
            region: env_or!(lookup, "OBJECT_STORE_REGION", "us-east-1"),
        };

        let sensor_ids = split_list(&env_or!(lookup, "SENSOR_IDS", DEFAULT_SENSORS));
        if sensor_ids.is_empty() {
            bail!("SENSOR_IDS must name at least one sensor");
        }

        let model = ModelConfig {
            contamination: parse_env!(lookup, "CONTAMINATION", f64, DEFAULT_CONTAMINATION),
            forest: ForestParams {
                seed: parse_env!(lookup, "MODEL_SEED", u64, ForestParams::default().seed),
                ..ForestParams::default()
            },
        };
        model.validate().map_err(|e| anyhow!("Invalid CONTAMINATION: {}", e))?;

        let training_samples = parse_env!(lookup, "TRAINING_SAMPLES", usize, 1000);
        if training_samples == 0 {
            bail!("TRAINING_SAMPLES must be positive");
        }

        let simulated_anomaly_rate = parse_env!(lookup, "SIMULATED_ANOMALY_RATE", f64, 0.12);
        if !(0.0..=1.0).contains(&simulated_anomaly_rate) {
            bail!("SIMULATED_ANOMALY_RATE must be within [0, 1]");
        }

        let status_addr = match env_or!(lookup, "STATUS_ADDR", DEFAULT_STATUS_ADDR).trim() {
            "" | "off" | "disabled" => None,
            addr => Some(
                addr.parse::<SocketAddr>()
                    .map_err(|e| anyhow!("Invalid STATUS_ADDR: {}", e))?,
            ),
        };

        Ok(Config {
            sinks,
            db_url,
            db_pool_max,
            object_store,
            local_root: PathBuf::from(env_or!(lookup, "LOCAL_FALLBACK_ROOT", "data")),
            sensor_ids,
            cycle_interval: Duration::from_secs(parse_env!(lookup, "CYCLE_INTERVAL_SECS", u64, 10)),
            model_path: PathBuf::from(env_or!(lookup, "MODEL_PATH", "models/anomaly_model.json")),
            model,
            training_samples,
            simulated_anomaly_rate,
            status_addr,
        })
    }

    pub fn is_active(&self, kind: SinkKind) -> bool {
        self.sinks.contains(&kind)
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing all configuration values
    /// that were loaded.
    pub fn log_config(&self) {
        // ---
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.as_str()).collect();

        tracing::info!("Configuration loaded:");
        tracing::info!("  PIPELINE_SINKS         : {}", sinks.join(","));
        if let Some(db_url) = &self.db_url {
            tracing::info!("  DATABASE_URL           : {}", mask_db_url(db_url));
        }
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  OBJECT_STORE_ENDPOINTS : {}", self.object_store.endpoints.join(","));
        tracing::info!("  OBJECT_STORE_BUCKET    : {}", self.object_store.bucket);
        tracing::info!("  LOCAL_FALLBACK_ROOT    : {}", self.local_root.display());
        tracing::info!("  SENSOR_IDS             : {}", self.sensor_ids.join(","));
        tracing::info!("  CYCLE_INTERVAL_SECS    : {}", self.cycle_interval.as_secs());
        tracing::info!("  MODEL_PATH             : {}", self.model_path.display());
        tracing::info!("  CONTAMINATION          : {}", self.model.contamination);
        tracing::info!("  MODEL_SEED             : {}", self.model.forest.seed);
        tracing::info!("  TRAINING_SAMPLES       : {}", self.training_samples);
        tracing::info!("  SIMULATED_ANOMALY_RATE : {}", self.simulated_anomaly_rate);
        match self.status_addr {
            Some(addr) => tracing::info!("  STATUS_ADDR            : {}", addr),
            None => tracing::info!("  STATUS_ADDR            : off"),
        }
    }
}

/// Mask the password in a database URL for logging.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    let authority_start = db_url.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[authority_start..at_pos].rfind(':') {
            let colon_pos = authority_start + colon_pos;
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
