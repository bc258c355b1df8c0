//! S3-compatible object-store sink (MinIO in development).
//!
//! At startup each configured endpoint is tried in order and the first one
//! that answers a bucket listing is adopted. When none answers the sink is
//! disabled for the lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use ::object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use ::object_store::path::Path as ObjectPath;
use ::object_store::{ClientOptions, ObjectStore, PutMode, PutPayload, RetryConfig};
use async_trait::async_trait;

use super::layout::{object_key, TierDocument};
use super::{Sink, SinkConnectionError, SinkState, SinkWriteError, SinkWriteOutcome};
use crate::config::ObjectStoreSettings;
use crate::models::{Classification, Reading};
use crate::router::TierDecision;

// ---

pub const SINK_NAME: &str = "object_store";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A candidate backend and the label it is logged under.
pub type Candidate = (String, Arc<dyn ObjectStore>);

struct Connected {
    store: Arc<dyn ObjectStore>,
    endpoint: String,
}

pub struct ObjectStoreSink {
    state: SinkState<Connected>,
}

impl ObjectStoreSink {
    // ---
    /// Build one S3 client per configured endpoint and adopt the first that
    /// passes the health probe.
    pub async fn connect_s3(settings: &ObjectStoreSettings) -> Self {
        // ---
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut attempts = Vec::new();

        for endpoint in &settings.endpoints {
            match build_s3(settings, endpoint) {
                Ok(store) => candidates.push((endpoint.clone(), store)),
                Err(e) => attempts.push(format!("{endpoint}: {e}")),
            }
        }

        Self::connect_with(candidates, attempts).await
    }

    /// Probe `candidates` in order and adopt the first healthy one.
    pub async fn connect(candidates: Vec<Candidate>) -> Self {
        Self::connect_with(candidates, Vec::new()).await
    }

    async fn connect_with(candidates: Vec<Candidate>, mut attempts: Vec<String>) -> Self {
        // ---
        for (endpoint, store) in candidates {
            tracing::info!("Trying object store endpoint: {}", endpoint);

            match probe(store.as_ref()).await {
                Ok(()) => {
                    tracing::info!("Connected to object store at {}", endpoint);
                    return Self {
                        state: SinkState::Enabled(Connected { store, endpoint }),
                    };
                }
                Err(reason) => {
                    tracing::warn!("Object store endpoint {} failed probe: {}", endpoint, reason);
                    attempts.push(format!("{endpoint}: {reason}"));
                }
            }
        }

        let err = SinkConnectionError {
            sink: SINK_NAME,
            attempts,
        };
        tracing::error!("Object store sink disabled for this run: {}", err);

        Self {
            state: SinkState::Disabled {
                reason: err.to_string(),
            },
        }
    }

    /// Endpoint adopted at startup, if any.
    pub fn endpoint(&self) -> Option<&str> {
        self.state.connection().ok().map(|c| c.endpoint.as_str())
    }

    async fn put_tiers(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> Result<(), SinkWriteError> {
        // ---
        let conn = self.state.connection()?;

        for tier in decision.tiers() {
            let key = ObjectPath::from(object_key(tier, reading));
            let body = TierDocument::new(tier, reading, classification).to_json()?;

            // Create-only: an existing key fails the write rather than being replaced.
            conn.store
                .put_opts(&key, PutPayload::from(body), PutMode::Create.into())
                .await?;
            tracing::trace!("Uploaded {}", key);
        }
        Ok(())
    }
}

fn build_s3(
    settings: &ObjectStoreSettings,
    endpoint: &str,
) -> Result<Arc<dyn ObjectStore>, ::object_store::Error> {
    // ---
    let retry = RetryConfig {
        max_retries: 1,
        retry_timeout: PROBE_TIMEOUT,
        ..RetryConfig::default()
    };

    let store = AmazonS3Builder::new()
        .with_endpoint(endpoint)
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.region)
        .with_access_key_id(&settings.access_key)
        .with_secret_access_key(&settings.secret_key)
        .with_allow_http(true)
        .with_conditional_put(S3ConditionalPut::ETagMatch)
        .with_retry(retry)
        .with_client_options(ClientOptions::new().with_connect_timeout(PROBE_TIMEOUT))
        .build()?;

    Ok(Arc::new(store))
}

/// Cheap listing of the bucket root.
async fn probe(store: &dyn ObjectStore) -> Result<(), String> {
    // ---
    match tokio::time::timeout(PROBE_TIMEOUT, store.list_with_delimiter(None)).await {
        Ok(Ok(listing)) => {
            tracing::debug!(
                "Probe listed {} prefixes at bucket root",
                listing.common_prefixes.len()
            );
            Ok(())
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no response within {:?}", PROBE_TIMEOUT)),
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    // ---
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    async fn write(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> SinkWriteOutcome {
        // ---
        let result = self.put_tiers(decision, reading, classification).await;
        SinkWriteOutcome::from_result(SINK_NAME, result)
    }

    async fn close(&self) {
        if let Some(endpoint) = self.endpoint() {
            tracing::info!("Releasing object store client for {}", endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::router::{route, Tier};
    use ::object_store::memory::InMemory;
    use chrono::{TimeZone, Utc};

    fn unreachable_settings() -> ObjectStoreSettings {
        // ---
        ObjectStoreSettings {
            // Port 1 on loopback refuses connections immediately.
            endpoints: vec!["http://127.0.0.1:1".into()],
            bucket: "iot-lake".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            region: "us-east-1".into(),
        }
    }

    #[tokio::test]
    async fn test_adopts_first_healthy_candidate() {
        // ---
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let sink = ObjectStoreSink::connect(vec![("memory://lake".into(), store.clone())]).await;
        assert!(sink.is_enabled());
        assert_eq!(sink.endpoint(), Some("memory://lake"));

        let reading = Reading::new(
            "sensor_004",
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
            23.0,
            50.0,
        );
        let decision = route(Classification::Normal);
        let outcome = sink.write(&decision, &reading, Classification::Normal).await;
        assert!(outcome.succeeded(), "{:?}", outcome.error);

        for tier in decision.tiers() {
            let key = ObjectPath::from(object_key(tier, &reading));
            let bytes = store.get(&key).await.unwrap().bytes().await.unwrap();
            let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(doc["sensor_id"], "sensor_004");
        }
    }

    #[tokio::test]
    async fn test_existing_key_is_not_overwritten() {
        // ---
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let sink = ObjectStoreSink::connect(vec![("memory://lake".into(), store.clone())]).await;
        let decision = route(Classification::Normal);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();

        let first = Reading::new("sensor_004", at, 23.0, 50.0);
        let second = Reading::new("sensor_004", at, 26.0, 44.0);
        assert!(sink.write(&decision, &first, Classification::Normal).await.succeeded());

        let outcome = sink.write(&decision, &second, Classification::Normal).await;
        assert!(!outcome.succeeded());
        assert!(!outcome.is_disabled());

        let key = ObjectPath::from(object_key(Tier::Bronze, &first));
        let bytes = store.get(&key).await.unwrap().bytes().await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["temperature"], 23.0);
    }

    #[tokio::test]
    async fn test_no_candidates_disables_sink() {
        // ---
        let sink = ObjectStoreSink::connect(Vec::new()).await;
        assert!(!sink.is_enabled());
        assert_eq!(sink.endpoint(), None);

        let reading = Reading::new("sensor_001", Utc::now(), 22.0, 55.0);
        let outcome = sink
            .write(&route(Classification::Normal), &reading, Classification::Normal)
            .await;
        assert!(outcome.is_disabled());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_disables_sink() {
        // ---
        let sink = ObjectStoreSink::connect_s3(&unreachable_settings()).await;
        assert!(!sink.is_enabled());

        let reading = Reading::new("sensor_001", Utc::now(), 95.0, 8.0);
        let outcome = sink
            .write(&route(Classification::Anomalous), &reading, Classification::Anomalous)
            .await;
        assert!(!outcome.succeeded());
        assert!(outcome.is_disabled());
    }
}
