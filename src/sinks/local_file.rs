//! Local filesystem fallback sink.
//!
//! Mirrors the object-store key layout under a root directory, one JSON file
//! per tier copy. No network dependency; only filesystem errors can fail it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::layout::{object_key, TierDocument};
use super::{Sink, SinkState, SinkWriteError, SinkWriteOutcome};
use crate::models::{Classification, Reading};
use crate::router::TierDecision;

// ---

pub const SINK_NAME: &str = "local_file";

pub struct LocalFileSink {
    state: SinkState<PathBuf>,
}

impl LocalFileSink {
    // ---
    /// Create the root directory and check it is writable. On failure the sink
    /// starts disabled and stays that way.
    pub async fn connect(root: impl AsRef<Path>) -> Self {
        // ---
        let root = root.as_ref().to_path_buf();

        let state = match probe(&root).await {
            Ok(()) => {
                tracing::info!("Local fallback sink ready at {}", root.display());
                SinkState::Enabled(root)
            }
            Err(e) => {
                let reason = format!("root {} unusable: {}", root.display(), e);
                tracing::error!("Local fallback sink disabled: {}", reason);
                SinkState::Disabled { reason }
            }
        };

        Self { state }
    }

    pub fn root(&self) -> Option<&Path> {
        self.state.connection().ok().map(PathBuf::as_path)
    }

    async fn write_tiers(
        &self,
        decision: &TierDecision,
        reading: &Reading,
        classification: Classification,
    ) -> Result<(), SinkWriteError> {
        // ---
        let root = self.state.connection()?;

        for tier in decision.tiers() {
            let path = root.join(object_key(tier, reading));
            let body = TierDocument::new(tier, reading, classification).to_json()?;

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            // `create_new` turns a key collision into a failed write.
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;
            file.write_all(&body).await?;
            file.flush().await?;
            tracing::trace!("Wrote {}", path.display());
        }
        Ok(())
    }
}

/// Create the root, then write and remove a marker file inside it.
async fn probe(root: &Path) -> std::io::Result<()> {
    // ---
    fs::create_dir_all(root).await?;

    let marker = root.join(format!(".probe-{}", uuid::Uuid::new_v4()));
    fs::write(&marker, b"probe").await?;
    fs::remove_file(&marker).await
}

#[async_trait]
impl Sink for LocalFileSink {
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
        let result = self.write_tiers(decision, reading, classification).await;
        SinkWriteOutcome::from_result(SINK_NAME, result)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::router::{route, Tier};
    use chrono::{TimeZone, Utc};

    fn create_test_reading() -> Reading {
        // ---
        Reading::new(
            "sensor_003",
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
            101.5,
            4.0,
        )
    }

    #[tokio::test]
    async fn test_writes_bronze_and_refined_copy() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFileSink::connect(dir.path().join("lake")).await;
        assert!(sink.is_enabled());

        let reading = create_test_reading();
        let decision = route(Classification::Anomalous);
        let outcome = sink.write(&decision, &reading, Classification::Anomalous).await;
        assert!(outcome.succeeded(), "{:?}", outcome.error);

        let root = sink.root().unwrap();
        for tier in decision.tiers() {
            let path = root.join(object_key(tier, &reading));
            let body: serde_json::Value =
                serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            assert_eq!(body["tier"], tier.as_str());
            assert_eq!(body["classification"], "anomalous");
        }
        assert!(!root.join("silver").exists());
    }

    #[tokio::test]
    async fn test_probe_leaves_root_empty() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFileSink::connect(dir.path()).await;
        assert!(sink.is_enabled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_key_collision_fails_instead_of_overwriting() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFileSink::connect(dir.path()).await;
        let decision = route(Classification::Normal);

        let first = create_test_reading();
        let mut second = first.clone();
        second.temperature = 22.0;

        let outcome = sink.write(&decision, &first, Classification::Normal).await;
        assert!(outcome.succeeded(), "{:?}", outcome.error);

        // Same sensor, same millisecond: the stored copy must survive.
        let outcome = sink.write(&decision, &second, Classification::Normal).await;
        assert!(!outcome.succeeded());
        assert!(!outcome.is_disabled());

        let path = dir.path().join(object_key(Tier::Bronze, &first));
        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["temperature"], 101.5);
    }

    #[tokio::test]
    async fn test_similar_sensor_ids_are_stored_separately() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalFileSink::connect(dir.path()).await;
        let decision = route(Classification::Normal);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();

        for id in ["line/1", "line_1"] {
            let reading = Reading::new(id, at, 21.0, 50.0);
            let outcome = sink.write(&decision, &reading, Classification::Normal).await;
            assert!(outcome.succeeded(), "{id}: {:?}", outcome.error);
        }

        let files = walk(&dir.path().join("bronze")) + walk(&dir.path().join("silver"));
        assert_eq!(files, 4);
    }

    fn walk(path: &Path) -> usize {
        // ---
        if path.is_file() {
            return 1;
        }
        std::fs::read_dir(path)
            .unwrap()
            .map(|entry| walk(&entry.unwrap().path()))
            .sum()
    }

    #[tokio::test]
    async fn test_unusable_root_disables_without_io() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"occupied").unwrap();

        let sink = LocalFileSink::connect(&blocker).await;
        assert!(!sink.is_enabled());
        assert!(sink.root().is_none());

        // Clear the obstacle: a disabled sink must still not touch the disk.
        std::fs::remove_file(&blocker).unwrap();

        let reading = create_test_reading();
        let outcome = sink
            .write(&route(Classification::Normal), &reading, Classification::Normal)
            .await;

        assert!(!outcome.succeeded());
        assert!(outcome.is_disabled());
        assert!(!blocker.exists());
    }
}
