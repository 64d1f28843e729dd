//! Flat-file storage gateway
//!
//! The pipeline core hands over abstract indicator entities; this layer owns
//! the persistence format. The committed set is written as JSON with a
//! timestamped backup per commit, and run statistics keep a bounded history.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Ioc, RunStats};

const COMMITTED_FILE: &str = "processed_iocs.json";
const STATS_FILE: &str = "processing_stats.json";
const STATS_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Snapshot of the committed indicator set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommittedSet {
    pub last_updated: Option<DateTime<Utc>>,
    pub total_iocs: usize,
    pub iocs: Vec<Ioc>,
}

/// Persistence gateway for the committed set and run statistics
#[async_trait]
pub trait IocStore: Send + Sync {
    async fn load(&self) -> Result<CommittedSet, StoreError>;
    async fn commit(&self, iocs: &[Ioc], stats: &RunStats) -> Result<(), StoreError>;
    async fn stats_history(&self) -> Result<Vec<RunStats>, StoreError>;
}

/// JSON flat-file store
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn committed_path(&self) -> PathBuf {
        self.data_dir.join(COMMITTED_FILE)
    }

    fn stats_path(&self) -> PathBuf {
        self.data_dir.join(STATS_FILE)
    }
}

#[async_trait]
impl IocStore for JsonFileStore {
    async fn load(&self) -> Result<CommittedSet, StoreError> {
        match tokio::fs::read_to_string(self.committed_path()).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no committed set on disk yet");
                Ok(CommittedSet::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn commit(&self, iocs: &[Ioc], stats: &RunStats) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let now = Utc::now();
        let set = CommittedSet {
            last_updated: Some(now),
            total_iocs: iocs.len(),
            iocs: iocs.to_vec(),
        };
        let encoded = serde_json::to_string_pretty(&set)?;
        tokio::fs::write(self.committed_path(), &encoded).await?;

        let backup = self
            .data_dir
            .join(format!("processed_iocs_backup_{}.json", now.format("%Y%m%d_%H%M%S")));
        tokio::fs::write(&backup, &encoded).await?;

        let mut history = self.stats_history().await.unwrap_or_default();
        history.push(stats.clone());
        if history.len() > STATS_HISTORY_LIMIT {
            let excess = history.len() - STATS_HISTORY_LIMIT;
            history.drain(..excess);
        }
        tokio::fs::write(self.stats_path(), serde_json::to_string_pretty(&history)?).await?;

        tracing::info!(
            iocs = iocs.len(),
            path = %self.committed_path().display(),
            "committed indicator set"
        );
        Ok(())
    }

    async fn stats_history(&self) -> Result<Vec<RunStats>, StoreError> {
        match tokio::fs::read_to_string(self.stats_path()).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ioc_id, FeedCounts, IocType, SourceRef};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn sample_ioc() -> Ioc {
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        Ioc {
            id: ioc_id(IocType::Ip, "192.0.2.1"),
            value: "192.0.2.1".into(),
            ioc_type: IocType::Ip,
            category: Some("brute_force".into()),
            sources: vec![SourceRef {
                name: "blocklist_de".into(),
                url: None,
                first_seen: seen,
                last_updated: seen,
                confidence: 0.9,
            }],
            first_seen: seen,
            last_updated: seen,
            confidence: 0.9,
            metadata: BTreeMap::new(),
        }
    }

    fn sample_stats() -> RunStats {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        RunStats {
            started_at: now,
            finished_at: now,
            candidates_in: 1,
            committed_out: 1,
            feeds: BTreeMap::from([(
                "blocklist_de".to_string(),
                FeedCounts {
                    fetched: 1,
                    normalized: 1,
                    rejected: 0,
                    contributed: 1,
                },
            )]),
        }
    }

    #[tokio::test]
    async fn empty_store_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let set = store.load().await.unwrap();
        assert!(set.iocs.is_empty());
        assert!(set.last_updated.is_none());
    }

    #[tokio::test]
    async fn commit_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let iocs = vec![sample_ioc()];
        store.commit(&iocs, &sample_stats()).await.unwrap();

        let set = store.load().await.unwrap();
        assert_eq!(set.total_iocs, 1);
        assert_eq!(set.iocs, iocs);
        assert!(set.last_updated.is_some());
    }

    #[tokio::test]
    async fn commit_appends_stats_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.commit(&[], &sample_stats()).await.unwrap();
        store.commit(&[], &sample_stats()).await.unwrap();
        let history = store.stats_history().await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn commit_writes_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.commit(&[sample_ioc()], &sample_stats()).await.unwrap();
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("processed_iocs_backup_")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
