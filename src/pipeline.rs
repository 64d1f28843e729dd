//! Pipeline orchestration
//!
//! Normalize and enrich records feed by feed in parallel tasks, then resolve
//! the whole candidate set in a single deduplication pass. The previously
//! committed set is an explicit input, never ambient state, so re-running on
//! identical raw inputs reproduces the committed set byte for byte.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dedup::{ContractViolation, Deduplicator};
use crate::enrichment::Enricher;
use crate::models::{FeedCounts, Ioc, RawRecord, RunResult, RunStats};
use crate::normalize::{NormalizeError, Normalizer};

/// Caller-issued cancellation. Takes effect between per-record tasks and
/// before the deduplication phase, never mid-merge.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run cancelled before commit")]
    Cancelled,
    #[error("feed worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

pub struct Pipeline {
    normalizer: Arc<Normalizer>,
    enricher: Arc<Enricher>,
    dedup: Deduplicator,
    /// At most one deduplication/commit in flight across concurrent runs.
    run_gate: Mutex<()>,
}

impl Pipeline {
    pub fn new(normalizer: Normalizer, enricher: Enricher) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            enricher: Arc::new(enricher),
            dedup: Deduplicator::new(),
            run_gate: Mutex::new(()),
        }
    }

    /// Push every feed's records through normalize and enrich, then collapse
    /// the candidates (prior committed set included) in one dedup pass.
    ///
    /// Malformed records are counted and reported, never fatal; the only
    /// errors are cancellation and upstream contract violations.
    pub async fn run(
        &self,
        batches: BTreeMap<String, Vec<RawRecord>>,
        prior: &[Ioc],
        cancel: &CancelToken,
    ) -> Result<RunResult, PipelineError> {
        let _gate = self.run_gate.lock().await;
        let started_at = Utc::now();

        let mut workers = Vec::with_capacity(batches.len());
        for (feed_id, records) in batches {
            let normalizer = self.normalizer.clone();
            let enricher = self.enricher.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                let mut counts = FeedCounts {
                    fetched: records.len(),
                    ..Default::default()
                };
                let mut iocs = Vec::new();
                let mut errors = Vec::new();
                for record in &records {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match normalizer.normalize(record) {
                        Ok(ioc) => {
                            counts.normalized += 1;
                            iocs.push(enricher.enrich(ioc).await);
                        }
                        Err(err) => {
                            tracing::debug!(feed = %record.feed_id, error = %err, "record rejected");
                            counts.rejected += 1;
                            errors.push(err);
                        }
                    }
                }
                (feed_id, iocs, counts, errors)
            }));
        }

        let mut candidates: Vec<Ioc> = prior.to_vec();
        let mut feeds: BTreeMap<String, FeedCounts> = BTreeMap::new();
        let mut errors: Vec<NormalizeError> = Vec::new();
        for joined in join_all(workers).await {
            let (feed_id, iocs, counts, feed_errors) =
                joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
            candidates.extend(iocs);
            feeds.insert(feed_id, counts);
            errors.extend(feed_errors);
        }

        if cancel.is_cancelled() {
            tracing::info!("run cancelled before deduplication");
            return Err(PipelineError::Cancelled);
        }

        let candidates_in = candidates.len();
        let iocs = self.dedup.deduplicate(candidates)?;

        for (feed_id, counts) in feeds.iter_mut() {
            counts.contributed = iocs.iter().filter(|ioc| ioc.has_source(feed_id)).count();
        }

        let stats = RunStats {
            started_at,
            finished_at: Utc::now(),
            candidates_in,
            committed_out: iocs.len(),
            feeds,
        };
        tracing::info!(
            candidates = candidates_in,
            committed = stats.committed_out,
            rejected = errors.len(),
            "pipeline run complete"
        );

        Ok(RunResult {
            run_id: Uuid::new_v4(),
            iocs,
            stats,
            errors,
        })
    }
}
