//! Threat intelligence feed collectors (ingestion adapters)
//!
//! All network I/O lives here. Adapters do the byte-level parsing of each
//! feed's format and hand the pipeline feed-native raw records; strict value
//! validation belongs to the normalizer so malformed lines get counted there.

pub mod blocklist_de;
pub mod digitalside;
pub mod spamhaus;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::RawRecord;

/// Trait for feed collectors
#[async_trait]
pub trait FeedCollector: Send + Sync {
    /// Feed id; doubles as the provenance source name.
    fn feed_id(&self) -> &'static str;

    /// Fetch the feed and parse it into raw records.
    async fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Outcome of polling one feed. A failed fetch carries an error marker and
/// an empty batch instead of discarding the whole run.
#[derive(Debug)]
pub struct FeedPoll {
    pub feed_id: String,
    pub records: Vec<RawRecord>,
    pub error: Option<String>,
}

/// Poll every configured feed, converting per-feed failures into markers.
pub async fn poll_all(collectors: &[Arc<dyn FeedCollector>]) -> Vec<FeedPoll> {
    let mut polls = Vec::with_capacity(collectors.len());
    for collector in collectors {
        let feed_id = collector.feed_id().to_string();
        match collector.fetch().await {
            Ok(records) => {
                tracing::info!(feed = %feed_id, records = records.len(), "feed fetched");
                polls.push(FeedPoll {
                    feed_id,
                    records,
                    error: None,
                });
            }
            Err(err) => {
                tracing::error!(feed = %feed_id, error = %err, "feed fetch failed");
                polls.push(FeedPoll {
                    feed_id,
                    records: vec![],
                    error: Some(err.to_string()),
                });
            }
        }
    }
    polls
}
