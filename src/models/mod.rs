//! Core data models for the feed processing pipeline

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

/// Types of Indicators of Compromise
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IocType {
    Ip,
    Cidr,
    Url,
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IocType::Ip => write!(f, "ip"),
            IocType::Cidr => write!(f, "cidr"),
            IocType::Url => write!(f, "url"),
        }
    }
}

/// Stable identifier for an indicator, derived from its type and
/// canonical value. Repeated runs produce the same id for the same
/// indicator regardless of insertion order.
pub fn ioc_id(ioc_type: IocType, value: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", ioc_type, value).as_bytes());
    hex::encode(digest)
}

/// One feed's contribution to an indicator.
///
/// `confidence` is the feed's baseline prior at the time the source
/// contributed; the merged indicator confidence is recomputed from these
/// per-source values so the combination stays a pure function of the set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub name: String,
    pub url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub confidence: f64,
}

/// Canonical indicator record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ioc {
    pub id: String,
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub category: Option<String>,
    /// Contributing feeds, sorted by name, unique per name. Grows under
    /// merge, never shrinks, never empty.
    pub sources: Vec<SourceRef>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub confidence: f64,
    /// Enrichment results keyed by step name. Additive only.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Ioc {
    /// Highest baseline confidence among contributing sources.
    pub fn peak_confidence(&self) -> f64 {
        self.sources
            .iter()
            .map(|s| s.confidence)
            .fold(0.0, f64::max)
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name == name)
    }
}

/// Feed-native record handed over by an ingestion adapter.
///
/// Consumed once by the normalizer, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub feed_id: String,
    pub raw_value: String,
    #[serde(default)]
    pub feed_metadata: BTreeMap<String, serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Per-feed counters reported after a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedCounts {
    pub fetched: usize,
    pub normalized: usize,
    pub rejected: usize,
    /// Indicators in the committed set that carry this feed as a source.
    pub contributed: usize,
}

/// Run-level statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates_in: usize,
    pub committed_out: usize,
    pub feeds: BTreeMap<String, FeedCounts>,
}

/// Result of one pipeline run, handed to the storage gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub iocs: Vec<Ioc>,
    pub stats: RunStats,
    pub errors: Vec<crate::normalize::NormalizeError>,
}

/// Query parameters for listing indicators
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct IocFilter {
    #[serde(rename = "type")]
    pub ioc_type: Option<IocType>,
    pub source: Option<String>,
    pub min_confidence: Option<f64>,
    #[validate(range(min = 1))]
    pub page: Option<usize>,
    #[validate(range(min = 1, max = 1000))]
    pub per_page: Option<usize>,
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}
