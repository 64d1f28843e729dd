//! Per-feed trust configuration
//!
//! Confidence priors and default categories live in a declared table rather
//! than in merge logic, so adding a feed or changing a trust level never
//! touches the pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Declared trust profile for one feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedProfile {
    /// Where the feed is served from, recorded as source provenance.
    pub url: Option<String>,
    /// Baseline confidence prior assigned to every record from this feed.
    pub baseline_confidence: f64,
    /// Default category when the adapter does not supply one per record.
    pub category: Option<String>,
}

/// Registry of feed profiles, keyed by feed id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRegistry {
    feeds: BTreeMap<String, FeedProfile>,
    /// Prior applied to feeds that have no declared profile.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl FeedRegistry {
    /// Built-in table for the feeds shipped with the service.
    pub fn builtin() -> Self {
        let mut feeds = BTreeMap::new();
        feeds.insert(
            "spamhaus".to_string(),
            FeedProfile {
                url: Some("https://www.spamhaus.org/drop/drop.txt".to_string()),
                baseline_confidence: 0.95,
                category: Some("botnet_range".to_string()),
            },
        );
        feeds.insert(
            "blocklist_de".to_string(),
            FeedProfile {
                url: Some("https://lists.blocklist.de/lists/apache.txt".to_string()),
                baseline_confidence: 0.90,
                category: Some("brute_force".to_string()),
            },
        );
        feeds.insert(
            "digitalside".to_string(),
            FeedProfile {
                url: Some(
                    "https://osint.digitalside.it/Threat-Intel/lists/latesturls.txt".to_string(),
                ),
                baseline_confidence: 0.80,
                category: Some("malicious_url".to_string()),
            },
        );
        Self {
            feeds,
            default_confidence: default_confidence(),
        }
    }

    /// Load a registry from a JSON file, for deployments that tune trust
    /// levels without rebuilding.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read feed registry {}", path.display()))?;
        let registry: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse feed registry {}", path.display()))?;
        Ok(registry)
    }

    pub fn profile(&self, feed_id: &str) -> Option<&FeedProfile> {
        self.feeds.get(feed_id)
    }

    pub fn baseline_confidence(&self, feed_id: &str) -> f64 {
        self.profile(feed_id)
            .map(|p| p.baseline_confidence)
            .unwrap_or(self.default_confidence)
    }

    pub fn feed_ids(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }
}
