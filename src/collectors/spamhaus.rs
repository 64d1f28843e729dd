//! Spamhaus DROP list collector
//!
//! Format: `CIDR ; SBLnnnnnn`, comments start with `;`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;

use crate::collectors::FeedCollector;
use crate::models::RawRecord;

pub const SPAMHAUS_DROP_URL: &str = "https://www.spamhaus.org/drop/drop.txt";

pub struct SpamhausCollector {
    client: Client,
    url: String,
}

impl SpamhausCollector {
    pub fn new() -> Self {
        Self::with_url(SPAMHAUS_DROP_URL.to_string())
    }

    pub fn with_url(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, url }
    }

    fn parse(&self, body: &str, fetched_at: DateTime<Utc>) -> Vec<RawRecord> {
        let mut records = vec![];
        for (line_no, line) in body.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let mut parts = line.splitn(2, ';');
            let value = parts.next().unwrap_or_default().trim();
            if value.is_empty() {
                continue;
            }
            let mut feed_metadata = BTreeMap::new();
            feed_metadata.insert("raw_line".to_string(), json!(line));
            feed_metadata.insert("line_number".to_string(), json!(line_no + 1));
            if let Some(sbl) = parts.next().map(str::trim).filter(|s| !s.is_empty()) {
                feed_metadata.insert("sbl_reference".to_string(), json!(sbl));
            }
            records.push(RawRecord {
                feed_id: "spamhaus".to_string(),
                raw_value: value.to_string(),
                feed_metadata,
                fetched_at,
            });
        }
        records
    }
}

impl Default for SpamhausCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedCollector for SpamhausCollector {
    fn feed_id(&self) -> &'static str {
        "spamhaus"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch Spamhaus DROP list")?;
        if !response.status().is_success() {
            anyhow::bail!("Spamhaus feed error: {}", response.status());
        }
        let body = response.text().await?;
        Ok(self.parse(&body, Utc::now()))
    }
}
