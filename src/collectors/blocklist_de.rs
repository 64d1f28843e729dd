//! Blocklist.de apache attacker list collector
//!
//! One IPv4 address per line, comments start with `#`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;

use crate::collectors::FeedCollector;
use crate::models::RawRecord;

pub const BLOCKLIST_DE_URL: &str = "https://lists.blocklist.de/lists/apache.txt";

pub struct BlocklistDeCollector {
    client: Client,
    url: String,
}

impl BlocklistDeCollector {
    pub fn new() -> Self {
        Self::with_url(BLOCKLIST_DE_URL.to_string())
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
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value = line.split_whitespace().next().unwrap_or(line);
            let mut feed_metadata = BTreeMap::new();
            feed_metadata.insert("raw_line".to_string(), json!(line));
            feed_metadata.insert("line_number".to_string(), json!(line_no + 1));
            records.push(RawRecord {
                feed_id: "blocklist_de".to_string(),
                raw_value: value.to_string(),
                feed_metadata,
                fetched_at,
            });
        }
        records
    }
}

impl Default for BlocklistDeCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedCollector for BlocklistDeCollector {
    fn feed_id(&self) -> &'static str {
        "blocklist_de"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch Blocklist.de list")?;
        if !response.status().is_success() {
            anyhow::bail!("Blocklist.de feed error: {}", response.status());
        }
        let body = response.text().await?;
        Ok(self.parse(&body, Utc::now()))
    }
}
