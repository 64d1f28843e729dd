//! DigitalSide OSINT malicious URL feed collector
//!
//! One URL per line, comments start with `#`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use url::Url;

use crate::collectors::FeedCollector;
use crate::models::RawRecord;

pub const DIGITALSIDE_URL: &str = "https://osint.digitalside.it/Threat-Intel/lists/latesturls.txt";

pub struct DigitalSideCollector {
    client: Client,
    url: String,
}

impl DigitalSideCollector {
    pub fn new() -> Self {
        Self::with_url(DIGITALSIDE_URL.to_string())
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
            let mut feed_metadata = BTreeMap::new();
            feed_metadata.insert("raw_line".to_string(), json!(line));
            feed_metadata.insert("line_number".to_string(), json!(line_no + 1));
            if let Ok(parsed) = Url::parse(line) {
                if let Some(host) = parsed.host_str() {
                    feed_metadata.insert("host".to_string(), json!(host));
                }
                feed_metadata.insert("scheme".to_string(), json!(parsed.scheme()));
            }
            records.push(RawRecord {
                feed_id: "digitalside".to_string(),
                raw_value: line.to_string(),
                feed_metadata,
                fetched_at,
            });
        }
        records
    }
}

impl Default for DigitalSideCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedCollector for DigitalSideCollector {
    fn feed_id(&self) -> &'static str {
        "digitalside"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch DigitalSide URL list")?;
        if !response.status().is_success() {
            anyhow::bail!("DigitalSide feed error: {}", response.status());
        }
        let body = response.text().await?;
        Ok(self.parse(&body, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_urls_with_host_metadata() {
        let body = "# DigitalSide latest URLs\nhttp://evil.example/drop.exe\nhttps://bad.example/x\n";
        let records = DigitalSideCollector::new().parse(body, Utc::now());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].raw_value, "http://evil.example/drop.exe");
        assert_eq!(records[0].feed_metadata["host"], "evil.example");
        assert_eq!(records[1].feed_metadata["scheme"], "https");
    }

    #[tokio::test]
    async fn fetches_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latesturls.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("http://evil.example/drop.exe\n"),
            )
            .mount(&server)
            .await;

        let collector = DigitalSideCollector::with_url(format!("{}/latesturls.txt", server.uri()));
        let records = collector.fetch().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].feed_id, "digitalside");
    }
}
