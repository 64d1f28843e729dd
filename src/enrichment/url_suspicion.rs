//! URL suspicion heuristics
//!
//! Deterministic denylist scoring: the same URL against the same denylist
//! version always produces the same score. The step records a recommended
//! confidence delta; applying it is the deduplicator's job.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use url::Url;

use crate::enrichment::{EnrichmentStep, StepUnavailable};
use crate::models::{Ioc, IocType};

/// Bumped whenever the extension or keyword lists change.
pub const DENYLIST_VERSION: &str = "2024.2";

const SUSPICIOUS_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".cmd", ".scr", ".pif", ".vbs", ".js", ".jar", ".msi", ".ps1", ".zip",
    ".rar", ".7z",
];

const SUSPICIOUS_PORTS: &[u16] = &[8080, 8443, 9999];

/// Hosts beyond this many labels look like generated subdomain chains.
const MAX_SUBDOMAIN_DEPTH: usize = 3;

const MAX_URL_LENGTH: usize = 200;

pub struct UrlSuspicionStep {
    keywords: Regex,
    shorteners: Regex,
}

impl UrlSuspicionStep {
    pub fn new() -> Self {
        Self {
            keywords: Regex::new(
                r"(?i)\b(download|install|update|urgent|click|verify|confirm|free|crack|keygen)\b",
            )
            .expect("keyword pattern is valid"),
            shorteners: Regex::new(r"(?i)\b(bit\.ly|tinyurl\.com|t\.co|goo\.gl)\b")
                .expect("shortener pattern is valid"),
        }
    }

    /// Score a canonical URL; returns the score and the matched indicators.
    fn score(&self, value: &str) -> (f64, Vec<String>) {
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();

        if let Some(ext) = SUSPICIOUS_EXTENSIONS.iter().find(|ext| value.ends_with(*ext)) {
            score += 0.3;
            indicators.push(format!("suspicious_extension:{ext}"));
        }
        if self.keywords.is_match(value) {
            score += 0.2;
            indicators.push("suspicious_keyword".to_string());
        }
        if self.shorteners.is_match(value) {
            score += 0.2;
            indicators.push("url_shortener".to_string());
        }
        if value.len() > MAX_URL_LENGTH {
            score += 0.1;
            indicators.push("long_url".to_string());
        }

        match Url::parse(value) {
            Ok(url) => {
                match url.host() {
                    Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => {
                        score += 0.4;
                        indicators.push("ip_literal_host".to_string());
                    }
                    Some(url::Host::Domain(domain)) => {
                        if domain.split('.').count() > MAX_SUBDOMAIN_DEPTH + 1 {
                            score += 0.2;
                            indicators.push("deep_subdomain".to_string());
                        }
                    }
                    None => {}
                }
                if let Some(port) = url.port() {
                    if SUSPICIOUS_PORTS.contains(&port) {
                        score += 0.1;
                        indicators.push(format!("suspicious_port:{port}"));
                    }
                }
            }
            Err(_) => {
                score += 0.3;
                indicators.push("malformed_url".to_string());
            }
        }

        (score.min(1.0), indicators)
    }
}

impl Default for UrlSuspicionStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichmentStep for UrlSuspicionStep {
    fn name(&self) -> &'static str {
        "url_suspicion"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(ioc_type, IocType::Url)
    }

    async fn apply(&self, ioc: &Ioc) -> Result<Value, StepUnavailable> {
        let (score, indicators) = self.score(&ioc.value);
        let confidence_delta = if score > 0.5 { 0.1 } else { 0.0 };
        Ok(json!({
            "score": score,
            "indicators": indicators,
            "denylist_version": DENYLIST_VERSION,
            "confidence_delta": confidence_delta,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_of(value: &str) -> (f64, Vec<String>) {
        UrlSuspicionStep::new().score(value)
    }

    #[test]
    fn executable_download_scores_high() {
        let (score, indicators) = score_of("http://203.0.113.9/update/payload.exe");
        assert!(score > 0.5, "got {score}");
        assert!(indicators.iter().any(|i| i.starts_with("suspicious_extension")));
        assert!(indicators.contains(&"ip_literal_host".to_string()));
    }

    #[test]
    fn plain_page_scores_zero() {
        let (score, indicators) = score_of("http://example.com/about");
        assert_eq!(score, 0.0);
        assert!(indicators.is_empty());
    }

    #[test]
    fn deep_subdomain_chain_is_flagged() {
        let (_, indicators) = score_of("http://a.b.c.d.example.com/x");
        assert!(indicators.contains(&"deep_subdomain".to_string()));
    }

    #[test]
    fn suspicious_port_is_flagged() {
        let (_, indicators) = score_of("http://evil.example:8080/x");
        assert!(indicators.contains(&"suspicious_port:8080".to_string()));
    }

    #[test]
    fn scoring_is_deterministic() {
        let value = "http://bit.ly/free-crack.zip";
        assert_eq!(score_of(value), score_of(value));
    }

    #[test]
    fn score_is_clamped_to_one() {
        let long_path = "a".repeat(250);
        let (score, _) = score_of(&format!(
            "http://198.51.100.1:8080/download/free/crack/keygen/{long_path}.exe"
        ));
        assert!(score <= 1.0);
    }

    #[tokio::test]
    async fn delta_recommended_only_above_threshold() {
        let step = UrlSuspicionStep::new();
        let seen = chrono::Utc::now();
        let make = |value: &str| crate::models::Ioc {
            id: crate::models::ioc_id(IocType::Url, value),
            value: value.into(),
            ioc_type: IocType::Url,
            category: None,
            sources: vec![crate::models::SourceRef {
                name: "digitalside".into(),
                url: None,
                first_seen: seen,
                last_updated: seen,
                confidence: 0.8,
            }],
            first_seen: seen,
            last_updated: seen,
            confidence: 0.8,
            metadata: Default::default(),
        };
        let hot = step.apply(&make("http://203.0.113.9/drop.exe")).await.unwrap();
        assert_eq!(hot["confidence_delta"], 0.1);
        let cold = step.apply(&make("http://example.com/about")).await.unwrap();
        assert_eq!(cold["confidence_delta"], 0.0);
    }
}
