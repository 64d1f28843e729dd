//! Raw record normalization
//!
//! Maps a feed-native record into the canonical indicator shape: classify the
//! value, canonicalize it, attach provenance and the feed's baseline
//! confidence. Pure with respect to its input; malformed records are skipped
//! and counted by the caller, never aborting a batch.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::FeedRegistry;
use crate::models::{ioc_id, Ioc, IocType, RawRecord, SourceRef};

/// Failure to map a raw record into a canonical indicator
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NormalizeError {
    #[error("unrecognized format for {raw_value:?} from feed {feed_id}")]
    UnrecognizedFormat { feed_id: String, raw_value: String },
}

pub struct Normalizer {
    registry: Arc<FeedRegistry>,
}

impl Normalizer {
    pub fn new(registry: Arc<FeedRegistry>) -> Self {
        Self { registry }
    }

    /// Produce a canonical indicator from one raw record.
    pub fn normalize(&self, record: &RawRecord) -> Result<Ioc, NormalizeError> {
        let (ioc_type, value) = canonicalize(record.raw_value.trim()).ok_or_else(|| {
            NormalizeError::UnrecognizedFormat {
                feed_id: record.feed_id.clone(),
                raw_value: record.raw_value.clone(),
            }
        })?;

        let profile = self.registry.profile(&record.feed_id);
        let confidence = profile
            .map(|p| p.baseline_confidence)
            .unwrap_or(self.registry.default_confidence);
        let category = record
            .feed_metadata
            .get("category")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .or_else(|| profile.and_then(|p| p.category.clone()));

        let source = SourceRef {
            name: record.feed_id.clone(),
            url: profile.and_then(|p| p.url.clone()),
            first_seen: record.fetched_at,
            last_updated: record.fetched_at,
            confidence,
        };

        Ok(Ioc {
            id: ioc_id(ioc_type, &value),
            value,
            ioc_type,
            category,
            sources: vec![source],
            first_seen: record.fetched_at,
            last_updated: record.fetched_at,
            confidence,
            metadata: BTreeMap::new(),
        })
    }
}

/// Classify a raw value and return its canonical form. Also used by the
/// query layer to resolve lookups against stored canonical values.
pub fn canonicalize(raw: &str) -> Option<(IocType, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains("://") {
        return canonical_url(raw).map(|v| (IocType::Url, v));
    }
    if raw.contains('/') {
        return canonical_cidr(raw).map(|v| (IocType::Cidr, v));
    }
    raw.parse::<IpAddr>()
        .ok()
        .map(|ip| (IocType::Ip, ip.to_string()))
}

/// Reduce a CIDR to its network address plus prefix length, host bits zeroed.
fn canonical_cidr(raw: &str) -> Option<String> {
    let (addr, prefix) = raw.split_once('/')?;
    let ip: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let net = IpNetwork::new(ip, prefix).ok()?;
    Some(format!("{}/{}", net.network(), net.prefix()))
}

/// Reduce a URL to lower-cased scheme://host[:port]/path with default ports
/// removed, query and fragment dropped, and trailing slashes trimmed.
fn canonical_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let mut canonical = format!("{}://{}", url.scheme(), host);
    if let Some(port) = url.port() {
        canonical.push(':');
        canonical.push_str(&port.to_string());
    }
    let path = url.path().to_lowercase();
    canonical.push_str(path.trim_end_matches('/'));
    Some(canonical)
}
