//! Geolocation enrichment
//!
//! Lookups go through the `GeoResolver` capability trait: a MaxMind database
//! reader for deployments that ship one, or a static JSON reference table
//! otherwise. A miss records `"unknown"`; a resolver with no data behind it
//! makes the step degrade to `"unavailable"`.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use maxminddb::{geoip2, Reader};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::enrichment::{EnrichmentStep, StepUnavailable};
use crate::models::{Ioc, IocType};

/// Country/ASN facts attached to an address
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub as_org: Option<String>,
}

/// Capability interface for address geolocation
#[cfg_attr(test, mockall::automock)]
pub trait GeoResolver: Send + Sync {
    /// Whether the resolver has any data behind it.
    fn available(&self) -> bool;

    /// Resolve an address; `None` on lookup miss.
    fn resolve(&self, ip: IpAddr) -> Option<GeoInfo>;
}

/// MaxMind mmdb-backed resolver
pub struct MaxMindResolver {
    city_reader: Option<Reader<Vec<u8>>>,
    asn_reader: Option<Reader<Vec<u8>>>,
}

impl MaxMindResolver {
    pub fn open(city_db_path: Option<&Path>, asn_db_path: Option<&Path>) -> Result<Self> {
        let city_reader = match city_db_path {
            Some(path) if path.exists() => Some(
                Reader::open_readfile(path).context("failed to open GeoIP city database")?,
            ),
            Some(path) => {
                tracing::warn!(path = %path.display(), "GeoIP city database not found");
                None
            }
            None => None,
        };
        let asn_reader = match asn_db_path {
            Some(path) if path.exists() => {
                Some(Reader::open_readfile(path).context("failed to open GeoIP ASN database")?)
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "GeoIP ASN database not found");
                None
            }
            None => None,
        };
        Ok(Self {
            city_reader,
            asn_reader,
        })
    }
}

impl GeoResolver for MaxMindResolver {
    fn available(&self) -> bool {
        self.city_reader.is_some() || self.asn_reader.is_some()
    }

    fn resolve(&self, ip: IpAddr) -> Option<GeoInfo> {
        let mut info = GeoInfo::default();

        if let Some(ref reader) = self.city_reader {
            if let Ok(city) = reader.lookup::<geoip2::City>(ip) {
                if let Some(country) = city.country {
                    info.country = country.iso_code.map(|s| s.to_string());
                }
            }
        }

        if let Some(ref reader) = self.asn_reader {
            if let Ok(asn) = reader.lookup::<geoip2::Asn>(ip) {
                info.asn = asn.autonomous_system_number;
                info.as_org = asn.autonomous_system_organization.map(|s| s.to_string());
            }
        }

        if info.country.is_none() && info.asn.is_none() {
            None
        } else {
            Some(info)
        }
    }
}

/// Static reference-table resolver, loadable from a JSON file mapping
/// networks to facts. Serves as the local mock database for deployments
/// without a MaxMind subscription and for deterministic tests.
pub struct TableResolver {
    entries: Vec<(IpNetwork, GeoInfo)>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    network: String,
    #[serde(flatten)]
    info: GeoInfo,
}

impl TableResolver {
    pub fn new(entries: Vec<(IpNetwork, GeoInfo)>) -> Self {
        Self { entries }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read geo table {}", path.display()))?;
        let rows: Vec<TableEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse geo table {}", path.display()))?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let network: IpNetwork = row
                .network
                .parse()
                .with_context(|| format!("invalid network {:?} in geo table", row.network))?;
            entries.push((network, row.info));
        }
        Ok(Self { entries })
    }
}

impl GeoResolver for TableResolver {
    fn available(&self) -> bool {
        !self.entries.is_empty()
    }

    fn resolve(&self, ip: IpAddr) -> Option<GeoInfo> {
        self.entries
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(_, info)| info.clone())
    }
}

/// The `geolocation` enrichment step for `ip` and `cidr` indicators
pub struct GeoLookupStep {
    resolver: Arc<dyn GeoResolver>,
}

impl GeoLookupStep {
    pub fn new(resolver: Arc<dyn GeoResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl EnrichmentStep for GeoLookupStep {
    fn name(&self) -> &'static str {
        "geolocation"
    }

    fn supports(&self, ioc_type: IocType) -> bool {
        matches!(ioc_type, IocType::Ip | IocType::Cidr)
    }

    async fn apply(&self, ioc: &Ioc) -> Result<Value, StepUnavailable> {
        if !self.resolver.available() {
            return Err(StepUnavailable {
                step: "geolocation",
                reason: "no geolocation data configured".into(),
            });
        }
        // For a cidr, resolve its network address.
        let addr = ioc.value.split('/').next().unwrap_or(&ioc.value);
        let ip: IpAddr = addr.parse().map_err(|_| StepUnavailable {
            step: "geolocation",
            reason: format!("indicator value {:?} is not an address", ioc.value),
        })?;

        match self.resolver.resolve(ip) {
            Some(info) => Ok(json!({
                "country": info.country,
                "asn": info.asn,
                "as_org": info.as_org,
            })),
            None => Ok(Value::String("unknown".into())),
        }
    }
}
