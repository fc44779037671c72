//! Network operator and geolocation resolution
//!
//! The primary address is looked up once in a live intelligence service. When
//! that fails or is inconclusive (no operator name or country), the address
//! is matched against a static table of known ranges, most specific prefix
//! first.
//!
//! The domestic flag is computed from two independent signals, the live
//! service's declared country and the static range table, and is the OR of
//! both. It never depends on operator-name heuristics.

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::chain::{Alternate, ChainOutcome, Outcome, ResolverChain};
use crate::error::SourceError;
use crate::http::HttpClient;
use crate::model::{HostAddress, OperatorInfo, OperatorSource, Reputation};
use crate::rate_limit::RateLimiter;

/// Normalised answer from an operator intelligence source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorLookup {
    pub asn: Option<u32>,
    pub name: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
}

impl OperatorLookup {
    /// Both an operator name and a country are known
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        self.name.is_some() && self.country_code.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    org: Option<String>,
    #[serde(rename = "as")]
    as_label: Option<String>,
}

/// The ip-api.com JSON endpoint, or any service with the same shape
pub struct IpApiService {
    endpoint_template: String,
    client: HttpClient,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl IpApiService {
    /// `endpoint_template` contains `{ip}`
    pub fn new(endpoint_template: &str, client: HttpClient) -> Self {
        Self {
            endpoint_template: endpoint_template.to_string(),
            client,
            rate_limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

#[async_trait]
impl Alternate<IpAddr, OperatorLookup> for IpApiService {
    fn name(&self) -> &str {
        "ip-api"
    }

    async fn attempt(&self, ip: &IpAddr) -> Result<OperatorLookup, SourceError> {
        let _permit = match &self.rate_limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| SourceError::unavailable(self.name(), e))?,
            ),
            None => None,
        };

        let url = self.endpoint_template.replace("{ip}", &ip.to_string());
        let document = self.client.get_json(self.name(), &url).await?;
        parse_ip_api(self.name(), document)
    }
}

/// Normalises an ip-api style document
pub fn parse_ip_api(source_name: &str, document: serde_json::Value) -> Result<OperatorLookup, SourceError> {
    let resp: IpApiResponse =
        serde_json::from_value(document).map_err(|e| SourceError::malformed(source_name, e))?;

    if resp.status != "success" {
        return Err(SourceError::rejected(
            source_name,
            resp.message.unwrap_or_else(|| resp.status.clone()),
        ));
    }

    let non_empty = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Ok(OperatorLookup {
        asn: resp.as_label.as_deref().and_then(parse_asn),
        name: non_empty(resp.isp).or_else(|| non_empty(resp.org)),
        country: non_empty(resp.country),
        country_code: non_empty(resp.country_code).map(|cc| cc.to_ascii_uppercase()),
        city: non_empty(resp.city),
    })
}

/// `"AS6471 ENTEL CHILE S.A."` → `6471`
pub fn parse_asn(label: &str) -> Option<u32> {
    let token = label.split_whitespace().next()?;
    let digits = token
        .strip_prefix("AS")
        .or_else(|| token.strip_prefix("as"))
        .unwrap_or(token);
    digits.parse().ok()
}

/// A known address range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    pub network: IpNet,
    pub operator: String,
    pub asn: Option<u32>,
    pub country: String,
    pub country_code: String,
}

/// `(cidr, operator, asn, country, country code)`
pub type RangeSpec = (&'static str, &'static str, Option<u32>, &'static str, &'static str);

const KNOWN_RANGES: &[RangeSpec] = &[
    ("200.27.0.0/16", "Entel Chile", None, "Chile", "CL"),
    ("190.160.0.0/12", "VTR Banda Ancha", None, "Chile", "CL"),
    ("104.16.0.0/13", "Cloudflare", Some(13335), "United States", "US"),
    ("172.64.0.0/13", "Cloudflare", Some(13335), "United States", "US"),
    ("2606:4700::/32", "Cloudflare", Some(13335), "United States", "US"),
    ("151.101.0.0/16", "Fastly", Some(54113), "United States", "US"),
    ("8.8.8.0/24", "Google", Some(15169), "United States", "US"),
];

/// Specificity-ordered table of known address ranges
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    entries: Vec<RangeEntry>,
}

impl RangeTable {
    /// The ranges shipped with the crate
    pub fn bundled() -> Self {
        Self::from_specs(KNOWN_RANGES)
    }

    pub fn from_specs(specs: &[RangeSpec]) -> Self {
        let entries = specs
            .iter()
            .filter_map(|(cidr, operator, asn, country, country_code)| match cidr.parse::<IpNet>() {
                Ok(network) => Some(RangeEntry {
                    network: network.trunc(),
                    operator: operator.to_string(),
                    asn: *asn,
                    country: country.to_string(),
                    country_code: country_code.to_string(),
                }),
                Err(e) => {
                    warn!("Skipping invalid range {}: {}", cidr, e);
                    None
                }
            })
            .collect();
        Self::from_entries(entries)
    }

    pub fn from_entries(mut entries: Vec<RangeEntry>) -> Self {
        // longest prefix first, so the first containing range is the most specific
        entries.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        Self { entries }
    }

    /// Most specific range containing `ip`
    pub fn lookup(&self, ip: IpAddr) -> Option<&RangeEntry> {
        self.entries.iter().find(|entry| entry.network.contains(&ip))
    }

    /// `ip` falls in a range registered to `home_country`
    pub fn is_domestic(&self, ip: IpAddr, home_country: &str) -> bool {
        self.lookup(ip)
            .is_some_and(|entry| entry.country_code.eq_ignore_ascii_case(home_country))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Complaint annotations keyed by `AS<number>` or lowercase operator name
#[derive(Debug, Clone, Default)]
pub struct ReputationTable {
    entries: HashMap<String, Reputation>,
}

impl ReputationTable {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, Reputation> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(key, reputation)| (normalize_key(&key), reputation))
            .collect();
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reputation table {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid reputation table {}", path.display()))
    }

    /// ASN match first, then operator name
    pub fn lookup(&self, asn: Option<u32>, operator: &str) -> Option<Reputation> {
        asn.and_then(|asn| self.entries.get(&format!("as{}", asn)))
            .or_else(|| self.entries.get(&normalize_key(operator)))
            .cloned()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// Resolves [`OperatorInfo`] for a primary address
pub struct OperatorResolver {
    chain: ResolverChain<IpAddr, OperatorLookup>,
    ranges: RangeTable,
    reputation: ReputationTable,
    home_country: String,
}

impl OperatorResolver {
    pub fn new(
        chain: ResolverChain<IpAddr, OperatorLookup>,
        ranges: RangeTable,
        reputation: ReputationTable,
        home_country: &str,
    ) -> Self {
        Self {
            chain,
            ranges,
            reputation,
            home_country: home_country.to_ascii_uppercase(),
        }
    }

    /// Operator details for `address`; an unresolved address makes no network call
    pub async fn resolve(&self, address: HostAddress) -> Outcome<OperatorInfo> {
        let Some(ip) = address.ip() else {
            debug!("No address to classify, skipping operator lookup");
            return Outcome::DefaultOnly(OperatorInfo::default());
        };

        let (live, live_error) = match self.chain.resolve(&ip, OperatorLookup::is_conclusive).await {
            ChainOutcome::Resolved { value, .. } => (Some(value), None),
            ChainOutcome::Exhausted {
                last_error, partial, ..
            } => (partial, Some(last_error)),
        };
        let range = self.ranges.lookup(ip);

        let mut info = OperatorInfo {
            address,
            ..Default::default()
        };

        match (&live, range) {
            (Some(lookup), _) if lookup.is_conclusive() => {
                apply_lookup(&mut info, lookup);
                info.source = OperatorSource::Live;
            }
            (_, Some(entry)) => {
                info.asn = entry.asn;
                info.name = entry.operator.clone();
                info.country = entry.country.clone();
                info.country_code = entry.country_code.clone();
                if let Some(city) = live.as_ref().and_then(|l| l.city.clone()) {
                    info.city = city;
                }
                info.source = OperatorSource::StaticRange;
            }
            (Some(lookup), None) => {
                apply_lookup(&mut info, lookup);
                info.source = OperatorSource::Live;
            }
            (None, None) => {}
        }

        let live_domestic = live
            .as_ref()
            .and_then(|l| l.country_code.as_deref())
            .is_some_and(|cc| cc.eq_ignore_ascii_case(&self.home_country));
        let range_domestic = self.ranges.is_domestic(ip, &self.home_country);
        info.is_domestic = live_domestic || range_domestic;

        if info.source != OperatorSource::None {
            info.reputation = self.reputation.lookup(info.asn, &info.name);
        }

        debug!(
            "Operator for {}: {} ({}), domestic={} [live={}, range={}]",
            ip, info.name, info.country_code, info.is_domestic, live_domestic, range_domestic
        );

        match (info.source, live_error) {
            (OperatorSource::Live, None) => Outcome::Success(info),
            (OperatorSource::None, None) => Outcome::DefaultOnly(info),
            (_, Some(cause)) => Outcome::Degraded { value: info, cause },
            (_, None) => Outcome::Success(info),
        }
    }
}

fn apply_lookup(info: &mut OperatorInfo, lookup: &OperatorLookup) {
    info.asn = lookup.asn;
    if let Some(name) = &lookup.name {
        info.name = name.clone();
    }
    if let Some(country) = &lookup.country {
        info.country = country.clone();
    }
    if let Some(cc) = &lookup.country_code {
        info.country_code = cc.clone();
    }
    if let Some(city) = &lookup.city {
        info.city = city.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_asn() {
        assert_eq!(parse_asn("AS6471 ENTEL CHILE S.A."), Some(6471));
        assert_eq!(parse_asn("13335"), Some(13335));
        assert_eq!(parse_asn(""), None);
        assert_eq!(parse_asn("Cloudflare"), None);
    }

    #[test]
    fn test_bundled_ranges_parse() {
        let table = RangeTable::bundled();
        assert_eq!(table.len(), KNOWN_RANGES.len());
        assert!(table.is_domestic("200.27.1.1".parse().unwrap(), "CL"));
        assert!(!table.is_domestic("104.16.1.1".parse().unwrap(), "CL"));
    }
}
