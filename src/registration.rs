//! Registration (RDAP) retrieval through relay intermediaries
//!
//! Registries do not accept cross-origin calls from the presentation layer,
//! so RDAP documents are fetched through an ordered chain of relays. One
//! outer attempt runs every relay once; an attempt fails when all relays fail
//! or only return documents without a creation date, registrant, registrar or
//! expiration date. Failed attempts are retried after a linear delay
//! (2s × attempt by default) up to the attempt budget.
//!
//! When the budget is spent the retriever answers from the bundled static
//! snapshot, and failing that from a deterministic synthetic placeholder.
//! The three cases are distinguishable from [`Provenance`] and from the
//! [`Field`] states alone.
//!
//! Live answers are reused in-process for one hour.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{Alternate, Outcome, ResolverChain};
use crate::clock::Clock;
use crate::error::SourceError;
use crate::http::HttpClient;
use crate::model::{DnssecStatus, Field, Provenance, RegistrationInfo};
use crate::rate_limit::RateLimiter;
use crate::retry::{with_retry_policy, RetryPolicy};

/// Registrar value of a synthetic placeholder
pub const SYNTHETIC_REGISTRAR: &str = "unverified (synthetic placeholder)";

const BUNDLED_SNAPSHOT: &str = include_str!("../data/registration_snapshot.json");

/// Substrings of generic values returned by registry privacy shields
const PRIVACY_MARKERS: &[&str] = &[
    "redacted",
    "privacy",
    "data protected",
    "not disclosed",
    "withheld",
    "whoisguard",
    "domains by proxy",
    "gdpr masked",
    "statutory masking",
];

/// A CORS relay in front of an RDAP service
///
/// The URL template contains `{domain}`, e.g.
/// `https://api.allorigins.win/raw?url=https://rdap.org/domain/{domain}`.
pub struct RdapRelay {
    name: String,
    url_template: String,
    client: HttpClient,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl RdapRelay {
    pub fn new(url_template: &str, client: HttpClient) -> Self {
        Self {
            name: relay_name(url_template),
            url_template: url_template.to_string(),
            client,
            rate_limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    fn url_for(&self, domain: &str) -> String {
        self.url_template.replace("{domain}", domain)
    }
}

/// Host of the relay endpoint, used as the relay's name
fn relay_name(url_template: &str) -> String {
    reqwest::Url::parse(&url_template.replace("{domain}", "example.com"))
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| url_template.to_string())
}

#[async_trait]
impl Alternate<str, RegistrationInfo> for RdapRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, domain: &str) -> Result<RegistrationInfo, SourceError> {
        let _permit = match &self.rate_limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| SourceError::unavailable(self.name.as_str(), e))?,
            ),
            None => None,
        };

        let document = self.client.get_json(&self.name, &self.url_for(domain)).await?;
        parse_rdap(&self.name, &document)
    }
}

#[derive(Debug, Deserialize)]
struct RdapDomain {
    #[serde(rename = "objectClassName")]
    object_class_name: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<u16>,
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
    #[serde(default)]
    status: Vec<String>,
    #[serde(rename = "secureDNS")]
    secure_dns: Option<RdapSecureDns>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: String,
}

#[derive(Debug, Deserialize)]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(rename = "vcardArray")]
    vcard: Option<Value>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

#[derive(Debug, Deserialize)]
struct RdapSecureDns {
    #[serde(rename = "delegationSigned")]
    delegation_signed: Option<bool>,
}

/// Converts an RDAP domain document into [`RegistrationInfo`]
pub fn parse_rdap(source_name: &str, document: &Value) -> Result<RegistrationInfo, SourceError> {
    let rdap: RdapDomain = serde_json::from_value(document.clone())
        .map_err(|e| SourceError::malformed(source_name, e))?;

    if let Some(code) = rdap.error_code {
        return Err(SourceError::rejected(source_name, format!("RDAP error {}", code)));
    }
    match rdap.object_class_name.as_deref() {
        Some("domain") | None => {}
        Some(other) => {
            return Err(SourceError::malformed(
                source_name,
                format!("expected a domain object, got {}", other),
            ))
        }
    }

    let mut info = RegistrationInfo {
        provenance: Provenance::Live {
            relay: source_name.to_string(),
        },
        status: rdap.status,
        ..Default::default()
    };

    for event in &rdap.events {
        let field = match event.action.as_str() {
            "registration" => &mut info.created,
            "expiration" => &mut info.expires,
            "last changed" => &mut info.last_changed,
            _ => continue,
        };
        match DateTime::parse_from_rfc3339(&event.date) {
            Ok(date) => *field = Field::Known(date.with_timezone(&Utc)),
            Err(e) => debug!("{}: unparseable {} date {:?}: {}", source_name, event.action, event.date, e),
        }
    }

    if let Some(registrar) = find_entity(&rdap.entities, "registrar") {
        info.registrar = vcard_text(registrar, "fn").map(classify).unwrap_or_default();
    }
    if let Some(registrant) = find_entity(&rdap.entities, "registrant") {
        info.registrant_name = vcard_text(registrant, "fn").map(classify).unwrap_or_default();
        info.registrant_organization = vcard_text(registrant, "org").map(classify).unwrap_or_default();
        info.registrant_country = vcard_country(registrant).map(Field::Known).unwrap_or_default();
    }
    info.privacy_protected = info.registrant_name == Field::Redacted
        || info.registrant_organization == Field::Redacted;

    info.dnssec = match rdap.secure_dns.and_then(|s| s.delegation_signed) {
        Some(true) => DnssecStatus::Signed,
        Some(false) => DnssecStatus::Unsigned,
        None => DnssecStatus::Unknown,
    };

    Ok(info)
}

fn find_entity<'a>(entities: &'a [RdapEntity], role: &str) -> Option<&'a RdapEntity> {
    entities.iter().find_map(|entity| {
        if entity.roles.iter().any(|r| r.eq_ignore_ascii_case(role)) {
            Some(entity)
        } else {
            find_entity(&entity.entities, role)
        }
    })
}

/// vCard properties of an entity: `["vcard", [[name, params, type, value], ...]]`
fn vcard_properties(entity: &RdapEntity) -> impl Iterator<Item = &Vec<Value>> {
    entity
        .vcard
        .as_ref()
        .and_then(|v| v.get(1))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
}

fn vcard_text(entity: &RdapEntity, property: &str) -> Option<String> {
    vcard_properties(entity)
        .find(|prop| prop.first().and_then(Value::as_str) == Some(property))
        .and_then(|prop| prop.get(3))
        .and_then(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Array(parts) => parts.first().and_then(Value::as_str).map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

fn vcard_country(entity: &RdapEntity) -> Option<String> {
    let adr = vcard_properties(entity)
        .find(|prop| prop.first().and_then(Value::as_str) == Some("adr"))?;

    let from_params = adr
        .get(1)
        .and_then(|params| params.get("cc"))
        .and_then(Value::as_str);
    // the country name is the last component of the structured address
    let from_value = adr
        .get(3)
        .and_then(Value::as_array)
        .and_then(|parts| parts.get(6))
        .and_then(Value::as_str);

    from_params
        .or(from_value)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Maps privacy-shield values to [`Field::Redacted`]
fn classify(value: String) -> Field<String> {
    if is_privacy_shield(&value) {
        Field::Redacted
    } else {
        Field::Known(value)
    }
}

pub fn is_privacy_shield(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    PRIVACY_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    registrar: Option<String>,
    created: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
    last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    status: Vec<String>,
    registrant_name: Option<String>,
    registrant_organization: Option<String>,
    registrant_country: Option<String>,
    #[serde(default)]
    dnssec: DnssecStatus,
}

impl From<SnapshotEntry> for RegistrationInfo {
    fn from(entry: SnapshotEntry) -> Self {
        let known = |value: Option<String>| value.map(classify).unwrap_or_default();
        let date = |value: Option<DateTime<Utc>>| value.map(Field::Known).unwrap_or_default();

        let registrant_name = known(entry.registrant_name);
        Self {
            registrar: known(entry.registrar),
            created: date(entry.created),
            expires: date(entry.expires),
            last_changed: date(entry.last_changed),
            status: entry.status,
            privacy_protected: registrant_name == Field::Redacted,
            registrant_name,
            registrant_organization: known(entry.registrant_organization),
            registrant_country: entry.registrant_country.map(Field::Known).unwrap_or_default(),
            dnssec: entry.dnssec,
            provenance: Provenance::Snapshot,
        }
    }
}

/// Locally bundled registration data keyed by domain
#[derive(Debug, Default)]
pub struct RegistrationSnapshot {
    entries: HashMap<String, RegistrationInfo>,
}

impl RegistrationSnapshot {
    /// The snapshot shipped with the crate
    pub fn bundled() -> Self {
        Self::from_json(BUNDLED_SNAPSHOT).unwrap_or_else(|e| {
            warn!("Bundled registration snapshot is invalid: {}", e);
            Self::default()
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, SnapshotEntry> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(domain, entry)| (domain.to_ascii_lowercase(), entry.into()))
            .collect();
        Ok(Self { entries })
    }

    pub fn get(&self, domain: &str) -> Option<RegistrationInfo> {
        self.entries.get(&domain.to_ascii_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// FNV-1a, stable across runs and platforms
fn stable_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Non-authoritative placeholder derived only from the domain name
///
/// Every populated field is [`Field::Synthetic`] and provenance is
/// [`Provenance::Synthetic`]; repeated calls return the same value.
pub fn synthetic_placeholder(domain: &str) -> RegistrationInfo {
    const Y2K: i64 = 946_684_800;
    const DAY: i64 = 86_400;

    let seed = stable_hash(domain.to_ascii_lowercase().as_bytes());
    let created_secs = Y2K + (seed % 7_300) as i64 * DAY;
    let term_years = 1 + ((seed >> 32) % 10) as i64;
    let created = DateTime::<Utc>::from_timestamp(created_secs, 0).unwrap_or_default();
    let expires = created + ChronoDuration::days(365 * term_years);

    RegistrationInfo {
        registrar: Field::Synthetic(SYNTHETIC_REGISTRAR.to_string()),
        created: Field::Synthetic(created),
        expires: Field::Synthetic(expires),
        provenance: Provenance::Synthetic,
        ..Default::default()
    }
}

/// Retrieves registration data with bounded retries and a placeholder floor
pub struct RegistrationRetriever {
    chain: ResolverChain<str, RegistrationInfo>,
    policy: RetryPolicy,
    snapshot: RegistrationSnapshot,
    cache: DashMap<String, (RegistrationInfo, DateTime<Utc>)>,
    cache_ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl RegistrationRetriever {
    pub fn new(
        chain: ResolverChain<str, RegistrationInfo>,
        policy: RetryPolicy,
        snapshot: RegistrationSnapshot,
        cache_ttl: ChronoDuration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chain,
            policy,
            snapshot,
            cache: DashMap::new(),
            cache_ttl,
            clock,
        }
    }

    /// Relay chain from URL templates, each relay sharing `limiter`
    pub fn relay_chain(
        templates: &[String],
        client: &HttpClient,
        relay_timeout: std::time::Duration,
        limiter: Arc<RateLimiter>,
    ) -> ResolverChain<str, RegistrationInfo> {
        templates.iter().fold(
            ResolverChain::new("registration", relay_timeout),
            |chain, template| {
                let relay = RdapRelay::new(template, client.clone()).with_rate_limiter(limiter.clone());
                chain.with_alternate(Arc::new(relay))
            },
        )
    }

    /// Registration data for `domain`; never fails
    pub async fn retrieve(&self, domain: &str) -> Outcome<RegistrationInfo> {
        if let Some(info) = self.cached(domain) {
            debug!("Registration cache hit for {}", domain);
            return Outcome::Success(info);
        }

        let chain = &self.chain;
        let max_attempts = self.policy.max_attempts();
        let result = with_retry_policy(
            |attempt| async move {
                debug!(
                    "Registration lookup for {} (attempt {}/{})",
                    domain, attempt, max_attempts
                );
                chain
                    .resolve(domain, RegistrationInfo::has_substance)
                    .await
                    .into_result()
            },
            |_err| true,
            &self.policy,
        )
        .await;

        match result {
            Ok(info) => {
                self.cache
                    .insert(domain.to_string(), (info.clone(), self.clock.now()));
                Outcome::Success(info)
            }
            Err(cause) => {
                if let Some(info) = self.snapshot.get(domain) {
                    info!("Registration relays exhausted for {}, using snapshot", domain);
                    Outcome::Degraded { value: info, cause }
                } else {
                    warn!(
                        "Registration relays exhausted for {}, using synthetic placeholder: {}",
                        domain, cause
                    );
                    Outcome::Degraded {
                        value: synthetic_placeholder(domain),
                        cause,
                    }
                }
            }
        }
    }

    fn cached(&self, domain: &str) -> Option<RegistrationInfo> {
        let now = self.clock.now();
        // expiry is decided under the shard lock so a concurrent refresh survives
        self.cache
            .remove_if(domain, |_, (_, fetched_at)| now - *fetched_at >= self.cache_ttl);
        self.cache.get(domain).map(|entry| entry.value().0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever(clock: Arc<crate::clock::ManualClock>) -> RegistrationRetriever {
        RegistrationRetriever::new(
            ResolverChain::new("registration", std::time::Duration::from_secs(1)),
            RetryPolicy::once(),
            RegistrationSnapshot::default(),
            ChronoDuration::hours(1),
            clock,
        )
    }

    #[test]
    fn test_expired_entry_evicted_refreshed_entry_kept() {
        let start = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 5, 4, 8, 0, 0).unwrap();
        let clock = Arc::new(crate::clock::ManualClock::new(start));
        let retriever = retriever(clock.clone());
        let stale = RegistrationInfo {
            registrar: Field::Known("NIC Chile".to_string()),
            ..Default::default()
        };
        retriever.cache.insert("andes.cl".to_string(), (stale, start));

        clock.advance(ChronoDuration::minutes(61));
        assert!(retriever.cached("andes.cl").is_none());
        assert!(retriever.cache.get("andes.cl").is_none());

        // an entry stored after the expiry is served, not evicted
        let fresh = RegistrationInfo {
            registrar: Field::Known("Entel".to_string()),
            ..Default::default()
        };
        retriever.cache.insert("andes.cl".to_string(), (fresh.clone(), clock.now()));
        clock.advance(ChronoDuration::minutes(59));
        assert_eq!(retriever.cached("andes.cl"), Some(fresh));
        assert!(retriever.cache.get("andes.cl").is_some());
    }

    #[test]
    fn test_relay_name_is_host() {
        assert_eq!(relay_name("https://rdap.org/domain/{domain}"), "rdap.org");
        assert_eq!(
            relay_name("https://api.allorigins.win/raw?url=https://rdap.org/domain/{domain}"),
            "api.allorigins.win"
        );
    }

    #[test]
    fn test_privacy_markers() {
        assert!(is_privacy_shield("REDACTED FOR PRIVACY"));
        assert!(is_privacy_shield("Domains By Proxy, LLC"));
        assert!(!is_privacy_shield("Comercial Andina SpA"));
    }

    #[test]
    fn test_stable_hash_is_fixed() {
        assert_eq!(stable_hash(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_bundled_snapshot_loads() {
        let snapshot = RegistrationSnapshot::bundled();
        assert!(!snapshot.is_empty());
        let info = snapshot.get("EXAMPLE.com").unwrap();
        assert_eq!(info.provenance, Provenance::Snapshot);
        assert!(info.has_substance());
    }
}
