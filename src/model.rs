//! Data model for aggregated domain intelligence
//!
//! A [`DomainRecord`] is always structurally complete: every category that
//! could not be resolved carries documented sentinel values instead of being
//! omitted. The sentinels are:
//!
//! - [`UNKNOWN`] for operator, country, city and hosting labels
//! - [`NOT_DETECTED`] for software fingerprint fields
//! - [`HostAddress::Unresolved`] when no address record resolved
//! - [`Field::Unavailable`], [`Field::Redacted`] and [`Field::Synthetic`] for
//!   registration fields, so callers can tell real data, a privacy shield and
//!   a placeholder apart from the value alone

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Label used when an operator, location or hosting provider is unknown
pub const UNKNOWN: &str = "unknown";

/// Label used when a software fingerprint category matched nothing
pub const NOT_DETECTED: &str = "not detected";

/// A registration field value and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Field<T> {
    /// Real value returned by a registry
    Known(T),
    /// Registry answered with a generic privacy-shield value
    Redacted,
    /// Non-authoritative placeholder derived from the domain name
    Synthetic(T),
    /// No source provided this field
    Unavailable,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unavailable
    }
}

impl<T> Field<T> {
    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, Field::Known(_))
    }

    /// The value if it is real registry data
    pub fn known(&self) -> Option<&T> {
        match self {
            Field::Known(value) => Some(value),
            _ => None,
        }
    }
}

/// Primary address of a domain, or the "unresolved" sentinel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAddress {
    Resolved(IpAddr),
    #[default]
    Unresolved,
}

impl HostAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            HostAddress::Resolved(ip) => Some(*ip),
            HostAddress::Unresolved => None,
        }
    }
}

impl std::fmt::Display for HostAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostAddress::Resolved(ip) => write!(f, "{}", ip),
            HostAddress::Unresolved => f.write_str("unresolved"),
        }
    }
}

/// A mail exchange entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailExchange {
    pub priority: u16,
    pub target: String,
}

/// DNS records for a domain. Absent record types are empty, never missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRecordSet {
    pub addresses: Vec<IpAddr>,
    pub mail_exchanges: Vec<MailExchange>,
    pub text: Vec<String>,
    pub name_servers: Vec<String>,
}

impl NetworkRecordSet {
    /// First IPv4 address if any, otherwise the first address of any family
    pub fn primary_address(&self) -> HostAddress {
        self.addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| self.addresses.first())
            .map(|ip| HostAddress::Resolved(*ip))
            .unwrap_or_default()
    }
}

/// Where a registration record came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Fetched from a registration relay during this or a recent analysis
    Live { relay: String },
    /// Bundled static snapshot
    Snapshot,
    /// Deterministic placeholder, not authoritative
    Synthetic,
    #[default]
    Unavailable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnssecStatus {
    Signed,
    Unsigned,
    #[default]
    Unknown,
}

/// Registration (RDAP/WHOIS) metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationInfo {
    pub registrar: Field<String>,
    pub created: Field<DateTime<Utc>>,
    pub expires: Field<DateTime<Utc>>,
    pub last_changed: Field<DateTime<Utc>>,
    pub status: Vec<String>,
    pub registrant_name: Field<String>,
    pub registrant_organization: Field<String>,
    pub registrant_country: Field<String>,
    pub privacy_protected: bool,
    pub dnssec: DnssecStatus,
    pub provenance: Provenance,
}

impl RegistrationInfo {
    /// True when at least one primary field carries real registry data
    #[must_use]
    pub fn has_substance(&self) -> bool {
        self.created.is_known()
            || self.registrant_name.is_known()
            || self.registrar.is_known()
            || self.expires.is_known()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintLevel {
    Low,
    Medium,
    High,
}

/// Complaint history attached to a network operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    pub level: ComplaintLevel,
    pub complaints: u32,
}

/// Which signal produced the operator name and location
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorSource {
    Live,
    StaticRange,
    #[default]
    None,
}

/// Network operator and geolocation of the primary address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorInfo {
    pub address: HostAddress,
    pub asn: Option<u32>,
    pub name: String,
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub is_domestic: bool,
    pub source: OperatorSource,
    pub reputation: Option<Reputation>,
}

impl Default for OperatorInfo {
    fn default() -> Self {
        Self {
            address: HostAddress::Unresolved,
            asn: None,
            name: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            country_code: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            is_domestic: false,
            source: OperatorSource::None,
            reputation: None,
        }
    }
}

/// Transport security observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityInfo {
    pub https_enabled: bool,
    pub redirects_to_https: bool,
    pub certificate_issuer: String,
    /// Security-relevant response headers, lowercase name to value
    pub headers: BTreeMap<String, String>,
}

impl Default for SecurityInfo {
    fn default() -> Self {
        Self {
            https_enabled: false,
            redirects_to_https: false,
            certificate_issuer: UNKNOWN.to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Software detected on the site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareProfile {
    pub server: String,
    pub cms: String,
    pub framework: String,
    pub cdn: String,
    pub analytics: Vec<String>,
    pub language: String,
    pub hosting_operator: String,
}

impl Default for SoftwareProfile {
    fn default() -> Self {
        Self {
            server: NOT_DETECTED.to_string(),
            cms: NOT_DETECTED.to_string(),
            framework: NOT_DETECTED.to_string(),
            cdn: NOT_DETECTED.to_string(),
            analytics: Vec::new(),
            language: NOT_DETECTED.to_string(),
            hosting_operator: UNKNOWN.to_string(),
        }
    }
}

/// Page performance. Nothing is measured yet, so this is always explicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Performance {
    #[default]
    NotMeasured,
}

/// Whether a record was resolved now or served from the durable cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    #[default]
    Fresh,
    Cache,
}

/// The canonical, always-complete result of analysing one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub analyzed_at: DateTime<Utc>,
    pub origin: RecordOrigin,
    pub network: NetworkRecordSet,
    pub registration: RegistrationInfo,
    pub operator: OperatorInfo,
    pub software: SoftwareProfile,
    pub security: SecurityInfo,
    pub performance: Performance,
    /// Categories that fell back to defaults, with the reason
    pub degraded: Vec<String>,
}

impl DomainRecord {
    /// A record with every category at its documented default
    pub fn empty(domain: &str, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            analyzed_at,
            origin: RecordOrigin::Fresh,
            network: NetworkRecordSet::default(),
            registration: RegistrationInfo::default(),
            operator: OperatorInfo::default(),
            software: SoftwareProfile::default(),
            security: SecurityInfo::default(),
            performance: Performance::NotMeasured,
            degraded: Vec::new(),
        }
    }
}

/// Operator and software profile, persisted together as one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingRecord {
    pub operator: OperatorInfo,
    pub software: SoftwareProfile,
}

/// Distinguishes real data from defaults and placeholders for caching
pub trait Meaningful {
    fn is_meaningful(&self) -> bool;
}

impl Meaningful for NetworkRecordSet {
    fn is_meaningful(&self) -> bool {
        !self.addresses.is_empty()
    }
}

impl Meaningful for RegistrationInfo {
    fn is_meaningful(&self) -> bool {
        // a privacy-shielded owner is treated as "no data" so it gets refreshed
        self.provenance != Provenance::Synthetic
            && self.has_substance()
            && self.registrant_name != Field::Redacted
    }
}

impl Meaningful for HostingRecord {
    fn is_meaningful(&self) -> bool {
        self.operator.name != UNKNOWN || self.software.hosting_operator != UNKNOWN
    }
}

impl Meaningful for SecurityInfo {
    fn is_meaningful(&self) -> bool {
        self.https_enabled || !self.headers.is_empty()
    }
}
