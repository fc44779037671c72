//! Name and record resolution
//!
//! Address, mail-exchange, text and name-server records are queried
//! independently, each through the same [`ResolverChain`] of DNS services
//! (system resolver first, then public resolvers). A category whose services
//! all fail degrades to an empty list without affecting the others. An empty
//! answer (NXDOMAIN, no records of that type) is a successful answer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::system_conf::read_system_conf;
use trust_dns_resolver::TokioAsyncResolver as AsyncResolver;

use crate::chain::{Alternate, Outcome, ResolverChain};
use crate::error::SourceError;
use crate::model::{MailExchange, NetworkRecordSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Address,
    MailExchange,
    Text,
    NameServer,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Address,
        RecordKind::MailExchange,
        RecordKind::Text,
        RecordKind::NameServer,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Address => "A/AAAA",
            RecordKind::MailExchange => "MX",
            RecordKind::Text => "TXT",
            RecordKind::NameServer => "NS",
        }
    }
}

/// One record-type query for a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub domain: String,
    pub kind: RecordKind,
}

/// Records returned for a [`RecordQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAnswer {
    Addresses(Vec<IpAddr>),
    MailExchanges(Vec<MailExchange>),
    Text(Vec<String>),
    NameServers(Vec<String>),
}

impl RecordAnswer {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordAnswer::Addresses(_) => RecordKind::Address,
            RecordAnswer::MailExchanges(_) => RecordKind::MailExchange,
            RecordAnswer::Text(_) => RecordKind::Text,
            RecordAnswer::NameServers(_) => RecordKind::NameServer,
        }
    }

    /// The "no records" answer for `kind`
    pub fn empty(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Address => RecordAnswer::Addresses(Vec::new()),
            RecordKind::MailExchange => RecordAnswer::MailExchanges(Vec::new()),
            RecordKind::Text => RecordAnswer::Text(Vec::new()),
            RecordKind::NameServer => RecordAnswer::NameServers(Vec::new()),
        }
    }
}

/// A DNS resolution service backed by trust-dns
pub struct DnsService {
    name: String,
    resolver: AsyncResolver,
}

impl DnsService {
    /// Resolver configured from the host's system configuration
    pub fn system(timeout: Duration) -> Result<Self> {
        let (config, opts) = read_system_conf().context("Failed to read system DNS configuration")?;
        Ok(Self::with_config("system", config, tuned(opts, timeout)))
    }

    /// Google public DNS
    pub fn google(timeout: Duration) -> Self {
        Self::with_config("google", ResolverConfig::google(), tuned(ResolverOpts::default(), timeout))
    }

    /// Cloudflare public DNS
    pub fn cloudflare(timeout: Duration) -> Self {
        Self::with_config(
            "cloudflare",
            ResolverConfig::cloudflare(),
            tuned(ResolverOpts::default(), timeout),
        )
    }

    fn with_config(name: &str, config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            name: format!("dns:{}", name),
            resolver: AsyncResolver::tokio(config, opts),
        }
    }

    async fn lookup(&self, query: &RecordQuery) -> Result<RecordAnswer, ResolveError> {
        let domain = query.domain.as_str();
        let answer = match query.kind {
            RecordKind::Address => {
                let lookup = self.resolver.lookup_ip(domain).await?;
                RecordAnswer::Addresses(lookup.iter().collect())
            }
            RecordKind::MailExchange => {
                let lookup = self.resolver.mx_lookup(domain).await?;
                let mut entries: Vec<MailExchange> = lookup
                    .iter()
                    .map(|mx| MailExchange {
                        priority: mx.preference(),
                        target: normalize_name(&mx.exchange().to_string()),
                    })
                    .collect();
                entries.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.target.cmp(&b.target)));
                RecordAnswer::MailExchanges(entries)
            }
            RecordKind::Text => {
                let lookup = self.resolver.txt_lookup(domain).await?;
                RecordAnswer::Text(
                    lookup
                        .iter()
                        .map(|txt| {
                            txt.iter()
                                .map(|data| String::from_utf8_lossy(data).into_owned())
                                .collect::<Vec<_>>()
                                .join("")
                        })
                        .collect(),
                )
            }
            RecordKind::NameServer => {
                let lookup = self.resolver.ns_lookup(domain).await?;
                let mut servers: Vec<String> =
                    lookup.iter().map(|ns| normalize_name(&ns.to_string())).collect();
                servers.sort();
                RecordAnswer::NameServers(servers)
            }
        };
        Ok(answer)
    }
}

fn tuned(mut opts: ResolverOpts, timeout: Duration) -> ResolverOpts {
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 1024;
    opts.positive_min_ttl = Some(Duration::from_secs(300));
    opts.negative_min_ttl = Some(Duration::from_secs(60));
    opts
}

/// Lowercase, without the trailing root dot
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl Alternate<RecordQuery, RecordAnswer> for DnsService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, query: &RecordQuery) -> Result<RecordAnswer, SourceError> {
        match self.lookup(query).await {
            Ok(answer) => Ok(answer),
            Err(err) => match err.kind() {
                // absence of a record type is an answer, not a failure
                ResolveErrorKind::NoRecordsFound { .. } => {
                    debug!("{}: no {} records for {}", self.name, query.kind.label(), query.domain);
                    Ok(RecordAnswer::empty(query.kind))
                }
                ResolveErrorKind::Timeout => {
                    Err(SourceError::unavailable(self.name.as_str(), "DNS query timed out"))
                }
                _ => Err(SourceError::unavailable(self.name.as_str(), err)),
            },
        }
    }
}

/// Resolves the full [`NetworkRecordSet`] for a domain
pub struct RecordResolver {
    chain: ResolverChain<RecordQuery, RecordAnswer>,
}

impl RecordResolver {
    /// System resolver, then Google, then Cloudflare
    pub fn new(timeout: Duration) -> Result<Self> {
        // leave headroom over the resolver's own timeout
        let mut chain = ResolverChain::new("dns", timeout + Duration::from_secs(1));

        match DnsService::system(timeout) {
            Ok(service) => chain = chain.with_alternate(Arc::new(service)),
            Err(e) => warn!("System DNS resolver unavailable, using public resolvers only: {:#}", e),
        }

        let chain = chain
            .with_alternate(Arc::new(DnsService::google(timeout)))
            .with_alternate(Arc::new(DnsService::cloudflare(timeout)));

        Ok(Self { chain })
    }

    /// Uses an explicit chain of services
    pub fn with_chain(chain: ResolverChain<RecordQuery, RecordAnswer>) -> Self {
        Self { chain }
    }

    /// Resolves all four record categories concurrently and merges them
    pub async fn resolve(&self, domain: &str) -> Outcome<NetworkRecordSet> {
        debug!("Resolving DNS records for {}", domain);

        let (addresses, mail, text, name_servers) = tokio::join!(
            self.resolve_kind(domain, RecordKind::Address),
            self.resolve_kind(domain, RecordKind::MailExchange),
            self.resolve_kind(domain, RecordKind::Text),
            self.resolve_kind(domain, RecordKind::NameServer),
        );

        let mut records = NetworkRecordSet::default();
        let mut first_cause = None;

        for outcome in [addresses, mail, text, name_servers] {
            if let Outcome::Degraded { cause, .. } = &outcome {
                first_cause.get_or_insert_with(|| cause.clone());
            }
            match outcome.into_value() {
                RecordAnswer::Addresses(v) => records.addresses = v,
                RecordAnswer::MailExchanges(v) => records.mail_exchanges = v,
                RecordAnswer::Text(v) => records.text = v,
                RecordAnswer::NameServers(v) => records.name_servers = v,
            }
        }

        debug!(
            "Resolved {} addresses, {} MX, {} TXT, {} NS for {}",
            records.addresses.len(),
            records.mail_exchanges.len(),
            records.text.len(),
            records.name_servers.len(),
            domain
        );

        match first_cause {
            None => Outcome::Success(records),
            Some(cause) => Outcome::Degraded {
                value: records,
                cause,
            },
        }
    }

    async fn resolve_kind(&self, domain: &str, kind: RecordKind) -> Outcome<RecordAnswer> {
        let query = RecordQuery {
            domain: domain.to_string(),
            kind,
        };
        self.chain
            .resolve(&query, |answer| answer.kind() == kind)
            .await
            .into_outcome(|| RecordAnswer::empty(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("NS1.HostingPlus.CL."), "ns1.hostingplus.cl");
        assert_eq!(normalize_name("mx.example.com"), "mx.example.com");
    }

    #[test]
    fn test_empty_answer_matches_kind() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordAnswer::empty(kind).kind(), kind);
        }
    }
}
