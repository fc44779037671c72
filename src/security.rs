//! Transport-security check
//!
//! One best-effort request to the insecure URL, following redirects. The
//! final URL tells whether the site ends up on encrypted transport and
//! whether it upgraded the insecure request; the final response's headers
//! are filtered down to a fixed security-relevant set.
//!
//! A site with nothing listening on the insecure port is tried once more over
//! TLS, so an HTTPS-only site still reports encrypted transport (without a
//! redirect).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::{ChainOutcome, Outcome, ResolverChain};
use crate::http::{ContentFetcher, FetchedPage, SchemeProbe};
use crate::model::SecurityInfo;

/// Response headers reported in [`SecurityInfo::headers`]
pub const SECURITY_HEADERS: &[&str] = &[
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
    "x-content-type-options",
    "referrer-policy",
    "permissions-policy",
    "x-xss-protection",
];

pub struct SecurityChecker {
    chain: ResolverChain<str, FetchedPage>,
}

impl SecurityChecker {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, attempt_timeout: Duration) -> Self {
        let chain = ResolverChain::new("security", attempt_timeout)
            .with_alternate(Arc::new(SchemeProbe::http(fetcher.clone())))
            .with_alternate(Arc::new(SchemeProbe::https(fetcher)));
        Self { chain }
    }

    /// Never fails; an unreachable site yields the all-false default
    pub async fn check(&self, domain: &str) -> Outcome<SecurityInfo> {
        match self.chain.resolve(domain, |_| true).await {
            ChainOutcome::Resolved { value, .. } => Outcome::Success(inspect(&value)),
            ChainOutcome::Exhausted { last_error, .. } => {
                debug!("Security check for {} failed: {}", domain, last_error);
                Outcome::Degraded {
                    value: SecurityInfo::default(),
                    cause: last_error,
                }
            }
        }
    }
}

/// Security facts observable from a fetched page
pub fn inspect(page: &FetchedPage) -> SecurityInfo {
    let headers: BTreeMap<String, String> = SECURITY_HEADERS
        .iter()
        .filter_map(|name| page.header(name).map(|value| (name.to_string(), value.to_string())))
        .collect();

    SecurityInfo {
        https_enabled: page.is_secure(),
        redirects_to_https: page.upgraded_to_secure(),
        headers,
        ..SecurityInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_keeps_only_security_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("strict-transport-security".to_string(), "max-age=31536000".to_string());
        headers.insert("server".to_string(), "nginx".to_string());
        let page = FetchedPage {
            requested_url: "http://example.cl/".to_string(),
            final_url: "https://example.cl/".to_string(),
            status: 200,
            headers,
            body: String::new(),
        };

        let info = inspect(&page);
        assert!(info.https_enabled);
        assert!(info.redirects_to_https);
        assert_eq!(info.headers.len(), 1);
        assert!(info.headers.contains_key("strict-transport-security"));
    }
}
