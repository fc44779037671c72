//! Software fingerprinting and hosting reconciliation
//!
//! The home page is fetched over HTTPS, falling back once to plain HTTP. The
//! response headers are checked for explicit signals (server identity,
//! delivery-network markers, platform headers) and the body is scanned
//! against an ordered signature table. Content-management and e-commerce
//! signatures are evaluated before front-end framework signatures, and a
//! framework the detected platform ships with is not reported as the site's
//! framework.
//!
//! If both fetches fail the profile is all "not detected"; detection never
//! fails the analysis.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::{ChainOutcome, Outcome, ResolverChain};
use crate::http::{ContentFetcher, FetchedPage, SchemeProbe};
use crate::model::{OperatorInfo, SoftwareProfile, NOT_DETECTED, UNKNOWN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCategory {
    Cms,
    Ecommerce,
    Framework,
    Analytics,
}

/// A body signature: any needle (lowercase) present means a match
#[derive(Debug)]
pub struct Signature {
    pub name: &'static str,
    pub category: SignatureCategory,
    pub needles: &'static [&'static str],
    /// Frameworks this platform ships with
    pub bundles: &'static [&'static str],
}

const fn sig(
    name: &'static str,
    category: SignatureCategory,
    needles: &'static [&'static str],
    bundles: &'static [&'static str],
) -> Signature {
    Signature {
        name,
        category,
        needles,
        bundles,
    }
}

use SignatureCategory::{Analytics, Cms, Ecommerce, Framework};

/// Evaluated top to bottom; platforms first, then frameworks, then analytics
pub const BODY_SIGNATURES: &[Signature] = &[
    sig("WooCommerce", Ecommerce, &["woocommerce"], &["jQuery", "React"]),
    sig("Shopify", Ecommerce, &["cdn.shopify.com", "shopify.theme"], &[]),
    sig("Magento", Ecommerce, &["mage/cookies", "/static/frontend/"], &["jQuery"]),
    sig("PrestaShop", Ecommerce, &["prestashop"], &["jQuery"]),
    sig("VTEX", Ecommerce, &["vteximg.com.br", "vtex.render-server"], &["React"]),
    sig("Jumpseller", Ecommerce, &["jumpseller"], &["jQuery"]),
    sig("WordPress", Cms, &["wp-content/", "wp-includes/"], &["jQuery", "React"]),
    sig("Drupal", Cms, &["drupal.settings", "/sites/default/files/", "data-drupal-"], &["jQuery"]),
    sig("Joomla", Cms, &["/media/jui/", "content=\"joomla"], &["jQuery", "Bootstrap"]),
    sig("Wix", Cms, &["static.wixstatic.com"], &["React"]),
    sig("Squarespace", Cms, &["static1.squarespace.com"], &[]),
    sig("Webflow", Cms, &["data-wf-page", "webflow.js"], &["jQuery"]),
    sig("Ghost", Cms, &["content=\"ghost"], &[]),
    sig("Next.js", Framework, &["__next_data__", "/_next/static/"], &[]),
    sig("Nuxt", Framework, &["__nuxt", "/_nuxt/"], &[]),
    sig("Gatsby", Framework, &["___gatsby"], &[]),
    sig("Angular", Framework, &["ng-version=", "ng-app"], &[]),
    sig("React", Framework, &["data-reactroot", "react-dom"], &[]),
    sig("Vue.js", Framework, &["data-v-app", "vue.min.js", "vue.global"], &[]),
    sig("Svelte", Framework, &["svelte-"], &[]),
    sig("Bootstrap", Framework, &["bootstrap.min.css", "bootstrap.min.js"], &[]),
    sig("jQuery", Framework, &["jquery.min.js", "jquery.js", "/jquery-"], &[]),
    sig("Google Analytics", Analytics, &["google-analytics.com/analytics.js", "googletagmanager.com/gtag/js"], &[]),
    sig("Google Tag Manager", Analytics, &["googletagmanager.com/gtm.js"], &[]),
    sig("Meta Pixel", Analytics, &["connect.facebook.net", "fbq('init'"], &[]),
    sig("Hotjar", Analytics, &["static.hotjar.com", "hjsettings"], &[]),
    sig("Microsoft Clarity", Analytics, &["clarity.ms/tag"], &[]),
    sig("Matomo", Analytics, &["matomo.js", "piwik.js"], &[]),
    sig("Plausible", Analytics, &["plausible.io/js"], &[]),
    sig("TikTok Pixel", Analytics, &["analytics.tiktok.com"], &[]),
];

/// Header presence that identifies a delivery network
const CDN_HEADERS: &[(&str, &str)] = &[
    ("cf-ray", "Cloudflare"),
    ("x-amz-cf-id", "Amazon CloudFront"),
    ("x-fastly-request-id", "Fastly"),
    ("x-akamai-transformed", "Akamai"),
    ("x-vercel-id", "Vercel"),
    ("x-nf-request-id", "Netlify"),
    ("x-azure-ref", "Azure Front Door"),
];

/// Header presence that identifies a hosted platform
const PLATFORM_HEADERS: &[(&str, &str)] = &[
    ("x-shopify-stage", "Shopify"),
    ("x-wix-request-id", "Wix"),
    ("x-drupal-cache", "Drupal"),
    ("x-drupal-dynamic-cache", "Drupal"),
];

/// Server header substrings (lowercase) that name a hosting provider
const SERVER_HOSTS: &[(&str, &str)] = &[
    ("cloudflare", "Cloudflare"),
    ("amazons3", "Amazon Web Services"),
    ("awselb", "Amazon Web Services"),
    ("google frontend", "Google"),
    ("gws", "Google"),
    ("vercel", "Vercel"),
    ("netlify", "Netlify"),
    ("github.com", "GitHub Pages"),
    ("microsoft-azure", "Microsoft Azure"),
];

/// Name-server substrings (lowercase) that identify a hosting provider
pub const NAME_SERVER_HOSTS: &[(&str, &str)] = &[
    ("hostingplus", "HostingPlus"),
    ("cloudflare.com", "Cloudflare"),
    ("awsdns", "Amazon Web Services"),
    ("azure-dns", "Microsoft Azure"),
    ("googledomains.com", "Google"),
    ("digitalocean.com", "DigitalOcean"),
    ("domaincontrol.com", "GoDaddy"),
    ("hostgator", "HostGator"),
    ("bluehost.com", "Bluehost"),
    ("dns-parking.com", "Hostinger"),
    ("vercel-dns.com", "Vercel"),
    ("nsone.net", "NS1"),
    ("wixdns.net", "Wix"),
    ("registrar-servers.com", "Namecheap"),
];

/// Detected profile plus the header-derived hosting hint used in reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintReport {
    pub profile: SoftwareProfile,
    pub header_identity: Option<String>,
}

/// Fetches a site and fingerprints it
pub struct FingerprintDetector {
    chain: ResolverChain<str, FetchedPage>,
}

impl FingerprintDetector {
    /// HTTPS first, then a single HTTP fallback
    pub fn new(fetcher: Arc<dyn ContentFetcher>, attempt_timeout: Duration) -> Self {
        let chain = ResolverChain::new("fingerprint", attempt_timeout)
            .with_alternate(Arc::new(SchemeProbe::https(fetcher.clone())))
            .with_alternate(Arc::new(SchemeProbe::http(fetcher)));
        Self { chain }
    }

    pub async fn detect(&self, domain: &str) -> Outcome<FingerprintReport> {
        match self.chain.resolve(domain, |page| page.status < 500).await {
            ChainOutcome::Resolved { value, .. } => Outcome::Success(analyze_page(&value)),
            // a server error page still carries usable headers
            ChainOutcome::Exhausted {
                partial: Some(page), ..
            } => Outcome::DefaultOnly(analyze_page(&page)),
            ChainOutcome::Exhausted { last_error, .. } => Outcome::Degraded {
                value: FingerprintReport::default(),
                cause: last_error,
            },
        }
    }
}

/// Fingerprints a fetched page
pub fn analyze_page(page: &FetchedPage) -> FingerprintReport {
    let mut profile = SoftwareProfile::default();

    let server = page.header("server").map(str::trim).filter(|s| !s.is_empty());
    if let Some(server) = server {
        profile.server = server.to_string();
    }

    if let Some((_, cdn)) = CDN_HEADERS.iter().find(|(header, _)| page.header(header).is_some()) {
        profile.cdn = cdn.to_string();
    } else if server.is_some_and(|s| s.eq_ignore_ascii_case("cloudflare")) {
        profile.cdn = "Cloudflare".to_string();
    }

    if let Some((_, platform)) = PLATFORM_HEADERS.iter().find(|(header, _)| page.header(header).is_some()) {
        profile.cms = platform.to_string();
    }

    let body = page.body.to_ascii_lowercase();
    let is_match = |signature: &Signature| signature.needles.iter().any(|needle| body.contains(needle));

    let mut platform: Option<&Signature> = BODY_SIGNATURES
        .iter()
        .find(|s| s.name == profile.cms);
    for signature in BODY_SIGNATURES {
        match signature.category {
            Cms | Ecommerce if platform.is_none() && is_match(signature) => {
                profile.cms = signature.name.to_string();
                platform = Some(signature);
            }
            Framework if profile.framework == NOT_DETECTED && is_match(signature) => {
                let shipped_with_platform = platform.is_some_and(|p| p.bundles.contains(&signature.name));
                if !shipped_with_platform {
                    profile.framework = signature.name.to_string();
                }
            }
            Analytics if is_match(signature) => profile.analytics.push(signature.name.to_string()),
            _ => {}
        }
    }

    if profile.framework == NOT_DETECTED {
        if let Some(powered_by) = page.header("x-powered-by") {
            if powered_by.to_ascii_lowercase().contains("next.js") {
                profile.framework = "Next.js".to_string();
            }
        }
    }

    profile.language = guess_language(page, &profile);

    let header_identity = server.and_then(|s| {
        let lower = s.to_ascii_lowercase();
        SERVER_HOSTS
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, host)| host.to_string())
    });
    if let Some(host) = &header_identity {
        profile.hosting_operator = host.clone();
    }

    debug!(
        "Fingerprint for {}: server={}, cms={}, framework={}, cdn={}",
        page.final_url, profile.server, profile.cms, profile.framework, profile.cdn
    );

    FingerprintReport {
        profile,
        header_identity,
    }
}

fn guess_language(page: &FetchedPage, profile: &SoftwareProfile) -> String {
    let powered_by = page.header("x-powered-by").unwrap_or_default().to_ascii_lowercase();
    let cookies = page.header("set-cookie").unwrap_or_default().to_ascii_lowercase();

    let language = if powered_by.contains("php") || cookies.contains("phpsessid") || cookies.contains("laravel_session") {
        "PHP"
    } else if powered_by.contains("asp.net") || page.header("x-aspnet-version").is_some() || cookies.contains("asp.net_sessionid") {
        "C#"
    } else if powered_by.contains("express") || powered_by.contains("next.js") {
        "JavaScript"
    } else if cookies.contains("jsessionid") {
        "Java"
    } else if cookies.contains("csrftoken") || cookies.contains("sessionid=") {
        "Python"
    } else {
        match profile.cms.as_str() {
            "WordPress" | "WooCommerce" | "Drupal" | "Joomla" | "Magento" | "PrestaShop" => "PHP",
            "Shopify" => "Ruby",
            "Ghost" => "JavaScript",
            _ => match profile.framework.as_str() {
                "Next.js" | "Nuxt" | "Gatsby" => "JavaScript",
                _ => NOT_DETECTED,
            },
        }
    };
    language.to_string()
}

/// Hosting provider label for a site
///
/// Precedence: name-server pattern, then operator resolver, then response
/// header identity. The first signal that is not unknown wins.
pub fn reconcile_hosting(
    name_servers: &[String],
    operator: &OperatorInfo,
    header_identity: Option<&str>,
) -> String {
    name_server_host(name_servers)
        .or_else(|| (operator.name != UNKNOWN).then(|| operator.name.clone()))
        .or_else(|| header_identity.filter(|h| *h != UNKNOWN).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Hosting provider implied by the name servers
pub fn name_server_host(name_servers: &[String]) -> Option<String> {
    name_servers.iter().find_map(|ns| {
        let ns = ns.to_ascii_lowercase();
        NAME_SERVER_HOSTS
            .iter()
            .find(|(needle, _)| ns.contains(needle))
            .map(|(_, host)| host.to_string())
    })
}
