//! Runtime settings
//!
//! Settings are layered: built-in defaults, then an optional JSON file, then
//! command-line overrides applied by the binary. Every key is optional in the
//! file; missing keys keep their default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Content fetch and security probe timeout
    pub fetch_timeout_ms: u64,
    /// Per-service DNS attempt timeout
    pub dns_timeout_ms: u64,
    /// Per-relay registration attempt timeout
    pub relay_timeout_ms: u64,
    /// Outer attempt budget for registration retrieval
    pub registration_attempts: u32,
    /// Linear backoff step between registration attempts
    pub registration_backoff_ms: u64,
    /// In-process reuse window for live registration data
    pub registration_cache_ttl_secs: u64,
    pub operator_timeout_ms: u64,
    /// Durable cache staleness threshold
    pub staleness_hours: u64,
    /// ISO country code used for the domestic flag
    pub home_country: String,
    /// Registration relay URL templates, tried in order; `{domain}` is substituted
    pub registration_relays: Vec<String>,
    /// Operator intelligence URL template; `{ip}` is substituted
    pub operator_endpoint: String,
    /// Optional JSON reputation table keyed by `AS<n>` or operator name
    pub reputation_file: Option<PathBuf>,
    /// Directory for the JSON record store
    pub store_dir: PathBuf,
    /// Domains analysed concurrently in batch mode
    pub concurrent_requests: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 8_000,
            dns_timeout_ms: 5_000,
            relay_timeout_ms: 10_000,
            registration_attempts: 3,
            registration_backoff_ms: 2_000,
            registration_cache_ttl_secs: 3_600,
            operator_timeout_ms: 5_000,
            staleness_hours: 24,
            home_country: "CL".to_string(),
            registration_relays: vec![
                "https://rdap.org/domain/{domain}".to_string(),
                "https://rdap.net/domain/{domain}".to_string(),
                "https://api.allorigins.win/raw?url=https%3A%2F%2Frdap.org%2Fdomain%2F{domain}".to_string(),
            ],
            operator_endpoint:
                "http://ip-api.com/json/{ip}?fields=status,message,country,countryCode,city,isp,org,as"
                    .to_string(),
            reputation_file: None,
            store_dir: PathBuf::from(".domintel"),
            concurrent_requests: 8,
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                debug!("Loading settings from {}", path.display());
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let settings: Settings = serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                info!("Loaded settings from {}", path.display());
                settings
            }
            None => Settings::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.registration_attempts == 0 {
            bail!("registration_attempts must be at least 1");
        }
        if self.registration_relays.is_empty() {
            bail!("at least one registration relay is required");
        }
        if let Some(bad) = self.registration_relays.iter().find(|t| !t.contains("{domain}")) {
            bail!("registration relay '{}' has no {{domain}} placeholder", bad);
        }
        if !self.operator_endpoint.contains("{ip}") {
            bail!("operator_endpoint has no {{ip}} placeholder");
        }
        if self.home_country.len() != 2 {
            bail!("home_country must be a two-letter country code");
        }
        if self.staleness_hours == 0 {
            bail!("staleness_hours must be at least 1");
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }

    pub fn operator_timeout(&self) -> Duration {
        Duration::from_millis(self.operator_timeout_ms)
    }

    pub fn registration_backoff(&self) -> Duration {
        Duration::from_millis(self.registration_backoff_ms)
    }

    pub fn registration_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.registration_cache_ttl_secs as i64)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.staleness_hours as i64)
    }
}
