//! Cache and staleness policy over a [`RecordStore`]
//!
//! A stored record is reused only when all four persisted categories are
//! present, each was meaningful when written, and the oldest of them is
//! younger than the staleness threshold. Anything else is a miss, which is
//! not an error: the caller simply resolves afresh.
//!
//! Writes never block the caller. [`CacheManager::write`] hands the upsert to
//! a background task and persistence failures are logged, not returned.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::model::{DomainRecord, HostingRecord, Meaningful, Performance, RecordOrigin};
use crate::store::{CacheEntry, RecordStore, StoredDomain};

/// Why a stored record was not reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    NotStored,
    MissingCategory(&'static str),
    NotMeaningful(&'static str),
    Stale { age_hours: i64 },
    StoreError(String),
}

impl std::fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMiss::NotStored => write!(f, "not stored"),
            CacheMiss::MissingCategory(category) => write!(f, "{} not stored", category),
            CacheMiss::NotMeaningful(category) => write!(f, "{} holds only default data", category),
            CacheMiss::Stale { age_hours } => write!(f, "stale ({}h old)", age_hours),
            CacheMiss::StoreError(reason) => write!(f, "store error: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
}

impl CacheManager {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, staleness: Duration) -> Self {
        Self {
            store,
            clock,
            staleness,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A reusable record, or `None` on any kind of miss
    pub async fn read(&self, domain: &str) -> Option<DomainRecord> {
        match self.lookup(domain).await {
            Ok(record) => {
                debug!("Cache hit for {}", domain);
                Some(record)
            }
            Err(miss) => {
                debug!("Cache miss for {}: {}", domain, miss);
                None
            }
        }
    }

    /// Same as [`read`](Self::read) but reports why a record was not reused
    pub async fn lookup(&self, domain: &str) -> Result<DomainRecord, CacheMiss> {
        let stored = self
            .store
            .load(domain)
            .await
            .map_err(|e| CacheMiss::StoreError(e.to_string()))?
            .ok_or(CacheMiss::NotStored)?;

        let network = usable("network", stored.network)?;
        let registration = usable("registration", stored.registration)?;
        let hosting = usable("hosting", stored.hosting)?;
        let security = usable("security", stored.security)?;

        let oldest = [
            network.cached_at,
            registration.cached_at,
            hosting.cached_at,
            security.cached_at,
        ]
        .into_iter()
        .min()
        .unwrap_or(stored.updated_at);

        let age = self.clock.now() - oldest;
        if age >= self.staleness {
            return Err(CacheMiss::Stale {
                age_hours: age.num_hours(),
            });
        }

        Ok(DomainRecord {
            domain: stored.domain,
            analyzed_at: oldest,
            origin: RecordOrigin::Cache,
            network: network.value,
            registration: registration.value,
            operator: hosting.value.operator,
            software: hosting.value.software,
            security: security.value,
            performance: Performance::NotMeasured,
            degraded: Vec::new(),
        })
    }

    /// Persists `record` in the background
    ///
    /// The returned handle may be dropped; it exists so callers that need to
    /// observe completion (tests, batch shutdown) can await it.
    pub fn write(&self, record: &DomainRecord) -> JoinHandle<()> {
        let row = self.to_row(record);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            let domain = row.domain.clone();
            match store.upsert(row).await {
                Ok(()) => info!("Cached analysis for {}", domain),
                Err(e) => warn!("Failed to persist {}: {}", domain, e),
            }
        })
    }

    fn to_row(&self, record: &DomainRecord) -> StoredDomain {
        let now = self.clock.now();
        let hosting = HostingRecord {
            operator: record.operator.clone(),
            software: record.software.clone(),
        };

        StoredDomain {
            domain: record.domain.clone(),
            created_at: now,
            updated_at: now,
            network: Some(entry(record.network.clone(), now)),
            registration: Some(entry(record.registration.clone(), now)),
            hosting: Some(entry(hosting, now)),
            security: Some(entry(record.security.clone(), now)),
        }
    }
}

fn entry<T: Meaningful>(value: T, cached_at: DateTime<Utc>) -> CacheEntry<T> {
    let meaningful = value.is_meaningful();
    CacheEntry {
        value,
        cached_at,
        meaningful,
    }
}

/// The stored row, if present and meaningful both when written and now
fn usable<T: Meaningful>(
    category: &'static str,
    entry: Option<CacheEntry<T>>,
) -> Result<CacheEntry<T>, CacheMiss> {
    let entry = entry.ok_or(CacheMiss::MissingCategory(category))?;
    if !entry.meaningful || !entry.value.is_meaningful() {
        return Err(CacheMiss::NotMeaningful(category));
    }
    Ok(entry)
}
