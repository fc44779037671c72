//! Durable record storage
//!
//! The cache manager consumes storage only through [`RecordStore`], a keyed
//! load/upsert interface. A stored domain is a parent row (domain, created and
//! updated timestamps) plus one optional row per persisted category, each
//! carrying its own `cached_at` timestamp and `meaningful` flag.
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: process-local, backed by a `DashMap`
//! - [`JsonFileStore`]: one JSON document per domain in a directory

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::PersistenceError;
use crate::model::{HostingRecord, NetworkRecordSet, RegistrationInfo, SecurityInfo};

/// One persisted category row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
    pub meaningful: bool,
}

/// Everything persisted for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDomain {
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub network: Option<CacheEntry<NetworkRecordSet>>,
    #[serde(default)]
    pub registration: Option<CacheEntry<RegistrationInfo>>,
    #[serde(default)]
    pub hosting: Option<CacheEntry<HostingRecord>>,
    #[serde(default)]
    pub security: Option<CacheEntry<SecurityInfo>>,
}

impl StoredDomain {
    /// Carries `created_at` over from the row being replaced
    fn merged_with(mut self, existing: Option<&StoredDomain>) -> Self {
        if let Some(existing) = existing {
            self.created_at = existing.created_at.min(self.created_at);
        }
        self
    }
}

/// Keyed upsert/read store
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, domain: &str) -> Result<Option<StoredDomain>, PersistenceError>;

    /// Inserts or replaces the rows for `record.domain`
    async fn upsert(&self, record: StoredDomain) -> Result<(), PersistenceError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: DashMap<String, StoredDomain>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self, domain: &str) -> Result<Option<StoredDomain>, PersistenceError> {
        Ok(self.rows.get(domain).map(|row| row.clone()))
    }

    async fn upsert(&self, record: StoredDomain) -> Result<(), PersistenceError> {
        let key = record.domain.clone();
        let merged = record.merged_with(self.rows.get(&key).as_deref());
        self.rows.insert(key, merged);
        Ok(())
    }
}

/// Distinguishes temporary files of overlapping writes
static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory of `<domain>.json` documents
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// The directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        let file_name: String = domain
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name.trim_start_matches('.')))
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn load(&self, domain: &str) -> Result<Option<StoredDomain>, PersistenceError> {
        let path = self.path_for(domain);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn upsert(&self, record: StoredDomain) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let existing = self.load(&record.domain).await.ok().flatten();
        let record = record.merged_with(existing.as_ref());
        let path = self.path_for(&record.domain);
        let json = serde_json::to_vec_pretty(&record)?;

        // write-then-rename so readers never see a half-written document
        let tmp = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Stored {} at {}", record.domain, path.display());
        Ok(())
    }
}
