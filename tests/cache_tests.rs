mod common;

use chrono::{Duration, TimeZone, Utc};
use common::BrokenStore;
use domintel::cache::{CacheManager, CacheMiss};
use domintel::clock::ManualClock;
use domintel::model::{DomainRecord, Field, OperatorInfo, Provenance, RecordOrigin, RegistrationInfo, SecurityInfo};
use domintel::store::{MemoryStore, RecordStore};
use std::collections::BTreeMap;
use std::sync::Arc;

fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn meaningful_record(domain: &str) -> DomainRecord {
    let mut record = DomainRecord::empty(domain, start());
    record.network.addresses = vec!["200.27.1.1".parse().unwrap()];
    record.registration = RegistrationInfo {
        registrar: Field::Known("NIC Chile".to_string()),
        registrant_name: Field::Known("Comercial Andes SpA".to_string()),
        provenance: Provenance::Live {
            relay: "rdap.org".to_string(),
        },
        ..Default::default()
    };
    record.operator = OperatorInfo {
        name: "Entel Chile".to_string(),
        ..Default::default()
    };
    record.security = SecurityInfo {
        https_enabled: true,
        headers: BTreeMap::from([("x-frame-options".to_string(), "DENY".to_string())]),
        ..Default::default()
    };
    record
}

fn manager(store: Arc<dyn RecordStore>) -> (CacheManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let cache = CacheManager::new(store, clock.clone(), Duration::hours(24));
    (cache, clock)
}

#[tokio::test]
async fn test_fresh_meaningful_record_is_reused() {
    let (cache, clock) = manager(Arc::new(MemoryStore::new()));
    cache.write(&meaningful_record("andes.cl")).await.unwrap();

    clock.advance(Duration::hours(1));
    let hit = cache.lookup("andes.cl").await.unwrap();

    assert_eq!(hit.origin, RecordOrigin::Cache);
    assert_eq!(hit.analyzed_at, start());
    assert_eq!(hit.operator.name, "Entel Chile");
    assert_eq!(hit.registration.registrant_name, Field::Known("Comercial Andes SpA".to_string()));
}

#[tokio::test]
async fn test_record_older_than_threshold_is_stale() {
    let (cache, clock) = manager(Arc::new(MemoryStore::new()));
    cache.write(&meaningful_record("andes.cl")).await.unwrap();

    clock.advance(Duration::hours(25));
    assert_eq!(cache.lookup("andes.cl").await, Err(CacheMiss::Stale { age_hours: 25 }));
    assert!(cache.read("andes.cl").await.is_none());
}

#[tokio::test]
async fn test_redacted_registrant_is_never_reused() {
    let (cache, clock) = manager(Arc::new(MemoryStore::new()));
    let mut record = meaningful_record("privado.cl");
    record.registration.registrant_name = Field::Redacted;
    record.registration.privacy_protected = true;
    cache.write(&record).await.unwrap();

    clock.advance(Duration::hours(2));
    assert_eq!(
        cache.lookup("privado.cl").await,
        Err(CacheMiss::NotMeaningful("registration"))
    );
}

#[tokio::test]
async fn test_registry_data_without_registrant_is_reused() {
    let (cache, clock) = manager(Arc::new(MemoryStore::new()));
    let mut record = meaningful_record("sinpersona.cl");
    record.registration.created = Field::Known(Utc.with_ymd_and_hms(2011, 5, 2, 0, 0, 0).unwrap());
    record.registration.registrant_name = Field::Unavailable;
    cache.write(&record).await.unwrap();

    clock.advance(Duration::hours(1));
    let hit = cache.lookup("sinpersona.cl").await.unwrap();

    assert_eq!(hit.origin, RecordOrigin::Cache);
    assert_eq!(hit.registration.registrar, Field::Known("NIC Chile".to_string()));
    assert_eq!(hit.registration.registrant_name, Field::Unavailable);
}

#[tokio::test]
async fn test_default_only_categories_are_misses() {
    let (cache, _clock) = manager(Arc::new(MemoryStore::new()));

    let mut record = meaningful_record("vacio.cl");
    record.network.addresses.clear();
    cache.write(&record).await.unwrap();
    assert_eq!(cache.lookup("vacio.cl").await, Err(CacheMiss::NotMeaningful("network")));

    let mut record = meaningful_record("sintetico.cl");
    record.registration.provenance = Provenance::Synthetic;
    cache.write(&record).await.unwrap();
    assert_eq!(
        cache.lookup("sintetico.cl").await,
        Err(CacheMiss::NotMeaningful("registration"))
    );

    assert_eq!(cache.lookup("nunca.cl").await, Err(CacheMiss::NotStored));
}

#[tokio::test]
async fn test_store_failures_are_swallowed() {
    let (cache, _clock) = manager(Arc::new(BrokenStore));

    // the background task logs the failure and finishes normally
    cache.write(&meaningful_record("andes.cl")).await.unwrap();
    assert!(matches!(cache.lookup("andes.cl").await, Err(CacheMiss::StoreError(_))));
    assert!(cache.read("andes.cl").await.is_none());
}
