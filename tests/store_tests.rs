use anyhow::Result;
use std::sync::Arc;
use chrono::{Duration, TimeZone, Utc};
use domintel::model::{NetworkRecordSet, SecurityInfo};
use domintel::store::{CacheEntry, JsonFileStore, MemoryStore, RecordStore, StoredDomain};

fn row(domain: &str, hour: u32) -> StoredDomain {
    let at = Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap();
    StoredDomain {
        domain: domain.to_string(),
        created_at: at,
        updated_at: at,
        network: Some(CacheEntry {
            value: NetworkRecordSet {
                addresses: vec!["200.27.1.1".parse().unwrap()],
                name_servers: vec!["ns1.hostingplus.cl".to_string()],
                ..Default::default()
            },
            cached_at: at,
            meaningful: true,
        }),
        registration: None,
        hosting: None,
        security: Some(CacheEntry {
            value: SecurityInfo::default(),
            cached_at: at,
            meaningful: false,
        }),
    }
}

async fn exercise(store: &dyn RecordStore) -> Result<()> {
    assert_eq!(store.load("tienda.cl").await?, None);

    let first = row("tienda.cl", 8);
    store.upsert(first.clone()).await?;
    assert_eq!(store.load("tienda.cl").await?, Some(first.clone()));

    // a later upsert replaces the categories but keeps the creation time
    let second = row("tienda.cl", 10);
    store.upsert(second.clone()).await?;
    let loaded = store.load("tienda.cl").await?.unwrap();
    assert_eq!(loaded.created_at, first.created_at);
    assert_eq!(loaded.updated_at, second.updated_at);
    assert_eq!(loaded.network.unwrap().cached_at, first.created_at + Duration::hours(2));

    assert_eq!(store.load("otra.cl").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_memory_store() -> Result<()> {
    let store = MemoryStore::new();
    exercise(&store).await?;
    assert_eq!(store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_json_file_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("records"));
    exercise(&store).await?;

    assert!(dir.path().join("records").join("tienda.cl.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_json_file_store_reports_corrupt_documents() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("roto.cl.json"), "{ not json")?;

    let store = JsonFileStore::new(dir.path());
    assert!(store.load("roto.cl").await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_writes_to_one_document() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(JsonFileStore::new(dir.path()));

    let writes: Vec<_> = (0..8)
        .map(|hour| {
            let store = store.clone();
            tokio::spawn(async move { store.upsert(row("tienda.cl", hour)).await })
        })
        .collect();
    for write in futures::future::join_all(writes).await {
        write??;
    }

    let loaded = store.load("tienda.cl").await?.unwrap();
    assert_eq!(loaded.domain, "tienda.cl");

    // no temporary files are left behind
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
    Ok(())
}
