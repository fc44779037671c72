#![allow(dead_code)]

use async_trait::async_trait;
use domintel::chain::Alternate;
use domintel::dns::{RecordAnswer, RecordKind, RecordQuery};
use domintel::error::{PersistenceError, SourceError};
use domintel::http::{ContentFetcher, FetchedPage};
use domintel::store::{RecordStore, StoredDomain};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An alternate that waits `delay` and then answers with a fixed result
pub struct Scripted<T> {
    name: String,
    delay: Duration,
    response: Result<T, SourceError>,
    calls: Arc<AtomicUsize>,
}

impl<T> Scripted<T> {
    pub fn ok(name: &str, value: T) -> Self {
        Self::new(name, Ok(value))
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, Err(SourceError::unavailable(name, "connection refused")))
    }

    fn new(name: &str, response: Result<T, SourceError>) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            response,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl<I, T> Alternate<I, T> for Scripted<T>
where
    I: ?Sized + Sync,
    T: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, _input: &I) -> Result<T, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }
}

/// Serves canned pages by URL; unknown URLs fail as unreachable
#[derive(Default)]
pub struct CannedFetcher {
    pages: HashMap<String, FetchedPage>,
    pub calls: AtomicUsize,
}

impl CannedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `url` answers with `page`
    pub fn with_page(mut self, url: &str, page: FetchedPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// `url` answers 200 from `final_url` with the given headers and body
    pub fn serve(self, url: &str, final_url: &str, headers: &[(&str, &str)], body: &str) -> Self {
        let page = FetchedPage {
            requested_url: url.to_string(),
            final_url: final_url.to_string(),
            status: 200,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: body.to_string(),
        };
        self.with_page(url, page)
    }
}

#[async_trait]
impl ContentFetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| SourceError::unavailable(url, "connection refused"))
    }
}

/// A store whose every operation fails
pub struct BrokenStore;

#[async_trait]
impl RecordStore for BrokenStore {
    async fn load(&self, _domain: &str) -> Result<Option<StoredDomain>, PersistenceError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume").into())
    }

    async fn upsert(&self, _record: StoredDomain) -> Result<(), PersistenceError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume").into())
    }
}

/// A DNS service answering from a fixed zone; kinds not in the zone fail
#[derive(Default)]
pub struct FakeZone {
    answers: HashMap<RecordKind, RecordAnswer>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, answer: RecordAnswer) -> Self {
        self.answers.insert(answer.kind(), answer);
        self
    }
}

#[async_trait]
impl Alternate<RecordQuery, RecordAnswer> for FakeZone {
    fn name(&self) -> &str {
        "dns:fake"
    }

    async fn attempt(&self, query: &RecordQuery) -> Result<RecordAnswer, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .get(&query.kind)
            .cloned()
            .ok_or_else(|| SourceError::unavailable("dns:fake", "SERVFAIL"))
    }
}
