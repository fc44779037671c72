//! Analysis orchestration
//!
//! [`DomainAnalyzer`] ties the resolution steps together:
//! - Input normalisation and validation (an invalid name still yields a
//!   complete record, without any network call)
//! - Durable cache read, returning a reusable record when one exists
//! - Concurrent resolution: DNS records (then the operator lookup fed by the
//!   primary address), registration, fingerprint and transport security
//! - Merge into one [`DomainRecord`], with every failed category at its
//!   default and a note in [`DomainRecord::degraded`]
//! - Background persistence that never delays the returned record
//! - Batch processing of domain files with rate limiting
//!
//! Concurrent `analyze` calls for the same domain share a single in-flight
//! resolution. The in-flight map only holds weak handles: once every caller
//! waiting on a resolution is gone, the resolution is dropped and its entry
//! removed.

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::chain::ResolverChain;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::dns::RecordResolver;
use crate::fingerprint::{reconcile_hosting, FingerprintDetector};
use crate::http::HttpClient;
use crate::model::DomainRecord;
use crate::operator::{IpApiService, OperatorResolver, RangeTable, ReputationTable};
use crate::rate_limit::{create_batch_limiter, create_operator_api_limiter, create_relay_limiter, RateLimiter};
use crate::registration::{RegistrationRetriever, RegistrationSnapshot};
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize_record;
use crate::security::SecurityChecker;
use crate::store::RecordStore;
use crate::validation::prepare_domain;

type Flight = Shared<BoxFuture<'static, DomainRecord>>;

/// Flight id and a handle that does not keep the flight alive
type InFlight = (u64, WeakShared<BoxFuture<'static, DomainRecord>>);

/// Owned by a flight; clears its map entry when the flight finishes or is dropped
struct FlightGuard {
    in_flight: Arc<DashMap<String, InFlight>>,
    domain: String,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove_if(&self.domain, |_, (id, _)| *id == self.id);
    }
}

/// The resolution steps an analyzer is assembled from
pub struct Components {
    pub records: RecordResolver,
    pub registration: RegistrationRetriever,
    pub operator: OperatorResolver,
    pub fingerprint: FingerprintDetector,
    pub security: SecurityChecker,
    pub cache: CacheManager,
}

/// Aggregates domain intelligence from every resolution step
///
/// # Examples
///
/// ```no_run
/// use domintel::config::Settings;
/// use domintel::core::DomainAnalyzer;
/// use domintel::store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let analyzer = DomainAnalyzer::new(&Settings::default(), Arc::new(MemoryStore::new()))?;
///
/// let record = analyzer.analyze("example.cl").await;
/// println!("operator: {}", record.operator.name);
/// for note in &record.degraded {
///     eprintln!("degraded: {}", note);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DomainAnalyzer {
    records: Arc<RecordResolver>,
    registration: Arc<RegistrationRetriever>,
    operator: Arc<OperatorResolver>,
    fingerprint: Arc<FingerprintDetector>,
    security: Arc<SecurityChecker>,
    cache: CacheManager,
    in_flight: Arc<DashMap<String, InFlight>>,
    next_flight: Arc<AtomicU64>,
    pending_writes: Arc<Mutex<Vec<JoinHandle<()>>>>,
    concurrent_limit: usize,
}

impl DomainAnalyzer {
    /// Builds the live resolution stack described by `settings`
    pub fn new(settings: &Settings, store: Arc<dyn RecordStore>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fetcher = Arc::new(HttpClient::new(settings.fetch_timeout())?);
        let api_client = HttpClient::new(settings.relay_timeout())?;

        let records = RecordResolver::new(settings.dns_timeout()).context("Failed to create DNS resolver")?;

        let relay_chain = RegistrationRetriever::relay_chain(
            &settings.registration_relays,
            &api_client,
            settings.relay_timeout(),
            Arc::new(create_relay_limiter()),
        );
        let registration = RegistrationRetriever::new(
            relay_chain,
            RetryPolicy::linear(settings.registration_attempts, settings.registration_backoff()),
            RegistrationSnapshot::bundled(),
            settings.registration_cache_ttl(),
            clock.clone(),
        );

        let operator_service = IpApiService::new(&settings.operator_endpoint, api_client)
            .with_rate_limiter(Arc::new(create_operator_api_limiter()));
        let reputation = match &settings.reputation_file {
            Some(path) => ReputationTable::from_file(path)?,
            None => ReputationTable::default(),
        };
        let operator = OperatorResolver::new(
            ResolverChain::new("operator", settings.operator_timeout()).with_alternate(Arc::new(operator_service)),
            RangeTable::bundled(),
            reputation,
            &settings.home_country,
        );

        let components = Components {
            records,
            registration,
            operator,
            fingerprint: FingerprintDetector::new(fetcher.clone(), settings.fetch_timeout()),
            security: SecurityChecker::new(fetcher, settings.fetch_timeout()),
            cache: CacheManager::new(store, clock, settings.staleness()),
        };

        Ok(Self::from_components(components, settings.concurrent_requests))
    }

    pub fn from_components(components: Components, concurrent_limit: usize) -> Self {
        Self {
            records: Arc::new(components.records),
            registration: Arc::new(components.registration),
            operator: Arc::new(components.operator),
            fingerprint: Arc::new(components.fingerprint),
            security: Arc::new(components.security),
            cache: components.cache,
            in_flight: Arc::new(DashMap::new()),
            next_flight: Arc::new(AtomicU64::new(0)),
            pending_writes: Arc::new(Mutex::new(Vec::new())),
            concurrent_limit: concurrent_limit.max(1),
        }
    }

    /// Analyses one domain; never fails
    ///
    /// The returned record's `domain` is `input` verbatim, while lookups and
    /// the cache use the normalised name. A reusable cached record is
    /// returned as is. Otherwise every step is resolved, the merged record is
    /// handed to the cache in the background, and returned without waiting
    /// for the write.
    pub async fn analyze(&self, input: &str) -> DomainRecord {
        let domain = match prepare_domain(input) {
            Ok(domain) => domain,
            Err(e) => {
                warn!("Not analysing '{}': {}", input, e);
                let mut record = DomainRecord::empty(input, self.cache.clock().now());
                record.degraded.push(format!("domain: {}", e));
                return record;
            }
        };

        let flight = {
            let entry = self.in_flight.entry(domain.clone());
            let joined = match &entry {
                Entry::Occupied(current) => current.get().1.upgrade(),
                Entry::Vacant(_) => None,
            };
            match joined {
                Some(flight) => {
                    debug!("Joining in-flight analysis of {}", domain);
                    flight
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = self.start_flight(domain.clone(), id);
                    if let Some(weak) = flight.downgrade() {
                        entry.insert((id, weak));
                    }
                    flight
                }
            }
        };

        let mut record = flight.await;
        // the record answers for the name as the caller wrote it
        record.domain = input.to_string();
        record
    }

    /// Number of distinct domains currently being resolved
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn start_flight(&self, domain: String, id: u64) -> Flight {
        let analyzer = self.clone();
        let guard = FlightGuard {
            in_flight: self.in_flight.clone(),
            domain,
            id,
        };
        async move {
            let record = analyzer.resolve(&guard.domain).await;
            drop(guard);
            record
        }
        .boxed()
        .shared()
    }

    /// The stored record for `input`, if it is still reusable
    pub async fn load_cached(&self, input: &str) -> Option<DomainRecord> {
        let domain = prepare_domain(input).ok()?;
        let mut record = self.cache.read(&domain).await?;
        record.domain = input.to_string();
        Some(record)
    }

    /// Waits for every background cache write started so far
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending_writes.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *pending)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Cache write task failed: {}", e);
            }
        }
    }

    async fn resolve(&self, domain: &str) -> DomainRecord {
        if let Some(record) = self.cache.read(domain).await {
            info!("Using cached analysis for {}", domain);
            return record;
        }

        let start = Instant::now();
        debug!("Starting analysis of {}", domain);

        // the operator lookup needs the primary address, so it follows DNS
        let network_then_operator = async {
            let network = self.records.resolve(domain).await;
            let operator = self.operator.resolve(network.value().primary_address()).await;
            (network, operator)
        };

        let ((network, operator), registration, fingerprint, security) = tokio::join!(
            network_then_operator,
            self.registration.retrieve(domain),
            self.fingerprint.detect(domain),
            self.security.check(domain),
        );

        let mut record = DomainRecord::empty(domain, self.cache.clock().now());
        record.degraded = [
            network.degradation("network"),
            registration.degradation("registration"),
            operator.degradation("operator"),
            fingerprint.degradation("software"),
            security.degradation("security"),
        ]
        .into_iter()
        .flatten()
        .collect();

        record.network = network.into_value();
        record.registration = registration.into_value();
        record.operator = operator.into_value();
        record.security = security.into_value();

        let report = fingerprint.into_value();
        record.software = report.profile;
        record.software.hosting_operator = reconcile_hosting(
            &record.network.name_servers,
            &record.operator,
            report.header_identity.as_deref(),
        );

        info!(
            "Analysed {} in {}ms ({} degraded categories)",
            domain,
            start.elapsed().as_millis(),
            record.degraded.len()
        );

        self.track_write(self.cache.write(&record));
        record
    }

    fn track_write(&self, handle: JoinHandle<()>) {
        let mut pending = self.pending_writes.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Analyses every domain listed in `input_file`
    ///
    /// The file is streamed, one domain per line; blank lines and lines
    /// starting with `#` are skipped. Domains are analysed in chunks of
    /// `chunk_size`, at most `rate_limit` per minute, and each chunk's
    /// sanitised results are written as JSON lines to `output_file` (or
    /// pretty-printed to stdout) before the next chunk starts.
    pub async fn process_batch(
        &self,
        input_file: &Path,
        output_file: Option<&PathBuf>,
        chunk_size: usize,
        rate_limit: u64,
    ) -> Result<usize> {
        let chunk_size = chunk_size.max(1);
        let mut output = match output_file {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to create output file {}", path.display()))?,
            ),
            None => None,
        };

        let rate_limiter = Arc::new(create_batch_limiter(rate_limit, self.concurrent_limit));

        let file = File::open(input_file)
            .await
            .with_context(|| format!("Failed to open domain file {}", input_file.display()))?;
        let mut reader = BufReader::with_capacity(64 * 1024, file);

        let mut processed = 0;
        let mut chunk = Vec::with_capacity(chunk_size);
        let mut line = String::new();

        info!("Processing domains from {}", input_file.display());

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }

            let domain = line.trim();
            if domain.is_empty() || domain.starts_with('#') {
                continue;
            }
            chunk.push(domain.to_string());

            if chunk.len() >= chunk_size {
                processed += chunk.len();
                info!("Processing chunk of {} domains ({} total so far)", chunk.len(), processed);
                let results = self.process_chunk(&chunk, &rate_limiter).await;
                emit(&results, output.as_mut()).await?;
                chunk.clear();
            }
        }

        if !chunk.is_empty() {
            processed += chunk.len();
            info!("Processing final chunk of {} domains", chunk.len());
            let results = self.process_chunk(&chunk, &rate_limiter).await;
            emit(&results, output.as_mut()).await?;
        }

        self.flush().await;
        info!("Batch processing completed, {} domains analysed", processed);
        Ok(processed)
    }

    async fn process_chunk(&self, domains: &[String], rate_limiter: &Arc<RateLimiter>) -> Vec<DomainRecord> {
        use futures::{stream, StreamExt};

        stream::iter(domains)
            .map(|domain| {
                let analyzer = self.clone();
                let rate_limiter = rate_limiter.clone();
                let domain = domain.clone();

                async move {
                    let _permit = match rate_limiter.acquire().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("Failed to acquire rate limit permit for {}: {}", domain, e);
                            let mut record = DomainRecord::empty(&domain, analyzer.cache.clock().now());
                            record.degraded.push(format!("batch: rate limiting error: {}", e));
                            return record;
                        }
                    };
                    analyzer.analyze(&domain).await
                }
            })
            .buffer_unordered(self.concurrent_limit)
            .collect()
            .await
    }
}

async fn emit(records: &[DomainRecord], output: Option<&mut File>) -> Result<()> {
    match output {
        Some(writer) => {
            for record in records {
                let mut line = serde_json::to_vec(&sanitize_record(record))?;
                line.push(b'\n');
                writer.write_all(&line).await?;
            }
            writer.flush().await?;
        }
        None => {
            for record in records {
                println!("{}", serde_json::to_string_pretty(&sanitize_record(record))?);
            }
        }
    }
    Ok(())
}
