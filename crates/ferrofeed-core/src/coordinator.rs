//! # Fetch Coordinator
//!
//! Entry point for every read. Per key the coordinator moves between
//! `Idle` and `InFlight`:
//!
//! ```text
//! resolve(request)
//!   ├─ cache hit ─────────────────────────────► record
//!   └─ miss ─► lease for key?
//!        ├─ none: create lease, spawn fetch ─┐
//!        └─ in flight: join as waiter ───────┤
//!                                            ▼
//!          quota ─► provider (retries) ─► normalize ─► store append ─► cache set
//!                                            │
//!                  outcome broadcast to every caller, lease removed
//! ```
//!
//! The fetch runs in its own task, so a caller that times out or is dropped
//! only stops waiting; the fetch and the other waiters are unaffected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cache::{CacheMode, CacheStore, PayloadCache, TtlPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::FeedConfig;
use crate::normalize::Normalizer;
use crate::persistence::{MemoryRecordStore, RangeQuery, RecordStore, StoreError};
use crate::provider::Upstream;
use crate::rate_limit::{FixedWindowLimiter, LimiterKey, QuotaPolicy, RateLimiter};
use crate::{CacheKey, CanonicalRecord, DataRequest, FetchError, UtcDateTime};

/// Caller identity used for quota accounting when none is supplied.
pub const ANONYMOUS_CALLER: &str = "anonymous";

type Outcome = Result<Arc<CanonicalRecord>, FetchError>;

/// Per-call knobs for [`FetchCoordinator::resolve_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub cache_mode: CacheMode,
    /// How long to wait for an in-flight fetch. `None` uses the
    /// coordinator's default.
    pub timeout: Option<Duration>,
    /// Quota identity charged if this call ends up performing the fetch.
    pub caller: Option<String>,
}

impl ResolveOptions {
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// A resolved record and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub record: Arc<CanonicalRecord>,
    pub key: CacheKey,
    /// Served from the cache without touching a lease.
    pub cache_hit: bool,
    /// Joined a fetch another caller started.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Idle,
    InFlight,
}

/// Snapshot of an in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub state: LeaseState,
    pub created_at: UtcDateTime,
    /// Callers that joined the fetch and are still waiting on it.
    pub waiter_count: usize,
}

struct FetchLease {
    created_at: UtcDateTime,
    waiters: AtomicUsize,
    outcome: watch::Sender<Option<Outcome>>,
}

/// Counts a joined caller for as long as it waits.
struct WaiterSlot(Arc<FetchLease>);

impl WaiterSlot {
    fn join(lease: Arc<FetchLease>) -> Self {
        lease.waiters.fetch_add(1, Ordering::SeqCst);
        Self(lease)
    }
}

impl Drop for WaiterSlot {
    fn drop(&mut self) {
        self.0.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    cache: Arc<dyn PayloadCache>,
    limiter: Arc<dyn RateLimiter>,
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    normalizer: Normalizer,
    ttl: TtlPolicy,
    quota: QuotaPolicy,
    default_timeout: Option<Duration>,
    leases: DashMap<CacheKey, Arc<FetchLease>>,
}

/// Resolves the lease exactly once, even if the fetch task unwinds.
struct LeaseGuard {
    inner: Arc<Inner>,
    key: CacheKey,
    lease: Arc<FetchLease>,
    resolved: bool,
}

impl LeaseGuard {
    fn resolve(mut self, outcome: Outcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.lease.outcome.send_replace(Some(outcome));
        self.inner
            .leases
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.lease));
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(key = %self.key, "fetch ended without an outcome");
            let key = self.key.clone();
            self.finish(Err(FetchError::FetchAborted { key }));
        }
    }
}

/// Single-flight, cache-first record resolver. Clones share state.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    pub fn builder(upstream: Arc<dyn Upstream>) -> FetchCoordinatorBuilder {
        FetchCoordinatorBuilder::new(upstream)
    }

    /// Resolve with default options.
    pub async fn resolve(&self, request: &DataRequest) -> Result<ResolvedRecord, FetchError> {
        self.resolve_with(request, ResolveOptions::default()).await
    }

    pub async fn resolve_with(
        &self,
        request: &DataRequest,
        options: ResolveOptions,
    ) -> Result<ResolvedRecord, FetchError> {
        let key = request.cache_key();

        if options.cache_mode.reads() {
            if let Some(entry) = self.inner.cache.get(&key).await {
                tracing::debug!(key = %key, "cache hit");
                return Ok(ResolvedRecord {
                    record: entry.payload,
                    key,
                    cache_hit: true,
                    shared: false,
                });
            }
        }

        let (lease, shared) = self.lease_for(&key, request, &options);
        let receiver = lease.outcome.subscribe();
        let slot = shared.then(|| WaiterSlot::join(Arc::clone(&lease)));
        if shared {
            tracing::debug!(key = %key, "joined in-flight fetch");
        }

        let timeout = options.timeout.or(self.inner.default_timeout);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait_for_outcome(receiver, &key)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(key = %key, waited_ms = limit.as_millis() as u64, "gave up waiting for fetch");
                    Err(FetchError::LeaseTimeout { key: key.clone(), waited: limit })
                }
            },
            None => wait_for_outcome(receiver, &key).await,
        };
        drop(slot);

        outcome.map(|record| ResolvedRecord {
            record,
            key,
            cache_hit: false,
            shared,
        })
    }

    /// Find the in-flight lease for `key` or start a fetch. Returns whether
    /// the caller joined an existing lease.
    fn lease_for(
        &self,
        key: &CacheKey,
        request: &DataRequest,
        options: &ResolveOptions,
    ) -> (Arc<FetchLease>, bool) {
        let lease = match self.inner.leases.entry(key.clone()) {
            Entry::Occupied(existing) => return (Arc::clone(existing.get()), true),
            Entry::Vacant(vacant) => {
                let (sender, _) = watch::channel(None);
                let lease = Arc::new(FetchLease {
                    created_at: self.inner.clock.now(),
                    waiters: AtomicUsize::new(0),
                    outcome: sender,
                });
                vacant.insert(Arc::clone(&lease));
                lease
            }
        };

        let guard = LeaseGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            lease: Arc::clone(&lease),
            resolved: false,
        };
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        let key = key.clone();
        let cache_mode = options.cache_mode;
        let caller = options
            .caller
            .clone()
            .unwrap_or_else(|| ANONYMOUS_CALLER.to_owned());

        tokio::spawn(async move {
            let outcome = inner.fetch(&request, &key, cache_mode, &caller).await;
            guard.resolve(outcome);
        });

        (lease, false)
    }

    pub fn lease_state(&self, key: &CacheKey) -> LeaseState {
        if self.inner.leases.contains_key(key) {
            LeaseState::InFlight
        } else {
            LeaseState::Idle
        }
    }

    pub fn lease_info(&self, key: &CacheKey) -> Option<LeaseInfo> {
        self.inner.leases.get(key).map(|lease| LeaseInfo {
            state: LeaseState::InFlight,
            created_at: lease.created_at,
            waiter_count: lease.waiters.load(Ordering::SeqCst),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.leases.len()
    }

    /// Drop expired cache entries.
    pub async fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired().await
    }

    /// Drop quota windows that have closed.
    pub async fn purge_closed_windows(&self) -> usize {
        self.inner.limiter.purge_closed().await
    }

    /// Time-series read from the record store.
    pub async fn history(&self, query: &RangeQuery) -> Result<Vec<CanonicalRecord>, StoreError> {
        self.inner.store.query_range(query).await
    }
}

impl Inner {
    /// The sole fetcher's work. Nothing is written unless every step before
    /// the write succeeded.
    async fn fetch(
        &self,
        request: &DataRequest,
        key: &CacheKey,
        cache_mode: CacheMode,
        caller: &str,
    ) -> Outcome {
        // A fetch that finished between this caller's cache miss and its
        // lease creation has already written the entry.
        if cache_mode.reads() {
            if let Some(entry) = self.cache.get(key).await {
                return Ok(entry.payload);
            }
        }

        let provider = self.upstream.schema();
        let limiter_key = LimiterKey::new(caller, provider.as_str());
        let decision = self
            .limiter
            .allow(&limiter_key, self.quota.window, self.quota.max_count)
            .await;
        if !decision.granted {
            tracing::warn!(
                key = %key,
                counter = %decision.counter_id,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "quota exhausted"
            );
            return Err(FetchError::RateLimited {
                limiter_key: limiter_key.to_string(),
                retry_after: decision.retry_after,
            });
        }

        let fetch_id = Uuid::new_v4();
        tracing::info!(%fetch_id, key = %key, %provider, "fetching from upstream");
        let raw = self.upstream.fetch(request).await?;

        let provider_asset = self.upstream.asset_id_for(request.asset());
        let record = self
            .normalizer
            .normalize(&raw, request, &provider_asset)
            .map_err(|mismatch| {
                tracing::warn!(
                    %fetch_id,
                    key = %key,
                    %provider,
                    field = %mismatch.field,
                    reason = %mismatch.reason,
                    "upstream data-quality issue: payload does not match schema"
                );
                FetchError::from(mismatch)
            })?;

        self.store.append(&record).await.map_err(|error| {
            tracing::warn!(%fetch_id, key = %key, error = %error, "failed to persist record");
            FetchError::Persistence(error.to_string())
        })?;

        let record = Arc::new(record);
        if cache_mode.writes() {
            let ttl = self.ttl.ttl_for(request.dataset());
            self.cache.set(key.clone(), Arc::clone(&record), ttl).await;
        }

        tracing::info!(%fetch_id, key = %key, "record resolved");
        Ok(record)
    }
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Option<Outcome>>, key: &CacheKey) -> Outcome {
    let outcome = match receiver.wait_for(Option::is_some).await {
        Ok(current) => current.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| Err(FetchError::FetchAborted { key: key.clone() }))
}

/// Assembles a [`FetchCoordinator`]. Unset collaborators default to the
/// in-process implementations sharing one clock.
pub struct FetchCoordinatorBuilder {
    upstream: Arc<dyn Upstream>,
    cache: Option<Arc<dyn PayloadCache>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    store: Option<Arc<dyn RecordStore>>,
    clock: Option<Arc<dyn Clock>>,
    ttl: TtlPolicy,
    quota: QuotaPolicy,
    default_timeout: Option<Duration>,
}

impl FetchCoordinatorBuilder {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            cache: None,
            limiter: None,
            store: None,
            clock: None,
            ttl: TtlPolicy::default(),
            quota: QuotaPolicy::default(),
            default_timeout: None,
        }
    }

    /// Apply TTL, quota and lease timeout from `config`.
    pub fn config(mut self, config: &FeedConfig) -> Self {
        self.ttl = config.ttl;
        self.quota = config.quota;
        self.default_timeout = Some(config.lease_timeout);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn PayloadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn quota(mut self, quota: QuotaPolicy) -> Self {
        self.quota = quota;
        self
    }

    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn build(self) -> FetchCoordinator {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheStore::new(Arc::clone(&clock))));
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(FixedWindowLimiter::new(Arc::clone(&clock))));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryRecordStore::new()));

        FetchCoordinator {
            inner: Arc::new(Inner {
                cache,
                limiter,
                upstream: self.upstream,
                store,
                clock,
                normalizer: Normalizer,
                ttl: self.ttl,
                quota: self.quota,
                default_timeout: self.default_timeout,
                leases: DashMap::new(),
            }),
        }
    }
}
