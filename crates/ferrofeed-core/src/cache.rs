//! Cache layer: TTL-bounded key/value store for resolved records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::{BoxFuture, CacheKey, CanonicalRecord, DatasetClass, UtcDateTime};

/// How one `resolve()` call uses the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Serve a fresh entry if present; otherwise fetch and write it. (Default)
    #[default]
    Use,
    /// Skip the read, fetch, and overwrite the entry.
    Refresh,
    /// Skip the read and do not write the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// Per-dataset time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub simple_price: Duration,
    pub market_chart: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            simple_price: Duration::from_secs(120),
            market_chart: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl TtlPolicy {
    pub const fn ttl_for(&self, dataset: DatasetClass) -> Duration {
        match dataset {
            DatasetClass::SimplePrice => self.simple_price,
            DatasetClass::MarketChart => self.market_chart,
        }
    }
}

/// A stored payload and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Arc<CanonicalRecord>,
    pub stored_at: UtcDateTime,
    pub ttl: Duration,
}

impl CacheEntry {
    /// An entry expires once its age reaches the TTL.
    pub fn is_fresh(&self, now: UtcDateTime) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    pub fn expires_at(&self) -> UtcDateTime {
        self.stored_at.saturating_add(self.ttl)
    }
}

/// Shared store abstraction consumed by the coordinator.
///
/// `set` must be all-or-nothing: concurrent readers observe either the
/// previous payload or the new one.
pub trait PayloadCache: Send + Sync {
    /// Fresh entry for `key`; expired entries read as misses.
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Option<CacheEntry>>;

    fn set<'a>(
        &'a self,
        key: CacheKey,
        payload: Arc<CanonicalRecord>,
        ttl: Duration,
    ) -> BoxFuture<'a, ()>;

    /// Drop expired entries, returning how many were removed.
    fn purge_expired<'a>(&'a self) -> BoxFuture<'a, usize>;
}

/// Thread-safe in-memory cache.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Raw entry regardless of freshness.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl PayloadCache for CacheStore {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Option<CacheEntry>> {
        Box::pin(async move {
            let now = self.clock.now();
            let entries = self.entries.read().await;
            entries.get(key).filter(|entry| entry.is_fresh(now)).cloned()
        })
    }

    fn set<'a>(
        &'a self,
        key: CacheKey,
        payload: Arc<CanonicalRecord>,
        ttl: Duration,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let entry = CacheEntry {
                key: key.clone(),
                payload,
                stored_at: self.clock.now(),
                ttl,
            };
            self.entries.write().await.insert(key, entry);
        })
    }

    fn purge_expired<'a>(&'a self) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.is_fresh(now));
            before - entries.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{AssetId, Currency, DataRequest, PriceSnapshot, ProviderId};

    fn start() -> UtcDateTime {
        UtcDateTime::parse("2024-05-01T00:00:00Z").expect("ts")
    }

    fn record(price: f64) -> Arc<CanonicalRecord> {
        Arc::new(CanonicalRecord::SimplePrice(PriceSnapshot {
            asset: AssetId::parse("BTC").expect("asset"),
            currency: Currency::usd(),
            price,
            market_cap: None,
            volume_24h: None,
            change_24h_pct: None,
            last_updated: None,
            source: ProviderId::CoinGecko,
            fetched_at: start(),
        }))
    }

    fn key() -> CacheKey {
        DataRequest::simple_price(AssetId::parse("BTC").expect("asset"), Currency::usd()).cache_key()
    }

    #[tokio::test]
    async fn test_cache_store_basic_operations() {
        let cache = CacheStore::new(Arc::new(ManualClock::new(start())));

        assert!(cache.get(&key()).await.is_none());

        cache.set(key(), record(1.0), Duration::from_secs(60)).await;
        let hit = cache.get(&key()).await.expect("hit");
        assert_eq!(hit.payload.as_price().map(|p| p.price), Some(1.0));

        cache.set(key(), record(2.0), Duration::from_secs(60)).await;
        let hit = cache.get(&key()).await.expect("hit");
        assert_eq!(hit.payload.as_price().map(|p| p.price), Some(2.0));
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let clock = ManualClock::new(start());
        let cache = CacheStore::new(Arc::new(clock.clone()));
        let ttl = Duration::from_secs(120);
        cache.set(key(), record(1.0), ttl).await;

        clock.advance(ttl - Duration::from_millis(1));
        assert!(cache.get(&key()).await.is_some(), "hit just before expiry");

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&key()).await.is_none(), "age == ttl is expired");

        clock.advance(Duration::from_millis(1));
        assert!(cache.get(&key()).await.is_none(), "miss after expiry");
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let clock = ManualClock::new(start());
        let cache = CacheStore::new(Arc::new(clock.clone()));
        let chart_key =
            "market-chart:BTC:USD:daily:30".parse::<DataRequest>().expect("request").cache_key();

        cache.set(key(), record(1.0), Duration::from_secs(10)).await;
        cache.set(chart_key.clone(), record(1.0), Duration::from_secs(100)).await;

        clock.advance(Duration::from_secs(50));
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.peek(&chart_key).await.is_some());
    }

    #[test]
    fn test_ttl_policy_is_per_dataset() {
        let policy = TtlPolicy::default();
        assert!(policy.ttl_for(DatasetClass::SimplePrice) < policy.ttl_for(DatasetClass::MarketChart));
    }

    #[test]
    fn test_cache_mode_default() {
        let mode: CacheMode = Default::default();
        assert_eq!(mode, CacheMode::Use);
        assert!(!CacheMode::Refresh.reads());
        assert!(CacheMode::Refresh.writes());
        assert!(!CacheMode::Bypass.writes());
    }
}
