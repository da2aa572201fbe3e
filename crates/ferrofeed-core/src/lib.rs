//! # Ferrofeed Core
//!
//! Cache-coordinated fetch pipeline for normalized crypto market data.
//!
//! ## Overview
//!
//! A caller asks for a dataset key (`simple-price:BTC:USD`,
//! `market-chart:ETH:USD:daily:30`). The pipeline serves it from a TTL
//! cache when it can, and otherwise performs exactly one upstream fetch per
//! key no matter how many callers are waiting, gated by a fixed-window
//! quota, retried on transient failure, normalized into a canonical record
//! and written through to the cache and the durable history.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL cache layer and per-dataset TTL policy |
//! | [`clock`] | Injectable time sources |
//! | [`config`] | `FERROFEED_*` environment configuration |
//! | [`coordinator`] | Single-flight `resolve()` entry point |
//! | [`domain`] | Requests, cache keys, canonical records |
//! | [`error`] | Validation and fetch error taxonomy |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`normalize`] | Provider payload to canonical record mapping |
//! | [`persistence`] | Record history seam (memory and `DuckDB`) |
//! | [`provider`] | Provider client with pacing and retry |
//! | [`rate_limit`] | Fixed-window quota gate |
//! | [`refresh`] | Periodic refresh of a configured key set |
//! | [`retry`] | Backoff policy and sleep abstraction |
//! | [`source`] | Provider identifiers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ferrofeed_core::{
//!     DataRequest, FeedConfig, FetchCoordinator, ProviderClient, ReqwestHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FeedConfig::from_env()?;
//!     let upstream = ProviderClient::new(
//!         config.provider_settings()?,
//!         Arc::new(ReqwestHttpClient::new()),
//!     );
//!     let coordinator = FetchCoordinator::builder(Arc::new(upstream))
//!         .config(&config)
//!         .build();
//!
//!     let request: DataRequest = "simple-price:BTC:USD".parse()?;
//!     let resolved = coordinator.resolve(&request).await?;
//!     if let Some(snapshot) = resolved.record.as_price() {
//!         println!("BTC {:.2} USD", snapshot.price);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / caller   │
//! └────────┬────────┘
//!          │ resolve(request)
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ FetchCoordinator│────▶│ Cache Layer      │
//! │ (single flight) │     └──────────────────┘
//! └────────┬────────┘
//!          │ miss
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Rate Limiter    │     │ Provider Client  │
//! │ (fixed window)  │────▶│ (pacing, retry)  │
//! └─────────────────┘     └────────┬─────────┘
//!                                  ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Record Store    │◀────│ Normalizer       │
//! │ (DuckDB/memory) │     └──────────────────┘
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! `resolve()` fails with a [`FetchError`]; every failure has a
//! [`FetchErrorKind`] and a stable dotted code:
//!
//! ```rust
//! use ferrofeed_core::{FetchError, FetchErrorKind};
//!
//! fn describe(error: &FetchError) -> &'static str {
//!     match error.kind() {
//!         FetchErrorKind::RateLimited => "slow down",
//!         FetchErrorKind::LeaseTimeout => "still fetching, try again",
//!         _ if error.is_client_error() => "check the request",
//!         _ => "upstream trouble",
//!     }
//! }
//! ```
//!
//! Failures never leave partial state: nothing is cached or persisted
//! unless the record was fetched, normalized and appended.

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod normalize;
pub mod persistence;
pub mod provider;
pub mod rate_limit;
pub mod refresh;
pub mod retry;
pub mod source;

/// Boxed `Send` future returned by the crate's async trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Caching
pub use cache::{CacheEntry, CacheMode, CacheStore, PayloadCache, TtlPolicy};

// Time
pub use clock::{Clock, ManualClock, SystemClock};

// Configuration
pub use config::FeedConfig;

// Coordinator
pub use coordinator::{
    FetchCoordinator, FetchCoordinatorBuilder, LeaseInfo, LeaseState, ResolveOptions,
    ResolvedRecord,
};

// Domain models
pub use domain::{
    AssetId, CacheKey, CanonicalRecord, ChartPoint, ChartRange, ChartSeries, Currency,
    DataRequest, DatasetClass, Interval, PriceSnapshot, UtcDateTime,
};

// Error types
pub use error::{FetchError, FetchErrorKind, MismatchCause, SchemaMismatch, ValidationError};

// HTTP client types
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Normalization
pub use normalize::{Normalizer, RawPayload};

// Persistence
pub use persistence::{MemoryRecordStore, RangeQuery, RecordStore, StoreError};

// Provider client
pub use provider::{AssetAliases, PacingPolicy, ProviderClient, ProviderSettings, Upstream};

// Rate limiting
pub use rate_limit::{FixedWindowLimiter, LimiterKey, QuotaPolicy, RateDecision, RateLimiter, RateWindow};

// Refresh
pub use refresh::{CountedTrigger, IntervalTrigger, RefreshPlan, RefreshReport, RefreshTrigger, Refresher};

// Retry logic
pub use retry::{Backoff, RetryConfig, Sleeper, TokioSleeper};

// Source identifiers
pub use source::ProviderId;

// Warehouse (re-exported from ferrofeed-warehouse)
pub use ferrofeed_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
