//! # Domain Models
//!
//! Request identities and canonical record shapes.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DataRequest`] | Validated request accepted by `resolve()` |
//! | [`CacheKey`] | Deterministic key derived from a request |
//! | [`CanonicalRecord`] | Normalized record, tagged by [`DatasetClass`] |
//! | [`PriceSnapshot`] | Latest price with optional market data |
//! | [`ChartSeries`] | Price, market-cap and volume series |
//! | [`AssetId`] / [`Currency`] | Validated tickers |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All inputs are validated at construction, so a `DataRequest` that exists
//! always renders a well-formed cache key.

mod asset;
mod record;
mod request;
mod timestamp;

pub use asset::{AssetId, Currency};
pub use record::{CanonicalRecord, ChartPoint, ChartSeries, PriceSnapshot};
pub use request::{CacheKey, ChartRange, DataRequest, DatasetClass, Interval};
pub use timestamp::UtcDateTime;
