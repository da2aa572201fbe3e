use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::domain::{CacheKey, DatasetClass};
use crate::source::ProviderId;

/// Validation errors for caller-supplied request parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("asset id cannot be empty")]
    EmptyAsset,
    #[error("asset id length {len} exceeds max {max}")]
    AssetTooLong { len: usize, max: usize },
    #[error("asset id must start with an ASCII letter: '{ch}'")]
    AssetInvalidStart { ch: char },
    #[error("asset id contains invalid character '{ch}' at index {index}")]
    AssetInvalidChar { ch: char, index: usize },

    #[error("currency must be 3 to 5 ASCII letters or digits: '{value}'")]
    InvalidCurrency { value: String },

    #[error("invalid dataset '{value}', expected simple-price or market-chart")]
    InvalidDataset { value: String },
    #[error("invalid interval '{value}', expected one of minutely, hourly, daily")]
    InvalidInterval { value: String },
    #[error("invalid range '{value}', expected a positive day count or 'max'")]
    InvalidRange { value: String },
    #[error("{dataset} requests take no interval or range")]
    UnexpectedChartField { dataset: DatasetClass },
    #[error("market-chart requests need a range")]
    MissingRange,
    #[error("malformed cache key '{value}'")]
    InvalidCacheKey { value: String },

    #[error("invalid provider '{value}', expected coingecko or coincap")]
    InvalidProvider { value: String },
    #[error("invalid asset alias '{value}', expected TICKER=provider-id")]
    InvalidAlias { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("timestamp out of range: {value}")]
    TimestampOutOfRange { value: i128 },
}

/// Why a payload failed to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchCause {
    /// The provider answered but knows nothing about the requested asset or
    /// currency, so the request parameters are at fault.
    UnknownAsset,
    /// The payload is missing required data or has the wrong shape.
    Malformed,
}

/// A provider payload that does not fit the canonical shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{provider} {dataset} payload, field '{field}': {reason}")]
pub struct SchemaMismatch {
    pub provider: ProviderId,
    pub dataset: DatasetClass,
    pub field: String,
    pub reason: String,
    pub cause: MismatchCause,
}

impl SchemaMismatch {
    pub fn malformed(
        provider: ProviderId,
        dataset: DatasetClass,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            dataset,
            field: field.into(),
            reason: reason.into(),
            cause: MismatchCause::Malformed,
        }
    }

    pub fn unknown_asset(provider: ProviderId, dataset: DatasetClass, field: impl Into<String>) -> Self {
        Self {
            provider,
            dataset,
            field: field.into(),
            reason: String::from("provider returned no data for the requested asset"),
            cause: MismatchCause::UnknownAsset,
        }
    }
}

/// Classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    InvalidRequest,
    SchemaMismatch,
    TransientUpstream,
    PermanentUpstream,
    UpstreamUnavailable,
    RateLimited,
    LeaseTimeout,
    Persistence,
    FetchAborted,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::SchemaMismatch => "schema_mismatch",
            Self::TransientUpstream => "transient_upstream",
            Self::PermanentUpstream => "permanent_upstream",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::RateLimited => "rate_limited",
            Self::LeaseTimeout => "lease_timeout",
            Self::Persistence => "persistence",
            Self::FetchAborted => "fetch_aborted",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by `resolve()`. `Clone` so one outcome can be delivered
/// to every caller waiting on the same fetch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),

    #[error("{provider} transient failure: {message}")]
    TransientUpstream {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} rejected the request: {message}")]
    PermanentUpstream {
        provider: ProviderId,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable {
        provider: ProviderId,
        attempts: u32,
        last_error: String,
    },

    #[error("quota exhausted for '{limiter_key}', retry after {}ms", .retry_after.as_millis())]
    RateLimited {
        limiter_key: String,
        retry_after: Duration,
    },

    #[error("stopped waiting for '{key}' after {}ms", .waited.as_millis())]
    LeaseTimeout { key: CacheKey, waited: Duration },

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("fetch for '{key}' ended without a result")]
    FetchAborted { key: CacheKey },
}

impl FetchError {
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::InvalidRequest(_) => FetchErrorKind::InvalidRequest,
            Self::SchemaMismatch(_) => FetchErrorKind::SchemaMismatch,
            Self::TransientUpstream { .. } => FetchErrorKind::TransientUpstream,
            Self::PermanentUpstream { .. } => FetchErrorKind::PermanentUpstream,
            Self::UpstreamUnavailable { .. } => FetchErrorKind::UpstreamUnavailable,
            Self::RateLimited { .. } => FetchErrorKind::RateLimited,
            Self::LeaseTimeout { .. } => FetchErrorKind::LeaseTimeout,
            Self::Persistence(_) => FetchErrorKind::Persistence,
            Self::FetchAborted { .. } => FetchErrorKind::FetchAborted,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind() {
            FetchErrorKind::InvalidRequest => "fetch.invalid_request",
            FetchErrorKind::SchemaMismatch => "fetch.schema_mismatch",
            FetchErrorKind::TransientUpstream => "fetch.transient_upstream",
            FetchErrorKind::PermanentUpstream => "fetch.permanent_upstream",
            FetchErrorKind::UpstreamUnavailable => "fetch.upstream_unavailable",
            FetchErrorKind::RateLimited => "fetch.rate_limited",
            FetchErrorKind::LeaseTimeout => "fetch.lease_timeout",
            FetchErrorKind::Persistence => "fetch.persistence",
            FetchErrorKind::FetchAborted => "fetch.aborted",
        }
    }

    /// True when the caller's parameters caused the failure.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => true,
            Self::SchemaMismatch(mismatch) => mismatch.cause == MismatchCause::UnknownAsset,
            _ => false,
        }
    }

    /// Suggested wait before the same request is worth repeating.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub(crate) const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_asset_mismatch_is_a_client_error() {
        let error = FetchError::from(SchemaMismatch::unknown_asset(
            ProviderId::CoinGecko,
            DatasetClass::SimplePrice,
            "bitcoinz",
        ));
        assert!(error.is_client_error());
        assert_eq!(error.code(), "fetch.schema_mismatch");
    }

    #[test]
    fn malformed_payload_is_a_server_error() {
        let error = FetchError::from(SchemaMismatch::malformed(
            ProviderId::CoinCap,
            DatasetClass::MarketChart,
            "data",
            "expected array",
        ));
        assert!(!error.is_client_error());
        assert_eq!(error.kind(), FetchErrorKind::SchemaMismatch);
    }

    #[test]
    fn rate_limited_carries_retry_hint() {
        let error = FetchError::RateLimited {
            limiter_key: String::from("anonymous:coingecko"),
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(12)));
        assert!(error.to_string().contains("12000ms"));
    }
}
