//! Deployment configuration read from `FERROFEED_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::provider::{AssetAliases, PacingPolicy, ProviderSettings};
use crate::rate_limit::QuotaPolicy;
use crate::retry::{Backoff, RetryConfig};
use crate::{DataRequest, ProviderId, ValidationError};

const DEFAULT_REFRESH_KEYS: &str =
    "simple-price:BTC:USD,simple-price:ETH:USD,market-chart:BTC:USD:daily:30";

/// Pipeline configuration. `Default` gives the documented defaults;
/// `from_env` overlays the environment on top of them.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub provider: ProviderId,
    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,
    pub coingecko_api_key: Option<String>,
    pub coincap_api_key: Option<String>,
    pub http_timeout_ms: u64,

    pub ttl: TtlPolicy,
    pub quota: QuotaPolicy,
    pub retry: RetryConfig,
    pub pacing: PacingPolicy,
    /// How long a caller waits on a fetch before giving up on it. Defaults
    /// to [`FeedConfig::retry_budget`] so a slow upstream exhausts its
    /// retries before waiters time out.
    pub lease_timeout: Duration,

    pub refresh_keys: Vec<DataRequest>,
    pub refresh_interval: Duration,
    /// Extra `TICKER=provider-id` entries merged over the built-in table.
    pub asset_aliases: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let mut config = Self {
            provider: ProviderId::CoinGecko,
            base_url: None,
            coingecko_api_key: None,
            coincap_api_key: None,
            http_timeout_ms: 5_000,
            ttl: TtlPolicy::default(),
            quota: QuotaPolicy::default(),
            retry: RetryConfig::default(),
            pacing: PacingPolicy::default(),
            lease_timeout: Duration::ZERO,
            refresh_keys: parse_request_list(DEFAULT_REFRESH_KEYS).unwrap_or_default(),
            refresh_interval: Duration::from_secs(86_400),
            asset_aliases: None,
        };
        config.lease_timeout = config.retry_budget();
        config
    }
}

impl FeedConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_vars(&|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Numeric values that do not
    /// parse fall back to their defaults; identifiers that do not parse are
    /// errors.
    pub fn from_vars(vars: &dyn Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let defaults = Self::default();
        let lookup = |name: &str| {
            vars(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let number = |name: &str, default: u64| {
            lookup(name)
                .and_then(|value| value.parse().ok())
                .unwrap_or(default)
        };
        let float = |name: &str, default: f64| {
            lookup(name)
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .unwrap_or(default)
        };

        let provider = match lookup("FERROFEED_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.provider,
        };

        let refresh_keys = match lookup("FERROFEED_REFRESH_KEYS") {
            Some(value) => parse_request_list(&value)?,
            None => defaults.refresh_keys,
        };

        let asset_aliases = lookup("FERROFEED_ASSET_ALIASES");
        if let Some(list) = &asset_aliases {
            AssetAliases::empty().extend_from_list(list)?;
        }

        let retry_max_attempts = u32::try_from(number("FERROFEED_RETRY_MAX_ATTEMPTS", 4)).unwrap_or(4);
        let quota_max = u32::try_from(number("FERROFEED_QUOTA_MAX", 30)).unwrap_or(30);
        let pacing = match number("FERROFEED_PACING_PER_MINUTE", 50) {
            0 => PacingPolicy::unlimited(),
            per_minute => PacingPolicy {
                requests_per_minute: Some(u32::try_from(per_minute).unwrap_or(u32::MAX)),
            },
        };

        let mut config = Self {
            provider,
            base_url: lookup("FERROFEED_BASE_URL"),
            coingecko_api_key: lookup("FERROFEED_COINGECKO_API_KEY").or_else(|| lookup("COINGECKO_API_KEY")),
            coincap_api_key: lookup("FERROFEED_COINCAP_API_KEY").or_else(|| lookup("COINCAP_API_KEY")),
            http_timeout_ms: number("FERROFEED_HTTP_TIMEOUT_MS", defaults.http_timeout_ms),
            ttl: TtlPolicy {
                simple_price: Duration::from_secs(number("FERROFEED_TTL_SIMPLE_PRICE_SECS", 120)),
                market_chart: Duration::from_secs(number("FERROFEED_TTL_MARKET_CHART_SECS", 21_600)),
            },
            quota: QuotaPolicy {
                window: Duration::from_secs(number("FERROFEED_QUOTA_WINDOW_SECS", 60).max(1)),
                max_count: quota_max,
            },
            retry: RetryConfig {
                max_attempts: retry_max_attempts,
                backoff: Backoff::Exponential {
                    base: Duration::from_millis(number("FERROFEED_RETRY_BASE_MS", 500)),
                    factor: float("FERROFEED_RETRY_MULTIPLIER", 2.0).max(1.0),
                    max: Duration::from_millis(number("FERROFEED_RETRY_MAX_MS", 8_000)),
                    jitter: true,
                },
            },
            pacing,
            lease_timeout: Duration::ZERO,
            refresh_keys,
            refresh_interval: Duration::from_secs(number("FERROFEED_REFRESH_INTERVAL_SECS", 86_400).max(1)),
            asset_aliases,
        };
        config.lease_timeout = match lookup("FERROFEED_LEASE_TIMEOUT_MS").and_then(|value| value.parse().ok()) {
            Some(millis) => Duration::from_millis(millis),
            None => config.retry_budget(),
        };
        Ok(config)
    }

    /// Worst-case time for one upstream fetch: every attempt hits the HTTP
    /// timeout after a full pacing gap, and every backoff draws its maximum.
    pub fn retry_budget(&self) -> Duration {
        let per_attempt = Duration::from_millis(self.http_timeout_ms).saturating_add(self.pacing.interval());
        self.retry.worst_case(per_attempt)
    }

    pub fn api_key_for(&self, provider: ProviderId) -> Option<&str> {
        match provider {
            ProviderId::CoinGecko => self.coingecko_api_key.as_deref(),
            ProviderId::CoinCap => self.coincap_api_key.as_deref(),
        }
    }

    /// Provider client settings for the configured provider.
    pub fn provider_settings(&self) -> Result<ProviderSettings, ValidationError> {
        let mut settings = ProviderSettings::new(self.provider);
        if let Some(base_url) = &self.base_url {
            settings.base_url = base_url.clone();
        }
        settings.api_key = self.api_key_for(self.provider).map(str::to_owned);
        settings.timeout_ms = self.http_timeout_ms;
        settings.retry = self.retry.clone();
        settings.pacing = self.pacing;
        if let Some(list) = &self.asset_aliases {
            settings.aliases.extend_from_list(list)?;
        }
        Ok(settings)
    }
}

/// Parse comma-separated cache keys into requests.
pub fn parse_request_list(list: &str) -> Result<Vec<DataRequest>, ValidationError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(DataRequest::from_str)
        .collect()
}
