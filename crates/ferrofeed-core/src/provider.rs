//! Upstream provider client: request building, pacing, failure
//! classification and the retry loop.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;

use crate::clock::{Clock, SystemClock};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::normalize::RawPayload;
use crate::retry::{is_transient_status, RetryConfig, Sleeper, TokioSleeper};
use crate::{AssetId, BoxFuture, ChartRange, DataRequest, DatasetClass, FetchError, Interval, ProviderId, ValidationError};

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest slice of an error body carried into a failure message.
const ERROR_BODY_LIMIT: usize = 200;

/// One upstream data source, as consumed by the fetch coordinator.
pub trait Upstream: Send + Sync {
    /// Schema identity used to pick the normalizer mapping.
    fn schema(&self) -> ProviderId;

    /// Provider-side id for a canonical ticker.
    fn asset_id_for(&self, asset: &AssetId) -> String;

    /// Perform the call, retrying transient failures. Never returns
    /// `FetchError::TransientUpstream`.
    fn fetch<'a>(&'a self, request: &'a DataRequest) -> BoxFuture<'a, Result<RawPayload, FetchError>>;
}

/// Ticker to provider coin id table. Unknown tickers fall back to the
/// lower-cased ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAliases {
    entries: BTreeMap<String, String>,
}

impl AssetAliases {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn defaults_for(provider: ProviderId) -> Self {
        let table: &[(&str, &str)] = match provider {
            ProviderId::CoinGecko => &[
                ("BTC", "bitcoin"),
                ("ETH", "ethereum"),
                ("SOL", "solana"),
                ("USDT", "tether"),
                ("USDC", "usd-coin"),
                ("BNB", "binancecoin"),
                ("XRP", "ripple"),
                ("ADA", "cardano"),
                ("DOGE", "dogecoin"),
                ("DOT", "polkadot"),
                ("LTC", "litecoin"),
                ("AVAX", "avalanche-2"),
                ("LINK", "chainlink"),
                ("MATIC", "matic-network"),
            ],
            ProviderId::CoinCap => &[
                ("BTC", "bitcoin"),
                ("ETH", "ethereum"),
                ("SOL", "solana"),
                ("USDT", "tether"),
                ("USDC", "usd-coin"),
                ("BNB", "binance-coin"),
                ("XRP", "xrp"),
                ("ADA", "cardano"),
                ("DOGE", "dogecoin"),
                ("DOT", "polkadot"),
                ("LTC", "litecoin"),
                ("AVAX", "avalanche"),
                ("LINK", "chainlink"),
                ("MATIC", "polygon"),
            ],
        };

        Self {
            entries: table
                .iter()
                .map(|(ticker, id)| ((*ticker).to_owned(), (*id).to_owned()))
                .collect(),
        }
    }

    pub fn with_alias(mut self, asset: &AssetId, provider_id: impl Into<String>) -> Self {
        self.entries.insert(asset.as_str().to_owned(), provider_id.into());
        self
    }

    /// Merge `TICKER=provider-id` entries separated by commas.
    pub fn extend_from_list(&mut self, list: &str) -> Result<(), ValidationError> {
        for entry in list.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let invalid = || ValidationError::InvalidAlias {
                value: entry.to_owned(),
            };
            let (ticker, id) = entry.split_once('=').ok_or_else(invalid)?;
            let id = id.trim();
            if id.is_empty() || id.contains(['/', '?', '#']) {
                return Err(invalid());
            }
            let ticker = AssetId::parse(ticker)?;
            self.entries.insert(ticker.as_str().to_owned(), id.to_owned());
        }
        Ok(())
    }

    pub fn resolve(&self, asset: &AssetId) -> String {
        self.entries
            .get(asset.as_str())
            .cloned()
            .unwrap_or_else(|| asset.as_str().to_ascii_lowercase())
    }
}

/// Outbound call pacing, independent of caller quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// `None` disables pacing.
    pub requests_per_minute: Option<u32>,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: Some(50),
        }
    }
}

impl PacingPolicy {
    pub const fn unlimited() -> Self {
        Self {
            requests_per_minute: None,
        }
    }

    /// Gap between paced calls once the burst allowance is spent.
    pub fn interval(self) -> Duration {
        match self.requests_per_minute {
            Some(per_minute) if per_minute > 0 => Duration::from_secs(60) / per_minute,
            _ => Duration::ZERO,
        }
    }

    fn limiter(self) -> Option<DirectRateLimiter> {
        let per_minute = NonZeroU32::new(self.requests_per_minute?)?;
        Some(governor::RateLimiter::direct(Quota::per_minute(per_minute)))
    }
}

/// Everything needed to talk to one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub provider: ProviderId,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    pub pacing: PacingPolicy,
    pub aliases: AssetAliases,
}

impl ProviderSettings {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_owned(),
            api_key: None,
            timeout_ms: 5_000,
            retry: RetryConfig::default(),
            pacing: PacingPolicy::default(),
            aliases: AssetAliases::defaults_for(provider),
        }
    }

    fn auth(&self) -> HttpAuth {
        match (&self.api_key, self.provider) {
            (None, _) => HttpAuth::None,
            (Some(key), ProviderId::CoinGecko) => HttpAuth::Header {
                name: String::from("x-cg-demo-api-key"),
                value: key.clone(),
            },
            (Some(key), ProviderId::CoinCap) => HttpAuth::BearerToken(key.clone()),
        }
    }
}

/// [`Upstream`] over an [`HttpClient`] transport.
#[derive(Clone)]
pub struct ProviderClient {
    settings: Arc<ProviderSettings>,
    http: Arc<dyn HttpClient>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    pacer: Option<Arc<DirectRateLimiter>>,
}

impl ProviderClient {
    pub fn new(settings: ProviderSettings, http: Arc<dyn HttpClient>) -> Self {
        let pacer = settings.pacing.limiter().map(Arc::new);
        Self {
            settings: Arc::new(settings),
            http,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            pacer,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Build the HTTP request for `request`, or refuse it when the provider
    /// cannot serve it at all.
    pub fn build_request(&self, request: &DataRequest) -> Result<HttpRequest, FetchError> {
        let settings = &self.settings;
        let base = settings.base_url.trim_end_matches('/');
        let coin = self.asset_id_for(request.asset());
        let coin_segment = urlencoding::encode(&coin);
        let currency = request.currency().to_provider_code();

        let http_request = match (settings.provider, request.dataset()) {
            (ProviderId::CoinGecko, DatasetClass::SimplePrice) => {
                HttpRequest::get(format!("{base}/simple/price"))
                    .with_query("ids", coin.as_str())
                    .with_query("vs_currencies", currency.as_str())
                    .with_query("include_market_cap", "true")
                    .with_query("include_24hr_vol", "true")
                    .with_query("include_24hr_change", "true")
                    .with_query("include_last_updated_at", "true")
            }
            (ProviderId::CoinGecko, DatasetClass::MarketChart) => {
                let range = chart_range(request)?;
                let mut http_request = HttpRequest::get(format!("{base}/coins/{coin_segment}/market_chart"))
                    .with_query("vs_currency", currency.as_str())
                    .with_query("days", range.to_string());
                // Finer intervals come from CoinGecko's automatic granularity.
                if request.interval() == Some(Interval::Daily) {
                    http_request = http_request.with_query("interval", "daily");
                }
                http_request
            }
            (ProviderId::CoinCap, dataset) => {
                if request.currency().as_str() != "USD" {
                    return Err(FetchError::PermanentUpstream {
                        provider: ProviderId::CoinCap,
                        status: None,
                        message: format!("coincap quotes USD only, not {}", request.currency()),
                    });
                }
                match dataset {
                    DatasetClass::SimplePrice => HttpRequest::get(format!("{base}/assets/{coin_segment}")),
                    DatasetClass::MarketChart => {
                        let range = chart_range(request)?;
                        let interval = match request.interval().unwrap_or(Interval::Daily) {
                            Interval::Minutely => "m1",
                            Interval::Hourly => "h1",
                            Interval::Daily => "d1",
                        };
                        let mut http_request = HttpRequest::get(format!("{base}/assets/{coin_segment}/history"))
                            .with_query("interval", interval);
                        if let Some(days) = range.days() {
                            let end = self.clock.now();
                            let start = end.saturating_sub(Duration::from_secs(u64::from(days) * 86_400));
                            http_request = http_request
                                .with_query("start", start.unix_millis().to_string())
                                .with_query("end", end.unix_millis().to_string());
                        }
                        http_request
                    }
                }
            }
        };

        Ok(http_request
            .with_auth(&settings.auth())
            .with_timeout_ms(settings.timeout_ms))
    }

    /// One attempt, classified. Transport errors and 408/425/429/5xx are
    /// transient; everything else that is not 2xx is permanent.
    async fn attempt(&self, http_request: HttpRequest) -> Result<RawPayload, FetchError> {
        let provider = self.settings.provider;
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        let response = match self.http.execute(http_request).await {
            Ok(response) => response,
            Err(error) if error.retryable() => {
                return Err(FetchError::TransientUpstream {
                    provider,
                    status: None,
                    message: error.message().to_owned(),
                });
            }
            Err(error) => {
                return Err(FetchError::PermanentUpstream {
                    provider,
                    status: None,
                    message: error.message().to_owned(),
                });
            }
        };

        if response.is_success() {
            return Ok(RawPayload {
                provider,
                status: response.status,
                body: response.body,
                received_at: self.clock.now(),
            });
        }

        let message = format!(
            "HTTP {}: {}",
            response.status,
            response.body.chars().take(ERROR_BODY_LIMIT).collect::<String>()
        );
        if is_transient_status(response.status) {
            Err(FetchError::TransientUpstream {
                provider,
                status: Some(response.status),
                message,
            })
        } else {
            Err(FetchError::PermanentUpstream {
                provider,
                status: Some(response.status),
                message,
            })
        }
    }

    async fn fetch_with_retry(&self, request: &DataRequest) -> Result<RawPayload, FetchError> {
        let http_request = self.build_request(request)?;
        let provider = self.settings.provider;
        let retry = &self.settings.retry;
        let attempts = retry.attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(http_request.clone()).await {
                Ok(payload) => {
                    tracing::debug!(%provider, key = %request, attempt, status = payload.status, "upstream answered");
                    return Ok(payload);
                }
                Err(error) if error.is_transient() => error,
                Err(error) => return Err(error),
            };

            if attempt >= attempts {
                tracing::warn!(%provider, key = %request, attempts, error = %error, "upstream retries exhausted");
                return Err(FetchError::UpstreamUnavailable {
                    provider,
                    attempts,
                    last_error: error.to_string(),
                });
            }

            let delay = retry.delay_for_attempt(attempt - 1);
            tracing::warn!(
                %provider,
                key = %request,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient upstream failure, backing off"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

impl Upstream for ProviderClient {
    fn schema(&self) -> ProviderId {
        self.settings.provider
    }

    fn asset_id_for(&self, asset: &AssetId) -> String {
        self.settings.aliases.resolve(asset)
    }

    fn fetch<'a>(&'a self, request: &'a DataRequest) -> BoxFuture<'a, Result<RawPayload, FetchError>> {
        Box::pin(self.fetch_with_retry(request))
    }
}

fn chart_range(request: &DataRequest) -> Result<ChartRange, FetchError> {
    request
        .range()
        .ok_or(FetchError::InvalidRequest(ValidationError::MissingRange))
}
