//! Shared fixtures for the behavior tests: a scripted HTTP transport, a
//! sleeper that records instead of waiting, and a pipeline harness wired
//! to a manual clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferrofeed_core::{
    Backoff, BoxFuture, CacheStore, FetchCoordinator, FixedWindowLimiter, HttpClient, HttpError,
    HttpRequest, HttpResponse, ManualClock, MemoryRecordStore, PacingPolicy, ProviderClient, ProviderId,
    ProviderSettings, QuotaPolicy, RetryConfig, Sleeper, TtlPolicy, UtcDateTime,
};

pub const BTC_PRICE: &str = r#"{"bitcoin":{"usd":67012.5,"usd_market_cap":1318000000000.0,
    "usd_24h_vol":28500000000.0,"usd_24h_change":1.82,"last_updated_at":1709294400}}"#;

pub const ETH_PRICE: &str = r#"{"ethereum":{"usd":3421.75}}"#;

pub const ETH_CHART: &str = r#"{"prices":[[1709251200000,3380.1],[1709337600000,3421.75]],
    "market_caps":[[1709251200000,406000000000.0],[1709337600000,411000000000.0]],
    "total_volumes":[[1709251200000,15000000000.0],[1709337600000,16200000000.0]]}"#;

pub fn start_time() -> UtcDateTime {
    UtcDateTime::parse("2024-03-01T12:00:00Z").expect("valid timestamp")
}

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(&'static str),
    Status(u16, &'static str),
    Transport(&'static str),
    Fatal(&'static str),
}

impl Reply {
    fn into_result(self) -> Result<HttpResponse, HttpError> {
        match self {
            Self::Ok(body) => Ok(HttpResponse::ok_json(body)),
            Self::Status(status, body) => Ok(HttpResponse::with_status(status, body)),
            Self::Transport(message) => Err(HttpError::new(message)),
            Self::Fatal(message) => Err(HttpError::non_retryable(message)),
        }
    }
}

/// Replays scripted replies in order and records every request.
#[derive(Default)]
pub struct ScriptedHttpClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Duration,
}

impl ScriptedHttpClient {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// Every reply is delayed by `latency` of tokio time.
    pub fn with_latency(replies: Vec<Reply>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            latency,
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(HttpRequest::full_url)
            .collect()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> BoxFuture<'a, Result<HttpResponse, HttpError>> {
        self.requests.lock().expect("requests lock").push(request);
        let reply = self.replies.lock().expect("replies lock").pop_front();
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            reply
                .unwrap_or(Reply::Fatal("script exhausted"))
                .into_result()
        })
    }
}

/// Records requested delays and returns at once.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("delays lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()> {
        self.delays.lock().expect("delays lock").push(duration);
        Box::pin(async {})
    }
}

/// Retry policy without jitter so delays are exact.
pub fn retry_policy() -> RetryConfig {
    RetryConfig {
        max_attempts: 4,
        backoff: Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: false,
        },
    }
}

pub fn provider_client(
    provider: ProviderId,
    http: Arc<ScriptedHttpClient>,
    sleeper: Arc<RecordingSleeper>,
    clock: &ManualClock,
) -> ProviderClient {
    let mut settings = ProviderSettings::new(provider);
    settings.retry = retry_policy();
    settings.pacing = PacingPolicy::unlimited();
    ProviderClient::new(settings, http)
        .with_sleeper(sleeper)
        .with_clock(Arc::new(clock.clone()))
}

/// A coordinator over in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub coordinator: FetchCoordinator,
    pub http: Arc<ScriptedHttpClient>,
    pub sleeper: Arc<RecordingSleeper>,
    pub clock: ManualClock,
    pub cache: CacheStore,
    pub limiter: FixedWindowLimiter,
    pub store: MemoryRecordStore,
}

pub fn harness(replies: Vec<Reply>) -> Harness {
    harness_with(ScriptedHttpClient::new(replies), QuotaPolicy::default())
}

pub fn harness_with(http: Arc<ScriptedHttpClient>, quota: QuotaPolicy) -> Harness {
    let clock = ManualClock::new(start_time());
    let sleeper = Arc::new(RecordingSleeper::default());
    let cache = CacheStore::new(Arc::new(clock.clone()));
    let limiter = FixedWindowLimiter::new(Arc::new(clock.clone()));
    let store = MemoryRecordStore::new();
    let upstream = provider_client(ProviderId::CoinGecko, Arc::clone(&http), Arc::clone(&sleeper), &clock);

    let coordinator = FetchCoordinator::builder(Arc::new(upstream))
        .clock(Arc::new(clock.clone()))
        .cache(Arc::new(cache.clone()))
        .limiter(Arc::new(limiter.clone()))
        .store(Arc::new(store.clone()))
        .ttl_policy(TtlPolicy::default())
        .quota(quota)
        .build();

    Harness {
        coordinator,
        http,
        sleeper,
        clock,
        cache,
        limiter,
        store,
    }
}
