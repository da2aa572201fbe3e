//! Behavior tests for the provider client: failure classification and the
//! retry/backoff loop, observed through a recording sleeper.

mod support;

use std::sync::Arc;
use std::time::Duration;

use ferrofeed_core::{
    AssetId, ChartRange, Currency, DataRequest, FeedConfig, FetchCoordinator, FetchError,
    FetchErrorKind, HttpClient, Interval, ManualClock, Normalizer, ProviderClient, ProviderId, Upstream,
};
use support::{
    harness, provider_client, start_time, RecordingSleeper, Reply, ScriptedHttpClient, BTC_PRICE,
    ETH_CHART,
};

fn eth_chart() -> DataRequest {
    DataRequest::market_chart(
        AssetId::parse("ETH").expect("asset"),
        Currency::usd(),
        Interval::Daily,
        ChartRange::Days(30),
    )
}

fn btc_price() -> DataRequest {
    DataRequest::simple_price(AssetId::parse("BTC").expect("asset"), Currency::usd())
}

fn client(replies: Vec<Reply>) -> (ferrofeed_core::ProviderClient, Arc<ScriptedHttpClient>, Arc<RecordingSleeper>) {
    let http = ScriptedHttpClient::new(replies);
    let sleeper = Arc::new(RecordingSleeper::default());
    let clock = ManualClock::new(start_time());
    let client = provider_client(ProviderId::CoinGecko, Arc::clone(&http), Arc::clone(&sleeper), &clock);
    (client, http, sleeper)
}

#[tokio::test]
async fn two_transient_failures_then_success_costs_exactly_two_backoffs() {
    // Given: market-chart:ETH:USD:daily:30 fails twice transiently, then succeeds
    let h = harness(vec![
        Reply::Status(503, "service unavailable"),
        Reply::Transport("connection reset"),
        Reply::Ok(ETH_CHART),
    ]);

    // When: It is resolved
    let resolved = h.coordinator.resolve(&eth_chart()).await.expect("eventually succeeds");

    // Then: The correct record comes back after exactly two backoff delays
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_millis(500), Duration::from_millis(1_000)]
    );
    assert_eq!(h.http.calls(), 3);
    let series = resolved.record.as_chart().expect("chart");
    assert_eq!(resolved.key.as_str(), "market-chart:ETH:USD:daily:30");
    assert_eq!(series.prices.len(), 2);
    assert_eq!(series.latest_price().map(|point| point.value), Some(3421.75));
    assert_eq!(series.market_caps.len(), 2);
    assert_eq!(series.total_volumes.len(), 2);
}

#[tokio::test]
async fn exhausted_retries_surface_as_upstream_unavailable() {
    // Given: An upstream that keeps answering 429
    let (client, http, sleeper) = client(vec![
        Reply::Status(429, "slow down"),
        Reply::Status(429, "slow down"),
        Reply::Status(429, "slow down"),
        Reply::Status(429, "slow down"),
    ]);

    // When: The client fetches
    let error = client.fetch(&btc_price()).await.expect_err("gives up");

    // Then: All four attempts were spent with capped exponential delays between them
    let FetchError::UpstreamUnavailable { attempts, last_error, .. } = error else {
        panic!("expected UpstreamUnavailable, got {error:?}");
    };
    assert_eq!(attempts, 4);
    assert!(last_error.contains("429"));
    assert_eq!(http.calls(), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1_000),
            Duration::from_millis(2_000)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn default_waiters_outlast_a_slow_failing_upstream() {
    // Given: Default settings and an upstream that takes the full HTTP timeout to fail every time
    let config = FeedConfig::default();
    let http = ScriptedHttpClient::with_latency(
        vec![Reply::Status(503, "overloaded"); 4],
        Duration::from_millis(config.http_timeout_ms),
    );
    let upstream = ProviderClient::new(config.provider_settings().expect("settings"), Arc::clone(&http) as Arc<dyn HttpClient>);
    let coordinator = FetchCoordinator::builder(Arc::new(upstream)).config(&config).build();

    // When: A caller resolves with the default wait
    let started = tokio::time::Instant::now();
    let error = coordinator.resolve(&btc_price()).await.expect_err("upstream is down");

    // Then: The caller sees the exhausted retries, not its own timeout
    let FetchError::UpstreamUnavailable { attempts, .. } = error else {
        panic!("expected UpstreamUnavailable, got {error:?}");
    };
    assert_eq!(attempts, 4);
    assert_eq!(http.calls(), 4);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() <= config.lease_timeout);
}

#[tokio::test]
async fn client_errors_are_permanent_and_never_retried() {
    for status in [400, 401, 403, 404, 422] {
        let (client, http, sleeper) = client(vec![Reply::Status(status, "nope"), Reply::Ok(BTC_PRICE)]);

        let error = client.fetch(&btc_price()).await.expect_err("permanent");

        assert_eq!(error.kind(), FetchErrorKind::PermanentUpstream, "status {status}");
        assert!(matches!(error, FetchError::PermanentUpstream { status: Some(s), .. } if s == status));
        assert_eq!(http.calls(), 1);
        assert!(sleeper.delays().is_empty());
    }
}

#[tokio::test]
async fn non_retryable_transport_error_is_permanent() {
    let (client, http, sleeper) = client(vec![Reply::Fatal("invalid url"), Reply::Ok(BTC_PRICE)]);

    let error = client.fetch(&btc_price()).await.expect_err("permanent");

    assert!(matches!(error, FetchError::PermanentUpstream { status: None, .. }));
    assert_eq!(http.calls(), 1);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn transient_failures_never_escape_the_client() {
    for replies in [
        vec![Reply::Status(500, "boom"), Reply::Ok(BTC_PRICE)],
        vec![Reply::Status(408, "timeout"), Reply::Ok(BTC_PRICE)],
        vec![Reply::Transport("timed out"), Reply::Ok(BTC_PRICE)],
    ] {
        let (client, _http, sleeper) = client(replies);

        let payload = client.fetch(&btc_price()).await.expect("retried to success");

        assert_eq!(payload.status, 200);
        assert_eq!(payload.provider, ProviderId::CoinGecko);
        assert_eq!(sleeper.delays(), vec![Duration::from_millis(500)]);
    }
}

#[tokio::test]
async fn fetched_payload_normalizes_with_the_provider_asset_id() {
    let (client, _http, _sleeper) = client(vec![Reply::Ok(BTC_PRICE)]);
    let request = btc_price();

    let raw = client.fetch(&request).await.expect("payload");
    let record = Normalizer
        .normalize(&raw, &request, &client.asset_id_for(request.asset()))
        .expect("normalizes");

    let snapshot = record.as_price().expect("price");
    assert_eq!(snapshot.market_cap, Some(1_318_000_000_000.0));
    assert_eq!(snapshot.change_24h_pct, Some(1.82));
    assert_eq!(snapshot.fetched_at, start_time());
}

#[tokio::test]
async fn coincap_rejects_non_usd_quotes_without_calling_upstream() {
    let http = ScriptedHttpClient::new(vec![Reply::Ok("{}")]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let clock = ManualClock::new(start_time());
    let client = provider_client(ProviderId::CoinCap, Arc::clone(&http), sleeper, &clock);
    let request = DataRequest::simple_price(
        AssetId::parse("BTC").expect("asset"),
        Currency::parse("EUR").expect("currency"),
    );

    let error = client.fetch(&request).await.expect_err("usd only");

    assert_eq!(error.kind(), FetchErrorKind::PermanentUpstream);
    assert_eq!(http.calls(), 0);
}
