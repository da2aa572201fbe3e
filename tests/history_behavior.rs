//! Behavior tests for durable history: normalized records written through
//! the `DuckDB` warehouse read back field-for-field.

mod support;

use std::sync::Arc;
use std::time::Duration;

use ferrofeed_core::{
    AssetId, CacheStore, ChartRange, Currency, DataRequest, FetchCoordinator, Interval,
    ManualClock, Normalizer, ProviderId, RangeQuery, RawPayload, RecordStore, StoreError,
    Warehouse, WarehouseConfig,
};
use support::{provider_client, start_time, RecordingSleeper, Reply, ScriptedHttpClient, BTC_PRICE, ETH_CHART};
use tempfile::TempDir;

fn open_warehouse() -> (TempDir, Warehouse) {
    let temp = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::at_home(temp.path().join("ferrofeed"))).expect("open");
    (temp, warehouse)
}

fn btc_query(interval: Option<Interval>, from: Duration, to: Duration) -> RangeQuery {
    RangeQuery {
        asset: AssetId::parse("BTC").expect("asset"),
        currency: Currency::usd(),
        interval,
        from: start_time().saturating_add(from),
        to: start_time().saturating_add(to),
    }
}

#[tokio::test]
async fn normalized_records_round_trip_through_the_warehouse() {
    // Given: Records normalized from both provider schemas
    let (_temp, warehouse) = open_warehouse();
    let btc = DataRequest::simple_price(AssetId::parse("BTC").expect("asset"), Currency::usd());
    let eth = DataRequest::market_chart(
        AssetId::parse("ETH").expect("asset"),
        Currency::usd(),
        Interval::Daily,
        ChartRange::Days(30),
    );
    let raw = |provider, body: &str| RawPayload {
        provider,
        status: 200,
        body: body.to_owned(),
        received_at: start_time(),
    };
    let price = Normalizer
        .normalize(&raw(ProviderId::CoinGecko, BTC_PRICE), &btc, "bitcoin")
        .expect("price");
    let chart = Normalizer
        .normalize(&raw(ProviderId::CoinGecko, ETH_CHART), &eth, "ethereum")
        .expect("chart");
    let coincap = Normalizer
        .normalize(
            &raw(
                ProviderId::CoinCap,
                r#"{"data":{"id":"bitcoin","priceUsd":"67012.4917381522","changePercent24Hr":"0.1000000000000000055"},"timestamp":1709294400123}"#,
            ),
            &btc,
            "bitcoin",
        )
        .expect("coincap price");

    // When: They are appended and read back through the store's read path
    for record in [&price, &chart, &coincap] {
        warehouse.append(record).await.expect("append");
    }
    let prices = warehouse
        .query_range(&btc_query(None, Duration::ZERO, Duration::ZERO))
        .await
        .expect("prices");
    let charts = warehouse
        .query_range(&RangeQuery {
            asset: AssetId::parse("ETH").expect("asset"),
            currency: Currency::usd(),
            interval: Some(Interval::Daily),
            from: start_time(),
            to: start_time(),
        })
        .await
        .expect("charts");

    // Then: Every field is equal to what was written
    assert_eq!(prices, vec![price, coincap]);
    assert_eq!(charts, vec![chart]);
}

#[tokio::test]
async fn resolved_records_accumulate_in_history_in_fetch_order() {
    // Given: A coordinator persisting into the warehouse
    let (_temp, warehouse) = open_warehouse();
    let clock = ManualClock::new(start_time());
    let http = ScriptedHttpClient::new(vec![
        Reply::Ok(r#"{"bitcoin":{"usd":100.0}}"#),
        Reply::Ok(r#"{"bitcoin":{"usd":200.0}}"#),
        Reply::Ok(r#"{"bitcoin":{"usd":300.0}}"#),
    ]);
    let upstream = provider_client(
        ProviderId::CoinGecko,
        http,
        Arc::new(RecordingSleeper::default()),
        &clock,
    );
    let coordinator = FetchCoordinator::builder(Arc::new(upstream))
        .clock(Arc::new(clock.clone()))
        .cache(Arc::new(CacheStore::new(Arc::new(clock.clone()))))
        .store(Arc::new(warehouse.clone()))
        .build();
    let request: DataRequest = "simple-price:BTC:USD".parse().expect("key");

    // When: The price is resolved three times, each after the TTL expired
    for _ in 0..3 {
        coordinator.resolve(&request).await.expect("resolve");
        clock.advance(Duration::from_secs(121));
    }

    // Then: A window covering the last two fetches returns exactly those, oldest first
    let rows = coordinator
        .history(&btc_query(None, Duration::from_secs(121), Duration::from_secs(242)))
        .await
        .expect("history");
    let prices: Vec<f64> = rows
        .iter()
        .filter_map(|record| record.as_price().map(|snapshot| snapshot.price))
        .collect();
    assert_eq!(prices, vec![200.0, 300.0]);
    assert_eq!(warehouse.record_count().expect("count"), 3);
}

#[tokio::test]
async fn chart_history_is_selected_by_interval() {
    let (_temp, warehouse) = open_warehouse();
    let btc_daily = DataRequest::market_chart(
        AssetId::parse("BTC").expect("asset"),
        Currency::usd(),
        Interval::Daily,
        ChartRange::Max,
    );
    let record = Normalizer
        .normalize(
            &RawPayload {
                provider: ProviderId::CoinGecko,
                status: 200,
                body: ETH_CHART.to_owned(),
                received_at: start_time(),
            },
            &btc_daily,
            "bitcoin",
        )
        .expect("chart");
    warehouse.append(&record).await.expect("append");

    let window = (Duration::ZERO, Duration::from_secs(1));
    let daily = warehouse
        .query_range(&btc_query(Some(Interval::Daily), window.0, window.1))
        .await
        .expect("daily");
    let hourly = warehouse
        .query_range(&btc_query(Some(Interval::Hourly), window.0, window.1))
        .await
        .expect("hourly");
    let prices = warehouse
        .query_range(&btc_query(None, window.0, window.1))
        .await
        .expect("prices");

    assert_eq!(daily, vec![record]);
    assert!(hourly.is_empty());
    assert!(prices.is_empty());
}

#[tokio::test]
async fn inverted_window_is_rejected_before_touching_storage() {
    let (_temp, warehouse) = open_warehouse();

    let error = warehouse
        .query_range(&btc_query(None, Duration::from_secs(10), Duration::ZERO))
        .await
        .expect_err("inverted");

    assert!(matches!(error, StoreError::InvalidRange { .. }));
}
