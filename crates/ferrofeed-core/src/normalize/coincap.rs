//! CoinCap v2 payloads. Prices are decimal strings and quoted in USD only.

use super::Fields;
use crate::{
    CanonicalRecord, ChartPoint, ChartSeries, DataRequest, DatasetClass, PriceSnapshot, SchemaMismatch,
    UtcDateTime,
};

pub(super) fn normalize(
    fields: &Fields,
    request: &DataRequest,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    if request.currency().as_str() != "USD" {
        return Err(fields.unknown_asset("currency"));
    }

    match request.dataset() {
        DatasetClass::SimplePrice => asset(fields, request, fetched_at),
        DatasetClass::MarketChart => history(fields, request, fetched_at),
    }
}

/// `{"data": {"id", "symbol", "priceUsd", "marketCapUsd"?, "volumeUsd24Hr"?, "changePercent24Hr"?}, "timestamp": ms}`
fn asset(
    fields: &Fields,
    request: &DataRequest,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    let root = fields.root_object()?;
    let data = Fields::optional(root, "data").ok_or_else(|| fields.unknown_asset("data"))?;
    let data = fields.object(data, "data")?;

    let price = data
        .get("priceUsd")
        .ok_or_else(|| fields.malformed("data.priceUsd", "required field is missing"))?;
    let price = fields.non_negative(fields.decimal(price, "data.priceUsd")?, "data.priceUsd")?;

    let optional_decimal = |name: &str| -> Result<Option<f64>, SchemaMismatch> {
        Fields::optional(data, name)
            .map(|value| fields.decimal(value, &format!("data.{name}")))
            .transpose()
    };
    let market_cap = optional_decimal("marketCapUsd")?;
    let volume_24h = optional_decimal("volumeUsd24Hr")?;
    let change_24h_pct = optional_decimal("changePercent24Hr")?;

    let timestamp = root
        .get("timestamp")
        .ok_or_else(|| fields.malformed("timestamp", "required field is missing"))?;
    let last_updated = fields.unix_millis(timestamp, "timestamp")?;

    Ok(CanonicalRecord::SimplePrice(PriceSnapshot {
        asset: request.asset().clone(),
        currency: request.currency().clone(),
        price,
        market_cap,
        volume_24h,
        change_24h_pct,
        last_updated: Some(last_updated),
        source: fields.provider,
        fetched_at,
    }))
}

/// `{"data": [{"priceUsd", "time": ms}, ..], "timestamp": ms}`
fn history(
    fields: &Fields,
    request: &DataRequest,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    let root = fields.root_object()?;
    let (Some(interval), Some(range)) = (request.interval(), request.range()) else {
        return Err(fields.malformed("$", "market-chart request without interval or range"));
    };

    let data = root
        .get("data")
        .ok_or_else(|| fields.malformed("data", "required field is missing"))?;
    let samples = fields.array(data, "data")?;
    if samples.is_empty() {
        return Err(fields.malformed("data", "series is empty"));
    }

    let prices = samples
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            let field = format!("data[{index}]");
            let sample = fields.object(sample, &field)?;

            let price_field = format!("{field}.priceUsd");
            let value = sample
                .get("priceUsd")
                .ok_or_else(|| fields.malformed(&price_field, "required field is missing"))?;
            let value = fields.non_negative(fields.decimal(value, &price_field)?, &price_field)?;

            let time_field = format!("{field}.time");
            let ts = sample
                .get("time")
                .ok_or_else(|| fields.malformed(&time_field, "required field is missing"))?;
            let ts = fields.unix_millis(ts, &time_field)?;

            Ok(ChartPoint { ts, value })
        })
        .collect::<Result<Vec<_>, SchemaMismatch>>()?;

    Ok(CanonicalRecord::MarketChart(ChartSeries {
        asset: request.asset().clone(),
        currency: request.currency().clone(),
        interval,
        range,
        prices,
        market_caps: Vec::new(),
        total_volumes: Vec::new(),
        source: fields.provider,
        fetched_at,
    }))
}
