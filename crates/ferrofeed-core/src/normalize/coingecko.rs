//! CoinGecko v3 payloads.

use serde_json::Value;

use super::Fields;
use crate::{
    CanonicalRecord, ChartPoint, ChartSeries, DataRequest, DatasetClass, PriceSnapshot, SchemaMismatch,
    UtcDateTime,
};

pub(super) fn normalize(
    fields: &Fields,
    request: &DataRequest,
    coin_id: &str,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    match request.dataset() {
        DatasetClass::SimplePrice => simple_price(fields, request, coin_id, fetched_at),
        DatasetClass::MarketChart => market_chart(fields, request, fetched_at),
    }
}

/// `{"<coin>": {"<ccy>": 1.0, "<ccy>_market_cap": .., "<ccy>_24h_vol": .., "<ccy>_24h_change": .., "last_updated_at": secs}}`
fn simple_price(
    fields: &Fields,
    request: &DataRequest,
    coin_id: &str,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    let root = fields.root_object()?;
    let coin = root
        .get(coin_id)
        .ok_or_else(|| fields.unknown_asset(coin_id))?;
    let coin = fields.object(coin, coin_id)?;

    let ccy = request.currency().to_provider_code();
    let price_field = format!("{coin_id}.{ccy}");
    let price = coin
        .get(&ccy)
        .ok_or_else(|| fields.unknown_asset(&price_field))?;
    let price = fields.non_negative(fields.number(price, &price_field)?, &price_field)?;

    let optional_number = |suffix: &str| -> Result<Option<f64>, SchemaMismatch> {
        let name = format!("{ccy}_{suffix}");
        Fields::optional(coin, &name)
            .map(|value| fields.number(value, &format!("{coin_id}.{name}")))
            .transpose()
    };
    let market_cap = optional_number("market_cap")?;
    let volume_24h = optional_number("24h_vol")?;
    let change_24h_pct = optional_number("24h_change")?;

    let last_updated = Fields::optional(coin, "last_updated_at")
        .map(|value| fields.unix_seconds(value, &format!("{coin_id}.last_updated_at")))
        .transpose()?;

    Ok(CanonicalRecord::SimplePrice(PriceSnapshot {
        asset: request.asset().clone(),
        currency: request.currency().clone(),
        price,
        market_cap,
        volume_24h,
        change_24h_pct,
        last_updated,
        source: fields.provider,
        fetched_at,
    }))
}

/// `{"prices": [[ms, v], ..], "market_caps": [..], "total_volumes": [..]}`
fn market_chart(
    fields: &Fields,
    request: &DataRequest,
    fetched_at: UtcDateTime,
) -> Result<CanonicalRecord, SchemaMismatch> {
    let root = fields.root_object()?;
    let (Some(interval), Some(range)) = (request.interval(), request.range()) else {
        return Err(fields.malformed("$", "market-chart request without interval or range"));
    };

    let prices = root
        .get("prices")
        .ok_or_else(|| fields.malformed("prices", "required field is missing"))?;
    let prices = points(fields, prices, "prices")?;
    if prices.is_empty() {
        return Err(fields.malformed("prices", "series is empty"));
    }

    let market_caps = match Fields::optional(root, "market_caps") {
        Some(value) => points(fields, value, "market_caps")?,
        None => Vec::new(),
    };
    let total_volumes = match Fields::optional(root, "total_volumes") {
        Some(value) => points(fields, value, "total_volumes")?,
        None => Vec::new(),
    };

    Ok(CanonicalRecord::MarketChart(ChartSeries {
        asset: request.asset().clone(),
        currency: request.currency().clone(),
        interval,
        range,
        prices,
        market_caps,
        total_volumes,
        source: fields.provider,
        fetched_at,
    }))
}

fn points(fields: &Fields, value: &Value, name: &str) -> Result<Vec<ChartPoint>, SchemaMismatch> {
    fields
        .array(value, name)?
        .iter()
        .enumerate()
        .map(|(index, pair)| {
            let field = format!("{name}[{index}]");
            match fields.array(pair, &field)? {
                [ts, value] => {
                    let ts = fields.unix_millis(ts, &format!("{field}[0]"))?;
                    let value_field = format!("{field}[1]");
                    let value = fields.non_negative(fields.number(value, &value_field)?, &value_field)?;
                    Ok(ChartPoint { ts, value })
                }
                other => Err(fields.malformed(&field, format!("expected [timestamp, value], found {} items", other.len()))),
            }
        })
        .collect()
}
