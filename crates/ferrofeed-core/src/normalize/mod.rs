//! # Schema Normalizer
//!
//! Maps raw provider payloads onto [`CanonicalRecord`] shapes.
//!
//! | Provider | simple-price | market-chart |
//! |----------|--------------|--------------|
//! | CoinGecko v3 | `/simple/price` | `/coins/{id}/market_chart` |
//! | CoinCap v2 | `/assets/{id}` | `/assets/{id}/history` |
//!
//! Normalization is pure: the same payload, request and fetch time always
//! produce the same record or the same [`SchemaMismatch`]. Required fields
//! that are absent or mistyped fail the whole payload; fields the mapping
//! does not read are dropped.

mod coincap;
mod coingecko;

use serde_json::{Map, Value};

use crate::{CanonicalRecord, DataRequest, DatasetClass, ProviderId, SchemaMismatch, UtcDateTime};

/// Body of one successful upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub provider: ProviderId,
    pub status: u16,
    pub body: String,
    pub received_at: UtcDateTime,
}

/// Stateless mapping from provider schemas to canonical records.
#[derive(Debug, Default, Clone, Copy)]
pub struct Normalizer;

impl Normalizer {
    /// Normalize `raw` for `request`. `provider_asset_id` is the provider's
    /// own id for the requested asset (`bitcoin` for `BTC`).
    pub fn normalize(
        &self,
        raw: &RawPayload,
        request: &DataRequest,
        provider_asset_id: &str,
    ) -> Result<CanonicalRecord, SchemaMismatch> {
        let fields = Fields::parse(raw.provider, request.dataset(), &raw.body)?;
        match raw.provider {
            ProviderId::CoinGecko => {
                coingecko::normalize(&fields, request, provider_asset_id, raw.received_at)
            }
            ProviderId::CoinCap => coincap::normalize(&fields, request, raw.received_at),
        }
    }
}

/// Parsed payload plus the context needed to report a mismatch.
pub(crate) struct Fields {
    provider: ProviderId,
    dataset: DatasetClass,
    root: Value,
}

impl Fields {
    fn parse(provider: ProviderId, dataset: DatasetClass, body: &str) -> Result<Self, SchemaMismatch> {
        let root = serde_json::from_str(body)
            .map_err(|error| SchemaMismatch::malformed(provider, dataset, "$", format!("invalid JSON: {error}")))?;
        Ok(Self {
            provider,
            dataset,
            root,
        })
    }

    fn malformed(&self, field: &str, reason: impl Into<String>) -> SchemaMismatch {
        SchemaMismatch::malformed(self.provider, self.dataset, field, reason)
    }

    fn unknown_asset(&self, field: &str) -> SchemaMismatch {
        SchemaMismatch::unknown_asset(self.provider, self.dataset, field)
    }

    fn root_object(&self) -> Result<&Map<String, Value>, SchemaMismatch> {
        self.root
            .as_object()
            .ok_or_else(|| self.malformed("$", "expected a JSON object"))
    }

    fn object<'a>(&self, value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, SchemaMismatch> {
        value
            .as_object()
            .ok_or_else(|| self.malformed(field, "expected an object"))
    }

    fn array<'a>(&self, value: &'a Value, field: &str) -> Result<&'a [Value], SchemaMismatch> {
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.malformed(field, "expected an array"))
    }

    /// Finite JSON number.
    fn number(&self, value: &Value, field: &str) -> Result<f64, SchemaMismatch> {
        let number = value
            .as_f64()
            .ok_or_else(|| self.malformed(field, format!("expected a number, found {}", type_name(value))))?;
        if !number.is_finite() {
            return Err(self.malformed(field, "number is not finite"));
        }
        Ok(number)
    }

    /// Finite number carried as a decimal string.
    fn decimal(&self, value: &Value, field: &str) -> Result<f64, SchemaMismatch> {
        let text = value
            .as_str()
            .ok_or_else(|| self.malformed(field, format!("expected a decimal string, found {}", type_name(value))))?;
        let number: f64 = text
            .trim()
            .parse()
            .map_err(|_| self.malformed(field, format!("'{text}' is not a decimal")))?;
        if !number.is_finite() {
            return Err(self.malformed(field, "number is not finite"));
        }
        Ok(number)
    }

    fn non_negative(&self, value: f64, field: &str) -> Result<f64, SchemaMismatch> {
        if value < 0.0 {
            return Err(self.malformed(field, format!("{value} is negative")));
        }
        Ok(value)
    }

    /// Integral unix milliseconds.
    fn unix_millis(&self, value: &Value, field: &str) -> Result<UtcDateTime, SchemaMismatch> {
        let millis = integral(value).ok_or_else(|| self.malformed(field, "expected integral unix milliseconds"))?;
        UtcDateTime::from_unix_millis(millis).map_err(|error| self.malformed(field, error.to_string()))
    }

    fn unix_seconds(&self, value: &Value, field: &str) -> Result<UtcDateTime, SchemaMismatch> {
        let seconds = integral(value).ok_or_else(|| self.malformed(field, "expected integral unix seconds"))?;
        UtcDateTime::from_unix_seconds(seconds).map_err(|error| self.malformed(field, error.to_string()))
    }

    /// Optional field: absent and `null` both read as `None`.
    fn optional<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
        object.get(name).filter(|value| !value.is_null())
    }
}

fn integral(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    let float = value.as_f64()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() < 9.0e15 {
        return Some(float as i64);
    }
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetId, Currency, MismatchCause};

    fn raw(provider: ProviderId, body: &str) -> RawPayload {
        RawPayload {
            provider,
            status: 200,
            body: body.to_owned(),
            received_at: UtcDateTime::parse("2024-03-01T12:00:00Z").expect("ts"),
        }
    }

    fn btc_price() -> DataRequest {
        DataRequest::simple_price(AssetId::parse("BTC").expect("asset"), Currency::usd())
    }

    #[test]
    fn invalid_json_is_a_malformed_root() {
        let error = Normalizer
            .normalize(&raw(ProviderId::CoinGecko, "<html>"), &btc_price(), "bitcoin")
            .expect_err("not json");
        assert_eq!(error.field, "$");
        assert_eq!(error.cause, MismatchCause::Malformed);
    }

    #[test]
    fn same_input_gives_same_output() {
        let payload = raw(ProviderId::CoinGecko, r#"{"bitcoin":{"usd":61000.5}}"#);
        let first = Normalizer.normalize(&payload, &btc_price(), "bitcoin");
        let second = Normalizer.normalize(&payload, &btc_price(), "bitcoin");
        assert_eq!(first, second);
        assert!(first.is_ok());
    }

    #[test]
    fn providers_map_onto_the_same_shape() {
        let gecko = Normalizer
            .normalize(&raw(ProviderId::CoinGecko, r#"{"bitcoin":{"usd":61000.5}}"#), &btc_price(), "bitcoin")
            .expect("gecko");
        let cap = Normalizer
            .normalize(
                &raw(
                    ProviderId::CoinCap,
                    r#"{"data":{"id":"bitcoin","symbol":"BTC","priceUsd":"61000.5"},"timestamp":1709294400000}"#,
                ),
                &btc_price(),
                "bitcoin",
            )
            .expect("coincap");

        assert_eq!(gecko.dataset(), cap.dataset());
        assert_eq!(
            gecko.as_price().map(|snapshot| snapshot.price),
            cap.as_price().map(|snapshot| snapshot.price)
        );
    }

    #[test]
    fn integral_accepts_whole_floats_only() {
        assert_eq!(integral(&serde_json::json!(1_709_294_400_000_i64)), Some(1_709_294_400_000));
        assert_eq!(integral(&serde_json::json!(1.709_294_4e12)), Some(1_709_294_400_000));
        assert_eq!(integral(&serde_json::json!(1.5)), None);
        assert_eq!(integral(&serde_json::json!("1")), None);
    }
}
