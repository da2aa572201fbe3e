use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{AssetId, Currency};
use crate::ValidationError;

/// Canonical dataset families served by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetClass {
    /// Latest price snapshot.
    SimplePrice,
    /// Historical price/market-cap/volume series.
    MarketChart,
}

impl DatasetClass {
    pub const ALL: [Self; 2] = [Self::SimplePrice, Self::MarketChart];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimplePrice => "simple-price",
            Self::MarketChart => "market-chart",
        }
    }
}

impl Display for DatasetClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple-price" => Ok(Self::SimplePrice),
            "market-chart" => Ok(Self::MarketChart),
            other => Err(ValidationError::InvalidDataset {
                value: other.to_owned(),
            }),
        }
    }
}

/// Sampling granularity of a market chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minutely,
    Hourly,
    Daily,
}

impl Interval {
    pub const ALL: [Self; 3] = [Self::Minutely, Self::Hourly, Self::Daily];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutely => "minutely",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minutely" => Ok(Self::Minutely),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(ValidationError::InvalidInterval {
                value: other.to_owned(),
            }),
        }
    }
}

/// How far back a market chart reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChartRange {
    Days(u32),
    Max,
}

impl ChartRange {
    /// Day count, `None` for the full history.
    pub const fn days(self) -> Option<u32> {
        match self {
            Self::Days(days) => Some(days),
            Self::Max => None,
        }
    }
}

impl Display for ChartRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{days}"),
            Self::Max => f.write_str("max"),
        }
    }
}

impl FromStr for ChartRange {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(Self::Max);
        }
        match trimmed.parse::<u32>() {
            Ok(days) if days > 0 => Ok(Self::Days(days)),
            _ => Err(ValidationError::InvalidRange {
                value: trimmed.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for ChartRange {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChartRange> for String {
    fn from(value: ChartRange) -> Self {
        value.to_string()
    }
}

/// Deterministic cache identity of a [`DataRequest`].
///
/// Rendered as `<dataset>:<asset>:<currency>[:<interval>:<range>]`. Only a
/// validated request can produce one, so every call site agrees on the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CacheKey> for String {
    fn from(value: CacheKey) -> Self {
        value.0
    }
}

/// One logical data request, as accepted by `resolve()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataRequest {
    dataset: DatasetClass,
    asset: AssetId,
    currency: Currency,
    interval: Option<Interval>,
    range: Option<ChartRange>,
}

impl DataRequest {
    /// Validate a request. Simple-price takes no interval or range; a
    /// market chart needs a range and defaults to daily sampling.
    pub fn new(
        dataset: DatasetClass,
        asset: AssetId,
        currency: Currency,
        interval: Option<Interval>,
        range: Option<ChartRange>,
    ) -> Result<Self, ValidationError> {
        match dataset {
            DatasetClass::SimplePrice => {
                if interval.is_some() || range.is_some() {
                    return Err(ValidationError::UnexpectedChartField { dataset });
                }
                Ok(Self::simple_price(asset, currency))
            }
            DatasetClass::MarketChart => {
                let range = range.ok_or(ValidationError::MissingRange)?;
                Ok(Self::market_chart(
                    asset,
                    currency,
                    interval.unwrap_or(Interval::Daily),
                    range,
                ))
            }
        }
    }

    pub fn simple_price(asset: AssetId, currency: Currency) -> Self {
        Self {
            dataset: DatasetClass::SimplePrice,
            asset,
            currency,
            interval: None,
            range: None,
        }
    }

    pub fn market_chart(
        asset: AssetId,
        currency: Currency,
        interval: Interval,
        range: ChartRange,
    ) -> Self {
        Self {
            dataset: DatasetClass::MarketChart,
            asset,
            currency,
            interval: Some(interval),
            range: Some(range),
        }
    }

    pub const fn dataset(&self) -> DatasetClass {
        self.dataset
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub const fn interval(&self) -> Option<Interval> {
        self.interval
    }

    pub const fn range(&self) -> Option<ChartRange> {
        self.range
    }

    pub fn cache_key(&self) -> CacheKey {
        let mut key = format!("{}:{}:{}", self.dataset, self.asset, self.currency);
        if let Some(interval) = self.interval {
            key.push(':');
            key.push_str(interval.as_str());
        }
        if let Some(range) = self.range {
            key.push(':');
            key.push_str(&range.to_string());
        }
        CacheKey(key)
    }
}

impl Display for DataRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cache_key().as_str())
    }
}

/// Parses the cache key grammar back into a request.
impl FromStr for DataRequest {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        let malformed = || ValidationError::InvalidCacheKey {
            value: value.to_owned(),
        };
        if parts.len() != 3 && parts.len() != 5 {
            return Err(malformed());
        }

        let dataset = DatasetClass::from_str(parts[0])?;
        let asset = AssetId::parse(parts[1])?;
        let currency = Currency::parse(parts[2])?;
        let (interval, range) = match parts.get(3..5) {
            Some([interval, range]) => (
                Some(Interval::from_str(interval)?),
                Some(ChartRange::from_str(range)?),
            ),
            _ => (None, None),
        };

        Self::new(dataset, asset, currency, interval, range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(value: &str) -> AssetId {
        AssetId::parse(value).expect("asset")
    }

    #[test]
    fn simple_price_key_omits_chart_fields() {
        let request = DataRequest::simple_price(asset("btc"), Currency::usd());
        assert_eq!(request.cache_key().as_str(), "simple-price:BTC:USD");
    }

    #[test]
    fn market_chart_key_includes_interval_and_range() {
        let request = DataRequest::market_chart(
            asset("eth"),
            Currency::usd(),
            Interval::Daily,
            ChartRange::Days(30),
        );
        assert_eq!(request.cache_key().as_str(), "market-chart:ETH:USD:daily:30");
    }

    #[test]
    fn equivalent_inputs_produce_identical_keys() {
        let parsed: DataRequest = " market-chart:eth:usd:DAILY:30 ".parse().expect("parse");
        let built = DataRequest::new(
            DatasetClass::MarketChart,
            asset("ETH"),
            Currency::parse("usd").expect("currency"),
            None,
            Some(ChartRange::Days(30)),
        )
        .expect("build");
        assert_eq!(parsed.cache_key(), built.cache_key());
    }

    #[test]
    fn simple_price_rejects_chart_fields() {
        let err = DataRequest::new(
            DatasetClass::SimplePrice,
            asset("BTC"),
            Currency::usd(),
            Some(Interval::Daily),
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::UnexpectedChartField { .. }));
    }

    #[test]
    fn market_chart_requires_range() {
        let err = DataRequest::new(DatasetClass::MarketChart, asset("BTC"), Currency::usd(), None, None)
            .expect_err("must fail");
        assert_eq!(err, ValidationError::MissingRange);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(
            "simple-price:BTC".parse::<DataRequest>(),
            Err(ValidationError::InvalidCacheKey { .. })
        ));
        assert!(matches!(
            "market-chart:BTC:USD:daily:0".parse::<DataRequest>(),
            Err(ValidationError::InvalidRange { .. })
        ));
        assert!("market-chart:BTC:USD:daily:max".parse::<DataRequest>().is_ok());
    }
}
