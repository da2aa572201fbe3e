use serde::{Deserialize, Serialize};

use super::{AssetId, ChartRange, Currency, DatasetClass, Interval, UtcDateTime};
use crate::source::ProviderId;

/// Canonical latest-price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub asset: AssetId,
    pub currency: Currency,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub change_24h_pct: Option<f64>,
    /// Provider-reported time of the price, when it reports one.
    pub last_updated: Option<UtcDateTime>,
    pub source: ProviderId,
    pub fetched_at: UtcDateTime,
}

/// One sample of a chart series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub ts: UtcDateTime,
    pub value: f64,
}

/// Canonical historical series. `prices` is never empty; providers that do
/// not report caps or volumes leave those series empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub asset: AssetId,
    pub currency: Currency,
    pub interval: Interval,
    pub range: ChartRange,
    pub prices: Vec<ChartPoint>,
    pub market_caps: Vec<ChartPoint>,
    pub total_volumes: Vec<ChartPoint>,
    pub source: ProviderId,
    pub fetched_at: UtcDateTime,
}

impl ChartSeries {
    pub fn latest_price(&self) -> Option<ChartPoint> {
        self.prices.last().copied()
    }
}

/// A normalized record, one variant per dataset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataset_class", rename_all = "kebab-case")]
pub enum CanonicalRecord {
    SimplePrice(PriceSnapshot),
    MarketChart(ChartSeries),
}

impl CanonicalRecord {
    pub const fn dataset(&self) -> DatasetClass {
        match self {
            Self::SimplePrice(_) => DatasetClass::SimplePrice,
            Self::MarketChart(_) => DatasetClass::MarketChart,
        }
    }

    pub fn asset(&self) -> &AssetId {
        match self {
            Self::SimplePrice(snapshot) => &snapshot.asset,
            Self::MarketChart(series) => &series.asset,
        }
    }

    pub fn currency(&self) -> &Currency {
        match self {
            Self::SimplePrice(snapshot) => &snapshot.currency,
            Self::MarketChart(series) => &series.currency,
        }
    }

    pub const fn interval(&self) -> Option<Interval> {
        match self {
            Self::SimplePrice(_) => None,
            Self::MarketChart(series) => Some(series.interval),
        }
    }

    pub const fn range(&self) -> Option<ChartRange> {
        match self {
            Self::SimplePrice(_) => None,
            Self::MarketChart(series) => Some(series.range),
        }
    }

    pub const fn source(&self) -> ProviderId {
        match self {
            Self::SimplePrice(snapshot) => snapshot.source,
            Self::MarketChart(series) => series.source,
        }
    }

    pub const fn fetched_at(&self) -> UtcDateTime {
        match self {
            Self::SimplePrice(snapshot) => snapshot.fetched_at,
            Self::MarketChart(series) => series.fetched_at,
        }
    }

    pub fn as_price(&self) -> Option<&PriceSnapshot> {
        match self {
            Self::SimplePrice(snapshot) => Some(snapshot),
            Self::MarketChart(_) => None,
        }
    }

    pub fn as_chart(&self) -> Option<&ChartSeries> {
        match self {
            Self::SimplePrice(_) => None,
            Self::MarketChart(series) => Some(series),
        }
    }
}
