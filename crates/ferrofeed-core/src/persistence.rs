//! Durable record history seam.
//!
//! The coordinator appends every normalized record through [`RecordStore`];
//! time-series reads go through [`RecordStore::query_range`]. Rows are
//! append-only and come back in append order.

use std::sync::{Arc, Mutex};

use ferrofeed_warehouse::{RecordFilter, StoredRecord, Warehouse, WarehouseError};
use thiserror::Error;

use crate::{AssetId, BoxFuture, CanonicalRecord, Currency, DatasetClass, Interval, UtcDateTime};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored row {seq} does not decode: {source}")]
    Decode {
        seq: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("range start {from} is after end {to}")]
    InvalidRange { from: UtcDateTime, to: UtcDateTime },

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Series selector. `interval: None` selects simple-price history,
/// `Some(i)` selects market-chart history sampled at `i`. Bounds apply to
/// `fetched_at` at millisecond precision, the warehouse's resolution, and
/// are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub asset: AssetId,
    pub currency: Currency,
    pub interval: Option<Interval>,
    pub from: UtcDateTime,
    pub to: UtcDateTime,
}

impl RangeQuery {
    pub const fn dataset(&self) -> DatasetClass {
        match self.interval {
            None => DatasetClass::SimplePrice,
            Some(_) => DatasetClass::MarketChart,
        }
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        let fetched_at = record.fetched_at().unix_millis();
        record.asset() == &self.asset
            && record.currency() == &self.currency
            && record.interval() == self.interval
            && fetched_at >= self.from.unix_millis()
            && fetched_at <= self.to.unix_millis()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.from > self.to {
            return Err(StoreError::InvalidRange {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }
}

pub trait RecordStore: Send + Sync {
    fn append<'a>(&'a self, record: &'a CanonicalRecord) -> BoxFuture<'a, Result<(), StoreError>>;

    fn query_range<'a>(&'a self, query: &'a RangeQuery) -> BoxFuture<'a, Result<Vec<CanonicalRecord>, StoreError>>;
}

/// Process-local history. Clones share the same rows.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    rows: Arc<Mutex<Vec<CanonicalRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("record store lock is not poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<CanonicalRecord> {
        self.rows.lock().expect("record store lock is not poisoned").clone()
    }
}

impl RecordStore for MemoryRecordStore {
    fn append<'a>(&'a self, record: &'a CanonicalRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.rows
                .lock()
                .expect("record store lock is not poisoned")
                .push(record.clone());
            Ok(())
        })
    }

    fn query_range<'a>(&'a self, query: &'a RangeQuery) -> BoxFuture<'a, Result<Vec<CanonicalRecord>, StoreError>> {
        Box::pin(async move {
            query.check()?;
            let rows = self.rows.lock().expect("record store lock is not poisoned");
            Ok(rows.iter().filter(|record| query.matches(record)).cloned().collect())
        })
    }
}

/// Map a record onto its warehouse row. The payload is the record's JSON,
/// so reading it back yields an equal record.
pub fn to_stored(record: &CanonicalRecord) -> Result<StoredRecord, StoreError> {
    Ok(StoredRecord {
        dataset_class: record.dataset().as_str().to_owned(),
        asset_id: record.asset().as_str().to_owned(),
        currency: record.currency().as_str().to_owned(),
        interval: record.interval().map(|interval| interval.as_str().to_owned()),
        range: record.range().map(|range| range.to_string()),
        source: record.source().as_str().to_owned(),
        fetched_at_ms: record.fetched_at().unix_millis(),
        payload: serde_json::to_string(record).map_err(StoreError::Encode)?,
    })
}

fn to_filter(query: &RangeQuery) -> RecordFilter {
    RecordFilter {
        dataset_class: query.dataset().as_str().to_owned(),
        asset_id: query.asset.as_str().to_owned(),
        currency: query.currency.as_str().to_owned(),
        interval: query.interval.map(|interval| interval.as_str().to_owned()),
        from_ms: query.from.unix_millis(),
        to_ms: query.to.unix_millis(),
    }
}

/// DuckDB work is blocking, so it runs on the blocking pool.
impl RecordStore for Warehouse {
    fn append<'a>(&'a self, record: &'a CanonicalRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let row = to_stored(record)?;
            let warehouse = self.clone();
            tokio::task::spawn_blocking(move || warehouse.append_record(&row))
                .await
                .map_err(|error| StoreError::Task(error.to_string()))??;
            Ok(())
        })
    }

    fn query_range<'a>(&'a self, query: &'a RangeQuery) -> BoxFuture<'a, Result<Vec<CanonicalRecord>, StoreError>> {
        Box::pin(async move {
            query.check()?;
            let filter = to_filter(query);
            let warehouse = self.clone();
            let rows = tokio::task::spawn_blocking(move || warehouse.query_records(&filter))
                .await
                .map_err(|error| StoreError::Task(error.to_string()))??;

            rows.iter()
                .enumerate()
                .map(|(seq, row)| {
                    serde_json::from_str(&row.payload).map_err(|source| StoreError::Decode { seq, source })
                })
                .collect()
        })
    }
}
