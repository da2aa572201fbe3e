//! # Ferrofeed Warehouse
//!
//! Durable, append-only history of normalized records backed by `DuckDB`.
//!
//! Every record resolved from an upstream provider is written once to the
//! `records` table together with the columns needed for time-series reads.
//! Rows are never updated or deleted; reads select a series by dataset,
//! asset, currency and interval and a `fetched_at` window.
//!
//! ```rust,no_run
//! use ferrofeed_warehouse::{RecordFilter, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! let rows = warehouse.query_records(&RecordFilter {
//!     dataset_class: String::from("simple-price"),
//!     asset_id: String::from("BTC"),
//!     currency: String::from("USD"),
//!     interval: None,
//!     from_ms: 0,
//!     to_ms: i64::MAX,
//! })?;
//! println!("{} snapshots", rows.len());
//! # Ok::<(), ferrofeed_warehouse::WarehouseError>(())
//! ```
//!
//! ## Security
//!
//! Every value is bound as a query parameter; no caller-supplied text is
//! interpolated into SQL.

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::ToSql;
use thiserror::Error;

pub use duckdb::{DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error while preparing the database directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The filter cannot describe a valid series window.
    #[error("invalid record filter: {0}")]
    InvalidFilter(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for ferrofeed data.
    pub ferrofeed_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at_home(resolve_ferrofeed_home())
    }
}

impl WarehouseConfig {
    /// Place the database under `<home>/cache/history.duckdb`.
    pub fn at_home(ferrofeed_home: impl Into<PathBuf>) -> Self {
        let ferrofeed_home = ferrofeed_home.into();
        let db_path = ferrofeed_home.join("cache").join("history.duckdb");
        Self {
            ferrofeed_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One persisted row. `payload` holds the full record as JSON; the other
/// columns are the series coordinates used for filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub dataset_class: String,
    pub asset_id: String,
    pub currency: String,
    pub interval: Option<String>,
    pub range: Option<String>,
    pub source: String,
    pub fetched_at_ms: i64,
    pub payload: String,
}

/// Series selector for [`Warehouse::query_records`]. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub dataset_class: String,
    pub asset_id: String,
    pub currency: String,
    /// `None` matches rows stored without an interval.
    pub interval: Option<String>,
    pub from_ms: i64,
    pub to_ms: i64,
}

/// The main warehouse interface for record history.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database described by `config`.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { manager };
        warehouse.initialize()?;
        tracing::debug!(path = %config.db_path.display(), "warehouse opened");
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Append one record. Rows are immutable once written.
    pub fn append_record(&self, record: &StoredRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 8] = [
            &record.dataset_class,
            &record.asset_id,
            &record.currency,
            &record.interval,
            &record.range,
            &record.source,
            &record.fetched_at_ms,
            &record.payload,
        ];
        connection.execute(
            "INSERT INTO records \
             (dataset_class, asset_id, currency, chart_interval, chart_range, source, fetched_at_ms, payload) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Read one series within `[from_ms, to_ms]`, oldest append first.
    pub fn query_records(&self, filter: &RecordFilter) -> Result<Vec<StoredRecord>, WarehouseError> {
        if filter.from_ms > filter.to_ms {
            return Err(WarehouseError::InvalidFilter(format!(
                "from ({}) is after to ({})",
                filter.from_ms, filter.to_ms
            )));
        }

        let connection = self.manager.acquire()?;
        let interval_clause = if filter.interval.is_some() {
            "chart_interval = ?"
        } else {
            "chart_interval IS NULL"
        };
        let sql = format!(
            "SELECT dataset_class, asset_id, currency, chart_interval, chart_range, source, fetched_at_ms, payload \
             FROM records \
             WHERE dataset_class = ? AND asset_id = ? AND currency = ? AND {interval_clause} \
             AND fetched_at_ms >= ? AND fetched_at_ms <= ? \
             ORDER BY seq"
        );

        let mut params: Vec<&dyn ToSql> = vec![
            &filter.dataset_class,
            &filter.asset_id,
            &filter.currency,
        ];
        if let Some(interval) = &filter.interval {
            params.push(interval);
        }
        params.push(&filter.from_ms);
        params.push(&filter.to_ms);

        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(StoredRecord {
                dataset_class: row.get(0)?,
                asset_id: row.get(1)?,
                currency: row.get(2)?,
                interval: row.get(3)?,
                range: row.get(4)?,
                source: row.get(5)?,
                fetched_at_ms: row.get(6)?,
                payload: row.get(7)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Total number of persisted rows.
    pub fn record_count(&self) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn resolve_ferrofeed_home() -> PathBuf {
    if let Ok(path) = env::var("FERROFEED_HOME") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(".ferrofeed");
    }

    PathBuf::from(".ferrofeed")
}
