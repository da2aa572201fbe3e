//! CLI argument definitions for ferrofeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `price` | Resolve the latest price of an asset |
//! | `chart` | Resolve a historical market chart |
//! | `history` | Read persisted records from the local warehouse |
//! | `refresh` | Re-fetch the configured key set, once or on a schedule |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--provider` | `FERROFEED_PROVIDER` or `coingecko` | Upstream provider |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--timeout-ms` | `FERROFEED_LEASE_TIMEOUT_MS` | How long to wait for a fetch |
//! | `--no-cache` | `false` | Skip the cache for reads and writes |
//!
//! # Examples
//!
//! ```bash
//! ferrofeed price BTC
//! ferrofeed chart ETH --interval daily --days 30 --pretty
//! ferrofeed history BTC --from 2024-03-01T00:00:00Z
//! ferrofeed refresh --once
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

use ferrofeed_core::{Interval, ProviderId};

/// Cache-coordinated market data fetcher.
#[derive(Debug, Parser)]
#[command(
    name = "ferrofeed",
    author,
    version,
    about = "Cache-coordinated crypto market data CLI",
    long_about = "ferrofeed resolves normalized prices and charts through a TTL cache, \
a per-caller quota and a single in-flight fetch per key, and keeps every fetched \
record in a local DuckDB history.\n\
\n\
Configuration is read from FERROFEED_* environment variables; flags override them."
)]
pub struct Cli {
    /// Upstream provider to fetch from.
    #[arg(long, global = true, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// How long to wait for a fetch before giving up, in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Skip the cache: always fetch and do not store the result in cache.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Coingecko,
    Coincap,
}

impl From<ProviderArg> for ProviderId {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Coingecko => Self::CoinGecko,
            ProviderArg::Coincap => Self::CoinCap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IntervalArg {
    Minutely,
    Hourly,
    Daily,
}

impl From<IntervalArg> for Interval {
    fn from(value: IntervalArg) -> Self {
        match value {
            IntervalArg::Minutely => Self::Minutely,
            IntervalArg::Hourly => Self::Hourly,
            IntervalArg::Daily => Self::Daily,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve the latest price of an asset.
    ///
    ///   ferrofeed price BTC
    ///   ferrofeed price ETH --currency EUR
    Price(PriceArgs),

    /// Resolve a historical market chart.
    ///
    ///   ferrofeed chart BTC --days 7 --interval hourly
    ///   ferrofeed chart ETH --days max
    Chart(ChartArgs),

    /// Read persisted records for one series from the local warehouse.
    ///
    /// Without --interval the simple-price series is read.
    History(HistoryArgs),

    /// Re-fetch every configured refresh key.
    ///
    /// Runs on FERROFEED_REFRESH_INTERVAL_SECS until interrupted, or a
    /// single pass with --once.
    Refresh(RefreshArgs),
}

#[derive(Debug, Args)]
pub struct PriceArgs {
    /// Asset ticker (e.g. BTC, ETH).
    pub asset: String,

    #[arg(long, default_value = "USD")]
    pub currency: String,
}

#[derive(Debug, Args)]
pub struct ChartArgs {
    pub asset: String,

    #[arg(long, default_value = "USD")]
    pub currency: String,

    #[arg(long, value_enum, default_value_t = IntervalArg::Daily)]
    pub interval: IntervalArg,

    /// Days of history, or `max`.
    #[arg(long, default_value = "30")]
    pub days: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub asset: String,

    #[arg(long, default_value = "USD")]
    pub currency: String,

    /// Chart interval; omit to read price snapshots.
    #[arg(long, value_enum)]
    pub interval: Option<IntervalArg>,

    /// Inclusive RFC 3339 lower bound on fetch time. Defaults to the epoch.
    #[arg(long)]
    pub from: Option<String>,

    /// Inclusive RFC 3339 upper bound on fetch time. Defaults to now.
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Run one pass and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
}
