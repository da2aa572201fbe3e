use ferrofeed_core::{AssetId, Currency, RangeQuery, RecordStore, UtcDateTime};
use ferrofeed_warehouse::Warehouse;
use serde::Serialize;

use crate::cli::HistoryArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct HistoryResponse<T> {
    count: usize,
    records: Vec<T>,
}

pub async fn run(args: &HistoryArgs, warehouse: &Warehouse) -> Result<CommandOutput, CliError> {
    let from = match &args.from {
        Some(value) => UtcDateTime::parse(value)?,
        None => UtcDateTime::from_unix_millis(0)?,
    };
    let to = match &args.to {
        Some(value) => UtcDateTime::parse(value)?,
        None => UtcDateTime::now(),
    };
    let query = RangeQuery {
        asset: AssetId::parse(&args.asset)?,
        currency: Currency::parse(&args.currency)?,
        interval: args.interval.map(Into::into),
        from,
        to,
    };

    let records = warehouse.query_range(&query).await?;
    tracing::debug!(count = records.len(), dataset = %query.dataset(), "history read");
    let data = serde_json::to_value(HistoryResponse {
        count: records.len(),
        records,
    })?;
    Ok(CommandOutput::ok(data))
}
