use std::str::FromStr;

use ferrofeed_core::{
    AssetId, CanonicalRecord, ChartRange, Currency, DataRequest, FetchCoordinator, ResolveOptions,
};
use serde::Serialize;

use crate::cli::{ChartArgs, PriceArgs};
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct ResolveResponse<'a> {
    key: &'a str,
    cache_hit: bool,
    shared: bool,
    record: &'a CanonicalRecord,
}

pub async fn price(
    args: &PriceArgs,
    coordinator: &FetchCoordinator,
    options: ResolveOptions,
) -> Result<CommandOutput, CliError> {
    let request = DataRequest::simple_price(AssetId::parse(&args.asset)?, Currency::parse(&args.currency)?);
    resolve(&request, coordinator, options).await
}

pub async fn chart(
    args: &ChartArgs,
    coordinator: &FetchCoordinator,
    options: ResolveOptions,
) -> Result<CommandOutput, CliError> {
    let request = DataRequest::market_chart(
        AssetId::parse(&args.asset)?,
        Currency::parse(&args.currency)?,
        args.interval.into(),
        ChartRange::from_str(&args.days)?,
    );
    resolve(&request, coordinator, options).await
}

async fn resolve(
    request: &DataRequest,
    coordinator: &FetchCoordinator,
    options: ResolveOptions,
) -> Result<CommandOutput, CliError> {
    let resolved = coordinator.resolve_with(request, options).await?;
    let data = serde_json::to_value(ResolveResponse {
        key: resolved.key.as_str(),
        cache_hit: resolved.cache_hit,
        shared: resolved.shared,
        record: resolved.record.as_ref(),
    })?;
    Ok(CommandOutput::ok(data))
}
