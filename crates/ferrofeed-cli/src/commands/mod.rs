mod history;
mod refresh;
mod resolve;

use std::sync::Arc;
use std::time::Duration;

use ferrofeed_core::{
    CacheMode, FeedConfig, FetchCoordinator, ProviderClient, ReqwestHttpClient, ResolveOptions,
};
use ferrofeed_warehouse::Warehouse;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// JSON written to stdout and the process exit code that goes with it.
#[derive(Debug)]
pub struct CommandOutput {
    pub data: Value,
    pub exit_code: u8,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self { data, exit_code: 0 }
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = load_config(cli)?;
    let warehouse = Warehouse::open_default()?;

    match &cli.command {
        Command::Price(args) => {
            let coordinator = build_coordinator(&config, &warehouse)?;
            resolve::price(args, &coordinator, resolve_options(cli)).await
        }
        Command::Chart(args) => {
            let coordinator = build_coordinator(&config, &warehouse)?;
            resolve::chart(args, &coordinator, resolve_options(cli)).await
        }
        Command::History(args) => history::run(args, &warehouse).await,
        Command::Refresh(args) => {
            let coordinator = build_coordinator(&config, &warehouse)?;
            refresh::run(args, coordinator, &config).await
        }
    }
}

/// Environment configuration with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<FeedConfig, CliError> {
    let mut config = FeedConfig::from_env()?;
    if let Some(provider) = cli.provider {
        config.provider = provider.into();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.lease_timeout = Duration::from_millis(timeout_ms);
    }
    Ok(config)
}

fn build_coordinator(config: &FeedConfig, warehouse: &Warehouse) -> Result<FetchCoordinator, CliError> {
    let settings = config.provider_settings()?;
    tracing::debug!(provider = %settings.provider, base_url = %settings.base_url, "provider configured");
    let client = ProviderClient::new(settings, Arc::new(ReqwestHttpClient::new()));

    Ok(FetchCoordinator::builder(Arc::new(client))
        .config(config)
        .store(Arc::new(warehouse.clone()))
        .build())
}

fn resolve_options(cli: &Cli) -> ResolveOptions {
    let cache_mode = if cli.no_cache {
        CacheMode::Bypass
    } else {
        CacheMode::Use
    };
    ResolveOptions::default().with_cache_mode(cache_mode)
}
