use ferrofeed_core::{
    BoxFuture, FeedConfig, FetchCoordinator, IntervalTrigger, RefreshPlan, RefreshReport,
    RefreshTrigger, Refresher,
};
use serde::Serialize;
use serde_json::json;

use crate::cli::RefreshArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct FailedKey<'a> {
    key: &'a str,
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct RefreshResponse<'a> {
    refreshed: Vec<&'a str>,
    failed: Vec<FailedKey<'a>>,
}

pub async fn run(
    args: &RefreshArgs,
    coordinator: FetchCoordinator,
    config: &FeedConfig,
) -> Result<CommandOutput, CliError> {
    let refresher = Refresher::new(coordinator, RefreshPlan::new(config.refresh_keys.clone()));

    if args.once {
        let report = refresher.run_once().await;
        let data = serde_json::to_value(response(&report))?;
        let exit_code = if report.is_clean() { 0 } else { 4 };
        return Ok(CommandOutput::ok(data).with_exit_code(exit_code));
    }

    tracing::info!(
        keys = config.refresh_keys.len(),
        interval_secs = config.refresh_interval.as_secs(),
        "refresh loop started"
    );
    let mut trigger = UntilInterrupted {
        inner: IntervalTrigger::new(config.refresh_interval),
    };
    let passes = refresher.run(&mut trigger).await;
    Ok(CommandOutput::ok(json!({ "passes": passes })))
}

fn response(report: &RefreshReport) -> RefreshResponse<'_> {
    RefreshResponse {
        refreshed: report.refreshed.iter().map(|key| key.as_str()).collect(),
        failed: report
            .failed
            .iter()
            .map(|(key, kind)| FailedKey {
                key: key.as_str(),
                kind: kind.as_str(),
            })
            .collect(),
    }
}

/// Interval ticks until Ctrl-C.
struct UntilInterrupted {
    inner: IntervalTrigger,
}

impl RefreshTrigger for UntilInterrupted {
    fn tick(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            tokio::select! {
                ticked = self.inner.tick() => ticked,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, stopping refresh loop");
                    false
                }
            }
        })
    }
}
