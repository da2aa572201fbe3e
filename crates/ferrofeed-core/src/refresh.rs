//! Periodic refresh of a configured key set.
//!
//! The schedule itself belongs to the caller: [`Refresher::run`] only
//! reacts to ticks from a [`RefreshTrigger`].

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use crate::cache::CacheMode;
use crate::coordinator::{FetchCoordinator, ResolveOptions};
use crate::{BoxFuture, CacheKey, DataRequest, FetchErrorKind};

/// Quota identity charged for refresh fetches.
pub const REFRESH_CALLER: &str = "refresh";

/// Source of refresh ticks. Returning `false` stops the refresher.
pub trait RefreshTrigger: Send {
    fn tick(&mut self) -> BoxFuture<'_, bool>;
}

/// Fires immediately, then every `period`.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl RefreshTrigger for IntervalTrigger {
    fn tick(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.interval.tick().await;
            true
        })
    }
}

/// Fires a fixed number of times without waiting.
#[derive(Debug, Clone, Copy)]
pub struct CountedTrigger {
    remaining: usize,
}

impl CountedTrigger {
    pub const fn new(ticks: usize) -> Self {
        Self { remaining: ticks }
    }
}

impl RefreshTrigger for CountedTrigger {
    fn tick(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            if self.remaining == 0 {
                return false;
            }
            self.remaining -= 1;
            true
        })
    }
}

/// Requests to refresh on each tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub requests: Vec<DataRequest>,
}

impl RefreshPlan {
    pub fn new(requests: Vec<DataRequest>) -> Self {
        Self { requests }
    }
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<CacheKey>,
    pub failed: Vec<(CacheKey, FetchErrorKind)>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Refresher {
    coordinator: FetchCoordinator,
    plan: RefreshPlan,
}

impl Refresher {
    pub fn new(coordinator: FetchCoordinator, plan: RefreshPlan) -> Self {
        Self { coordinator, plan }
    }

    /// Resolve every planned request, bypassing cache reads. Concurrent
    /// on-demand calls for the same key share the refresh fetch.
    pub async fn run_once(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let options = ResolveOptions::default()
            .with_cache_mode(CacheMode::Refresh)
            .with_caller(REFRESH_CALLER);

        for request in &self.plan.requests {
            let key = request.cache_key();
            match self.coordinator.resolve_with(request, options.clone()).await {
                Ok(_) => report.refreshed.push(key),
                Err(error) => {
                    tracing::warn!(key = %key, code = error.code(), error = %error, "refresh failed");
                    report.failed.push((key, error.kind()));
                }
            }
        }

        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "refresh pass complete"
        );
        report
    }

    /// Run a pass per tick until the trigger stops. Expired cache entries
    /// and closed quota windows are purged after each pass. Returns the
    /// number of passes.
    pub async fn run(&self, trigger: &mut dyn RefreshTrigger) -> usize {
        let mut passes = 0;
        while trigger.tick().await {
            self.run_once().await;
            let purged = self.coordinator.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "purged expired cache entries");
            }
            let closed = self.coordinator.purge_closed_windows().await;
            if closed > 0 {
                tracing::debug!(closed, "purged closed quota windows");
            }
            passes += 1;
        }
        passes
    }
}
