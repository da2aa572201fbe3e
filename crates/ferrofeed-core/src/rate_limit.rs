//! Fixed-window quota gate for upstream calls.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::{BoxFuture, UtcDateTime};

/// Identity a quota is counted against: `<callerIdentity>:<endpointOrProvider>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    identity: String,
    endpoint: String,
}

impl LimiterKey {
    pub fn new(identity: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Display for LimiterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.identity, self.endpoint)
    }
}

/// Window size and allowance for one limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub window: Duration,
    pub max_count: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_count: 30,
        }
    }
}

/// Counter state of the current window for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub key: LimiterKey,
    pub window_start: UtcDateTime,
    pub count: u32,
    pub window_size: Duration,
    pub max_count: u32,
}

impl RateWindow {
    fn open(key: LimiterKey, now: UtcDateTime, window_size: Duration, max_count: u32) -> Self {
        Self {
            key,
            window_start: now,
            count: 0,
            window_size,
            max_count,
        }
    }

    pub fn window_end(&self) -> UtcDateTime {
        self.window_start.saturating_add(self.window_size)
    }

    /// Counter identity as a shared store would name it:
    /// `<callerIdentity>:<endpointOrProvider>:<windowStartEpoch>`.
    pub fn counter_id(&self) -> String {
        format!("{}:{}", self.key, self.window_start.unix_seconds())
    }
}

/// Outcome of one `allow` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub granted: bool,
    /// Zero when granted; otherwise time until the window closes.
    pub retry_after: Duration,
    /// Calls counted in the current window, this one included.
    pub count: u32,
    pub window_start: UtcDateTime,
    pub counter_id: String,
}

/// Quota gate consumed by the coordinator.
///
/// Implementations must perform reset, increment and compare as one atomic
/// step per key; a separate read then write lets concurrent callers overrun
/// the allowance.
pub trait RateLimiter: Send + Sync {
    fn allow<'a>(
        &'a self,
        key: &'a LimiterKey,
        window: Duration,
        max_count: u32,
    ) -> BoxFuture<'a, RateDecision>;

    /// Drop windows that have closed and return how many went. Limiters
    /// that keep no local state have nothing to drop.
    fn purge_closed<'a>(&'a self) -> BoxFuture<'a, usize> {
        Box::pin(async { 0 })
    }
}

/// In-process fixed-window limiter. Each key's window lives in a `DashMap`
/// entry whose guard serializes callers sharing that key.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    windows: Arc<DashMap<LimiterKey, RateWindow>>,
    clock: Arc<dyn Clock>,
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FixedWindowLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Synchronous form of [`RateLimiter::allow`].
    pub fn check(&self, key: &LimiterKey, window: Duration, max_count: u32) -> RateDecision {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::open(key.clone(), self.clock.now(), window, max_count));

        // Read the clock under the entry guard so a rollover is decided by
        // exactly one caller.
        let now = self.clock.now();
        let state = entry.value_mut();
        if now >= state.window_end() || state.window_size != window || state.max_count != max_count {
            *state = RateWindow::open(key.clone(), now, window, max_count);
        }

        state.count = state.count.saturating_add(1);
        let granted = state.count <= state.max_count;
        let retry_after = if granted {
            Duration::ZERO
        } else {
            state.window_end().saturating_duration_since(now).min(state.window_size)
        };

        RateDecision {
            granted,
            retry_after,
            count: state.count,
            window_start: state.window_start,
            counter_id: state.counter_id(),
        }
    }

    pub fn window(&self, key: &LimiterKey) -> Option<RateWindow> {
        self.windows.get(key).map(|entry| entry.value().clone())
    }

    /// Synchronous form of [`RateLimiter::purge_closed`].
    pub fn sweep_closed(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| now < window.window_end());
        before.saturating_sub(self.windows.len())
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow<'a>(
        &'a self,
        key: &'a LimiterKey,
        window: Duration,
        max_count: u32,
    ) -> BoxFuture<'a, RateDecision> {
        Box::pin(async move { self.check(key, window, max_count) })
    }

    fn purge_closed<'a>(&'a self) -> BoxFuture<'a, usize> {
        Box::pin(async move { self.sweep_closed() })
    }
}
