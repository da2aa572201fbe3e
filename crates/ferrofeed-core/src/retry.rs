//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

use crate::BoxFuture;

/// Backoff strategy between upstream attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        delay: Duration,
    },
    /// `min(base * factor^n, max)` before retry `n` (0-based).
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Spread each delay uniformly over +/- 50%.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry `attempt` (0-based: the wait after the first failure is `delay(0)`).
    pub fn delay(self, attempt: u32) -> Duration {
        let delay = self.nominal(attempt);
        if !self.has_jitter() {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let spread = millis / 2;
        let offset = fastrand::u64(0..=spread.saturating_mul(2));
        Duration::from_millis(millis.saturating_sub(spread).saturating_add(offset))
    }

    /// Upper bound of `delay(attempt)`, jitter included.
    pub fn max_delay(self, attempt: u32) -> Duration {
        let delay = self.nominal(attempt);
        if !self.has_jitter() {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(millis.saturating_add(millis / 2))
    }

    fn has_jitter(self) -> bool {
        matches!(self, Self::Exponential { jitter: true, .. })
    }

    fn nominal(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base, factor, max, ..
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.max(1.0).powi(exponent);
                let capped = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };
                Duration::from_secs_f64(capped.max(0.0))
            }
        }
    }
}

/// Attempt budget and backoff for one upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff without jitter, as configured by deployment settings.
    pub fn exponential(max_attempts: u32, base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                factor,
                max,
                jitter: false,
            },
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = enabled;
        }
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Longest a full retry sequence can take when each attempt is allowed
    /// `per_attempt`: every attempt runs to its limit and every backoff
    /// draws its maximum.
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let attempts = self.attempts();
        let backoff = (0..attempts - 1)
            .map(|attempt| self.backoff.max_delay(attempt))
            .fold(Duration::ZERO, Duration::saturating_add);
        per_attempt.saturating_mul(attempts).saturating_add(backoff)
    }
}

/// HTTP statuses worth another attempt.
pub const fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500..=599)
}

/// Suspends the fetcher between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_secs(3));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_half_either_side() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..20 {
            for attempt in 0..5 {
                let capped = (100.0 * 2_f64.powi(attempt as i32)).min(1_000.0);
                let delay_ms = backoff.delay(attempt).as_millis() as f64;
                assert!(delay_ms >= capped * 0.5, "attempt={attempt}, delay_ms={delay_ms}");
                assert!(delay_ms <= capped * 1.5, "attempt={attempt}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 4);
        assert!(matches!(config.backoff, Backoff::Exponential { jitter: true, .. }));
        assert_eq!(RetryConfig::no_retry().attempts(), 1);
        assert_eq!(RetryConfig::fixed(Duration::ZERO, 0).attempts(), 1);
    }

    #[test]
    fn test_worst_case_covers_attempts_and_backoff() {
        let plain = RetryConfig::exponential(
            4,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(8),
        );
        // 4 x 5s + 0.5s + 1s + 2s
        assert_eq!(plain.worst_case(Duration::from_secs(5)), Duration::from_millis(23_500));

        let jittered = plain.clone().with_jitter(true);
        assert_eq!(jittered.worst_case(Duration::from_secs(5)), Duration::from_millis(25_250));
        for attempt in 0..3 {
            assert!(jittered.backoff.delay(attempt) <= jittered.backoff.max_delay(attempt));
        }

        assert_eq!(
            RetryConfig::no_retry().worst_case(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_transient_statuses() {
        for status in [408, 425, 429, 500, 502, 503, 504, 599] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [200, 400, 401, 403, 404, 422] {
            assert!(!is_transient_status(status), "{status}");
        }
    }
}
