//! Injectable time sources.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::UtcDateTime;

/// Wall-clock source shared by the cache, rate limiter and coordinator.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<UtcDateTime>>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now = now.saturating_add(by);
    }

    pub fn set(&self, to: UtcDateTime) {
        *self.now.lock().expect("manual clock lock is not poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("manual clock lock is not poisoned")
    }
}
