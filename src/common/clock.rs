//! Clock abstraction for supporting both real time and manually driven time.
//!
//! The scheduler and engine ask an injected [`Clock`] for "now" instead of
//! calling `Utc::now()` directly, so iterations can be replayed at arbitrary
//! simulated instants in tests and previews.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;

/// Trait for abstracting time operations.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Check if this clock is driven manually rather than by the system.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Real-time implementation that uses the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock whose time only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }

    /// Move time forward.
    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
