//! Time sources and the service-day boundary.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, TimeDelta, Utc};
use common::ServiceDay;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps instants to service days.
///
/// A new service day starts every day at `reset_time`, local to `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCalendar {
    reset_time: NaiveTime,
    offset: FixedOffset,
}

impl ServiceCalendar {
    pub fn new(reset_time: NaiveTime, offset: FixedOffset) -> Self {
        Self { reset_time, offset }
    }

    pub fn reset_time(&self) -> NaiveTime {
        self.reset_time
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Returns the service day `instant` belongs to.
    pub fn service_day(&self, instant: DateTime<Utc>) -> ServiceDay {
        ServiceDay::containing(instant, self.reset_time, self.offset)
    }
}

impl Default for ServiceCalendar {
    /// Midnight UTC.
    fn default() -> Self {
        Self {
            reset_time: NaiveTime::MIN,
            offset: Utc.fix(),
        }
    }
}
