//! The calendar date that scopes ticket numbering.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A service day.
///
/// Ticket numbers restart at 1 every service day. A service day does not have
/// to start at midnight: with a reset time of 04:00, a ticket issued at 01:30
/// still belongs to the previous calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceDay(NaiveDate);

impl ServiceDay {
    /// Wraps a calendar date.
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Builds a service day from year, month and day, if valid.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Returns the service day an instant belongs to.
    ///
    /// `offset` is the store's local UTC offset and `reset` the local
    /// wall-clock time at which a new service day begins.
    pub fn containing(instant: DateTime<Utc>, reset: NaiveTime, offset: FixedOffset) -> Self {
        let local = instant.with_timezone(&offset);
        let date = local.date_naive();
        if local.time() < reset {
            Self(date.pred_opt().unwrap_or(date))
        } else {
            Self(date)
        }
    }

    /// Returns the underlying calendar date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for ServiceDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<NaiveDate> for ServiceDay {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}
