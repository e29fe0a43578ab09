//! Engine configuration loaded from environment variables.

use std::str::FromStr;

use chrono::{FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};
use store::StoreConfig;

use crate::clock::ServiceCalendar;

/// Fewest attempts the ticket sequencer is allowed to make.
pub const MIN_TICKET_ATTEMPTS: u32 = 3;

/// How status machines treat moves outside their transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Reject moves the table does not allow.
    #[default]
    Strict,

    /// Accept any move.
    Permissive,
}

impl TransitionPolicy {
    /// Returns true if a move the table judged as `legal` may proceed.
    pub fn permits(&self, legal: bool) -> bool {
        legal || *self == TransitionPolicy::Permissive
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPolicy::Strict => "strict",
            TransitionPolicy::Permissive => "permissive",
        }
    }
}

impl std::fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(TransitionPolicy::Strict),
            "permissive" => Ok(TransitionPolicy::Permissive),
            other => Err(format!("unknown transition policy '{other}'")),
        }
    }
}

/// Engine settings with sensible defaults.
///
/// Reads from environment variables:
/// - `TICKET_MAX_ATTEMPTS`: ticket sequencing attempts, at least 3 (default: `3`)
/// - `ORDER_MAX_ATTEMPTS`: order placement attempts on transient failures (default: `3`)
/// - `MIN_LINE_ITEMS`: smallest accepted cart (default: `1`)
/// - `RESTOCK_ON_CANCEL`: return stock when an order is cancelled (default: `false`)
/// - `TRANSITION_POLICY`: `strict` or `permissive` (default: `strict`)
/// - `QUEUE_RESET_TIME`: local `HH:MM` at which ticket numbers restart (default: `00:00`)
/// - `QUEUE_UTC_OFFSET_MINUTES`: local offset from UTC (default: `0`)
///
/// Database settings come from [`StoreConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub ticket_max_attempts: u32,
    pub order_max_attempts: u32,
    pub min_line_items: usize,
    pub restock_on_cancel: bool,
    pub transition_policy: TransitionPolicy,
    pub calendar: ServiceCalendar,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            ..Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Builds the engine settings from an arbitrary key lookup.
    ///
    /// Database settings are left at their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let reset_time = match lookup("QUEUE_RESET_TIME") {
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").unwrap_or_else(|_| {
                tracing::warn!(
                    key = "QUEUE_RESET_TIME",
                    value = %raw,
                    "ignoring invalid configuration value"
                );
                defaults.calendar.reset_time()
            }),
            None => defaults.calendar.reset_time(),
        };

        let offset_minutes: i32 = parsed_or(&lookup, "QUEUE_UTC_OFFSET_MINUTES", 0);
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(offset_minutes, "ignoring out-of-range UTC offset");
                defaults.calendar.offset()
            });

        Self {
            store: defaults.store,
            ticket_max_attempts: parsed_or(&lookup, "TICKET_MAX_ATTEMPTS", defaults.ticket_max_attempts)
                .max(MIN_TICKET_ATTEMPTS),
            order_max_attempts: parsed_or(&lookup, "ORDER_MAX_ATTEMPTS", defaults.order_max_attempts)
                .max(1),
            min_line_items: parsed_or(&lookup, "MIN_LINE_ITEMS", defaults.min_line_items).max(1),
            restock_on_cancel: parsed_or(&lookup, "RESTOCK_ON_CANCEL", defaults.restock_on_cancel),
            transition_policy: parsed_or(
                &lookup,
                "TRANSITION_POLICY",
                defaults.transition_policy,
            ),
            calendar: ServiceCalendar::new(reset_time, offset),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ticket_max_attempts: MIN_TICKET_ATTEMPTS,
            order_max_attempts: 3,
            min_line_items: 1,
            restock_on_cancel: false,
            transition_policy: TransitionPolicy::Strict,
            calendar: ServiceCalendar::default(),
        }
    }
}

fn parsed_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring invalid configuration value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.ticket_max_attempts, 3);
        assert_eq!(config.order_max_attempts, 3);
        assert_eq!(config.min_line_items, 1);
        assert!(!config.restock_on_cancel);
        assert_eq!(config.transition_policy, TransitionPolicy::Strict);
        assert_eq!(config.calendar, ServiceCalendar::default());
    }

    #[test]
    fn test_reads_every_setting() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TICKET_MAX_ATTEMPTS", "5"),
            ("ORDER_MAX_ATTEMPTS", "2"),
            ("MIN_LINE_ITEMS", "2"),
            ("RESTOCK_ON_CANCEL", "true"),
            ("TRANSITION_POLICY", "Permissive"),
            ("QUEUE_RESET_TIME", "04:30"),
            ("QUEUE_UTC_OFFSET_MINUTES", "-300"),
        ]));

        assert_eq!(config.ticket_max_attempts, 5);
        assert_eq!(config.order_max_attempts, 2);
        assert_eq!(config.min_line_items, 2);
        assert!(config.restock_on_cancel);
        assert_eq!(config.transition_policy, TransitionPolicy::Permissive);
        assert_eq!(
            config.calendar.reset_time(),
            NaiveTime::from_hms_opt(4, 30, 0).unwrap()
        );
        assert_eq!(config.calendar.offset().local_minus_utc(), -300 * 60);
    }

    #[test]
    fn test_ticket_attempts_are_clamped() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TICKET_MAX_ATTEMPTS", "1"),
            ("ORDER_MAX_ATTEMPTS", "0"),
            ("MIN_LINE_ITEMS", "0"),
        ]));
        assert_eq!(config.ticket_max_attempts, MIN_TICKET_ATTEMPTS);
        assert_eq!(config.order_max_attempts, 1);
        assert_eq!(config.min_line_items, 1);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TICKET_MAX_ATTEMPTS", "lots"),
            ("TRANSITION_POLICY", "lenient"),
            ("QUEUE_RESET_TIME", "25:00"),
            ("QUEUE_UTC_OFFSET_MINUTES", "100000"),
        ]));
        assert_eq!(config.ticket_max_attempts, 3);
        assert_eq!(config.transition_policy, TransitionPolicy::Strict);
        assert_eq!(config.calendar, ServiceCalendar::default());
    }

    #[test]
    fn test_policy_permits() {
        assert!(TransitionPolicy::Strict.permits(true));
        assert!(!TransitionPolicy::Strict.permits(false));
        assert!(TransitionPolicy::Permissive.permits(false));
    }
}
