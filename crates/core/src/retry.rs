//! Retry schedules for back-checks, callbacks and channel fan-out.
//!
//! Tenants configure a [`RetryPolicy`] (JSON, part of `BusinessConfig`);
//! building it yields a [`RetryStrategy`] that can step either statelessly
//! (`next_with_retries`, given an explicit attempt count persisted
//! elsewhere) or statefully (`next`, with an internal atomic counter).

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Serializable retry configuration.
///
/// Intervals are in milliseconds. `max_retries <= 0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryPolicy {
    Fixed {
        interval_ms: i64,
        max_retries: i32,
    },
    Exponential {
        initial_interval_ms: i64,
        max_interval_ms: i64,
        max_retries: i32,
    },
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, max_retries: i32) -> Self {
        Self::Fixed {
            interval_ms: interval.as_millis() as i64,
            max_retries,
        }
    }

    pub fn exponential(initial: Duration, max: Duration, max_retries: i32) -> Self {
        Self::Exponential {
            initial_interval_ms: initial.as_millis() as i64,
            max_interval_ms: max.as_millis() as i64,
            max_retries,
        }
    }

    /// Build the runnable strategy for this policy.
    pub fn build(&self) -> CoreResult<RetryStrategy> {
        match *self {
            RetryPolicy::Fixed {
                interval_ms,
                max_retries,
            } => {
                if interval_ms <= 0 {
                    return Err(CoreError::invalid_parameter("fixed retry interval"));
                }
                Ok(RetryStrategy::fixed(interval_ms, max_retries))
            }
            RetryPolicy::Exponential {
                initial_interval_ms,
                max_interval_ms,
                max_retries,
            } => {
                if initial_interval_ms <= 0 || max_interval_ms < initial_interval_ms {
                    return Err(CoreError::invalid_parameter("exponential retry intervals"));
                }
                Ok(RetryStrategy::exponential(
                    initial_interval_ms,
                    max_interval_ms,
                    max_retries,
                ))
            }
        }
    }
}

enum Schedule {
    Fixed {
        interval_ms: i64,
    },
    Exponential {
        initial_ms: i64,
        max_ms: i64,
        /// Set once the doubling hits (or overflows past) the ceiling; every
        /// later attempt returns `max_ms` without recomputing the power.
        max_reached: AtomicBool,
    },
}

/// Runnable retry schedule.
pub struct RetryStrategy {
    max_retries: i32,
    retries: AtomicI32,
    schedule: Schedule,
}

impl RetryStrategy {
    fn fixed(interval_ms: i64, max_retries: i32) -> Self {
        Self {
            max_retries,
            retries: AtomicI32::new(0),
            schedule: Schedule::Fixed { interval_ms },
        }
    }

    fn exponential(initial_ms: i64, max_ms: i64, max_retries: i32) -> Self {
        Self {
            max_retries,
            retries: AtomicI32::new(0),
            schedule: Schedule::Exponential {
                initial_ms,
                max_ms,
                max_reached: AtomicBool::new(false),
            },
        }
    }

    /// Interval before attempt `retries` (1-based), or `None` once the
    /// budget is exhausted.
    pub fn next_with_retries(&self, retries: i32) -> Option<Duration> {
        if self.max_retries > 0 && retries > self.max_retries {
            return None;
        }
        let millis = match &self.schedule {
            Schedule::Fixed { interval_ms } => *interval_ms,
            Schedule::Exponential {
                initial_ms,
                max_ms,
                max_reached,
            } => {
                if max_reached.load(Ordering::Relaxed) {
                    *max_ms
                } else {
                    let interval = initial_ms.checked_shl(retries.saturating_sub(1) as u32);
                    match interval {
                        Some(v) if v > 0 && v <= *max_ms => v,
                        // Clamped or overflowed: sticky from here on.
                        _ => {
                            max_reached.store(true, Ordering::Relaxed);
                            *max_ms
                        }
                    }
                }
            }
        };
        Some(Duration::from_millis(millis as u64))
    }

    /// Stateful step: bumps the internal attempt counter and returns the
    /// interval for that attempt.
    pub fn next(&self) -> Option<Duration> {
        let retries = self.retries.fetch_add(1, Ordering::Relaxed) + 1;
        self.next_with_retries(retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_returns_constant_interval_until_exhausted() {
        let strategy = RetryPolicy::fixed(Duration::from_secs(1), 3).build().unwrap();
        assert_eq!(strategy.next_with_retries(1), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_with_retries(3), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_with_retries(4), None);
    }

    #[test]
    fn fixed_zero_max_retries_is_unlimited() {
        let strategy = RetryPolicy::fixed(Duration::from_millis(100), 0)
            .build()
            .unwrap();
        assert_eq!(
            strategy.next_with_retries(1_000_000),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn exponential_doubles_then_clamps() {
        let strategy =
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), 5)
                .build()
                .unwrap();
        let seq: Vec<_> = (1..=5).map(|n| strategy.next_with_retries(n)).collect();
        assert_eq!(
            seq,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(4)),
            ]
        );
        assert_eq!(strategy.next_with_retries(6), None);
    }

    #[test]
    fn exponential_clamp_is_sticky() {
        let strategy =
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), 0)
                .build()
                .unwrap();
        assert_eq!(strategy.next_with_retries(10), Some(Duration::from_secs(4)));
        // Once clamped, even an earlier attempt count reports the ceiling.
        assert_eq!(strategy.next_with_retries(1), Some(Duration::from_secs(4)));
    }

    #[test]
    fn exponential_overflow_clamps() {
        let strategy =
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30), 0)
                .build()
                .unwrap();
        // 1s << 200 overflows; the schedule must fall back to the ceiling.
        assert_eq!(strategy.next_with_retries(200), Some(Duration::from_secs(30)));
    }

    #[test]
    fn stateful_next_advances_the_counter() {
        let strategy =
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(8), 3)
                .build()
                .unwrap();
        assert_eq!(strategy.next(), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next(), Some(Duration::from_secs(2)));
        assert_eq!(strategy.next(), Some(Duration::from_secs(4)));
        assert_eq!(strategy.next(), None);
    }

    #[test]
    fn invalid_policies_are_rejected() {
        assert!(RetryPolicy::fixed(Duration::ZERO, 3).build().is_err());
        assert!(
            RetryPolicy::exponential(Duration::from_secs(4), Duration::from_secs(1), 3)
                .build()
                .is_err()
        );
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4), 5);
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}
