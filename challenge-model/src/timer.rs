use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Shared challenge timer. The displayed value is always derived from the last start instant, so
// two clients reading the same record agree without ticking a counter.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct Timer {
    pub current_value_seconds: u64,
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn display_value(&self, now: DateTime<Utc>) -> u64 {
        match (self.is_running, self.last_started_at) {
            (true, Some(started)) => {
                let elapsed = (now - started).num_seconds().max(0) as u64;
                self.current_value_seconds + elapsed
            }
            _ => self.current_value_seconds,
        }
    }

    /// Starting a running timer leaves it untouched.
    pub fn started(&self, now: DateTime<Utc>) -> Timer {
        if self.is_running {
            return self.clone();
        }
        Timer {
            current_value_seconds: self.current_value_seconds,
            is_running: true,
            last_started_at: Some(now),
        }
    }

    /// Folds the elapsed run into the stored value.
    pub fn stopped(&self, now: DateTime<Utc>) -> Timer {
        Timer {
            current_value_seconds: self.display_value(now),
            is_running: false,
            last_started_at: None,
        }
    }

    pub fn reset() -> Timer {
        Timer::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn running_timer_adds_elapsed_time() {
        let timer = Timer {
            current_value_seconds: 10,
            ..Timer::default()
        }
        .started(t0());
        assert_eq!(timer.display_value(t0() + Duration::seconds(5)), 15);
    }

    #[test]
    fn stopping_folds_elapsed_and_freezes() {
        let timer = Timer::default().started(t0());
        let stopped = timer.stopped(t0() + Duration::seconds(42));
        assert!(!stopped.is_running);
        assert_eq!(stopped.current_value_seconds, 42);
        assert_eq!(stopped.display_value(t0() + Duration::seconds(1000)), 42);
    }

    #[test]
    fn restarting_a_running_timer_keeps_original_start() {
        let timer = Timer::default().started(t0());
        let again = timer.started(t0() + Duration::seconds(30));
        assert_eq!(again.last_started_at, Some(t0()));
    }

    #[test]
    fn clock_skew_never_goes_negative() {
        let timer = Timer::default().started(t0());
        assert_eq!(timer.display_value(t0() - Duration::seconds(3)), 0);
    }
}
