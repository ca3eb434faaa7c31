use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Wall-clock source used to timestamp categorizations and evaluate wakes
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Move the clock by `ms` (negative moves it back). Returns the new time,
    /// or `None` without moving if the result is out of range.
    pub fn advance(&self, ms: i64) -> Option<DateTime<Utc>> {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        let moved =
            Duration::try_milliseconds(ms).and_then(|delta| now.checked_add_signed(delta))?;
        *now = moved;
        Some(moved)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let handle = clock.clone();

        handle.advance(200);
        assert_eq!(clock.now(), start + Duration::milliseconds(200));

        clock.set(start);
        assert_eq!(handle.now(), start);
    }

    #[test]
    fn test_advance_out_of_range_leaves_clock_unchanged() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        assert_eq!(clock.advance(i64::MAX), None);
        assert_eq!(clock.advance(i64::MIN), None);
        assert_eq!(clock.now(), start);

        assert_eq!(clock.advance(-1_000), Some(start - Duration::seconds(1)));
    }
}
