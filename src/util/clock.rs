//! Time sources shared by resolvers and in-memory backends.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time, truncated to milliseconds.
///
/// Stored dates carry millisecond precision, so instants compared against
/// stored values must not carry more.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same instant, so a test can hand one clone to the
/// broker and another to the resolvers and advance both at once.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// The "zero" instant used for unset timestamps (Unix epoch).
pub fn zero_time() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Whole seconds from `now` until `target`, clamped at zero.
pub fn seconds_to(target: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (target - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    // Round up so a message never becomes visible before its target.
    u64::try_from(millis).map_or(0, |ms| ms.div_ceil(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_to_rounds_up_and_clamps() {
        let now = zero_time() + Duration::seconds(100);
        assert_eq!(seconds_to(now + Duration::milliseconds(1500), now), 2);
        assert_eq!(seconds_to(now + Duration::seconds(10), now), 10);
        assert_eq!(seconds_to(now - Duration::seconds(10), now), 0);
        assert_eq!(seconds_to(now, now), 0);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(zero_time());
        let other = clock.clone();
        clock.advance(Duration::minutes(5));
        assert_eq!(other.now(), zero_time() + Duration::minutes(5));
    }
}
