//! Wall-clock access for the scheduler and the capture executor.
//!
//! Production code reads UTC time from [`SystemClock`]. Tests use
//! [`MockClock`], which derives wall-clock time from the tokio clock so that
//! `tokio::time::pause()` moves timers and `now()` forward together.

use chrono::{DateTime, Utc};

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock anchored to a fixed wall-clock start that advances with tokio time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl MockClock {
    /// Create a clock that reads `start` right now.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor.elapsed();
        self.start + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn mock_clock_follows_paused_tokio_time() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let clock = MockClock::new(start);
        assert_eq!(clock.now(), start);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(clock.now(), start + chrono::Duration::hours(1));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
