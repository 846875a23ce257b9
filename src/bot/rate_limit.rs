use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for a cooldown, swappable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Minimum interval between successful downstream calls of one handler.
///
/// The clock only advances on [`Cooldown::mark`], so requests that fail
/// downstream do not start a new window.
pub struct Cooldown {
    window: Duration,
    last: Mutex<Option<DateTime<Utc>>>,
    clock: Clock,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(Utc::now))
    }

    pub fn with_clock(window: Duration, clock: Clock) -> Self {
        Self {
            window,
            last: Mutex::new(None),
            clock,
        }
    }

    /// Time left before the next call is allowed, or `None` if it is allowed now
    pub fn remaining(&self) -> Option<Duration> {
        let last = *self.last.lock().unwrap_or_else(|e| e.into_inner());
        let last = last?;
        let elapsed = (self.clock)() - last;
        if elapsed < self.window {
            Some(self.window - elapsed)
        } else {
            None
        }
    }

    /// Time since the last successful call
    pub fn since_last(&self) -> Option<Duration> {
        let last = *self.last.lock().unwrap_or_else(|e| e.into_inner());
        last.map(|t| (self.clock)() - t)
    }

    /// Record a successful downstream call
    pub fn mark(&self) {
        let now = (self.clock)();
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Manually advanced clock shared between a test and a cooldown
    #[derive(Clone)]
    pub(crate) struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            let start = DateTime::parse_from_rfc3339("2020-02-11T19:35:55Z")
                .unwrap()
                .with_timezone(&Utc);
            Self(Arc::new(Mutex::new(start)))
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }

        pub(crate) fn clock(&self) -> Clock {
            let inner = self.0.clone();
            Arc::new(move || *inner.lock().unwrap())
        }
    }

    #[test]
    fn test_first_call_is_allowed() {
        let clock = ManualClock::new();
        let cooldown = Cooldown::with_clock(Duration::minutes(30), clock.clock());
        assert!(cooldown.remaining().is_none());
        assert!(cooldown.since_last().is_none());
    }

    #[test]
    fn test_blocks_inside_window() {
        let clock = ManualClock::new();
        let cooldown = Cooldown::with_clock(Duration::minutes(30), clock.clock());
        cooldown.mark();

        clock.advance(Duration::minutes(1));
        assert_eq!(cooldown.remaining(), Some(Duration::minutes(29)));
        assert_eq!(cooldown.since_last(), Some(Duration::minutes(1)));
    }

    #[test]
    fn test_allows_after_window() {
        let clock = ManualClock::new();
        let cooldown = Cooldown::with_clock(Duration::minutes(30), clock.clock());
        cooldown.mark();

        clock.advance(Duration::minutes(30));
        assert!(cooldown.remaining().is_none());
    }

    #[test]
    fn test_window_restarts_only_on_mark() {
        let clock = ManualClock::new();
        let cooldown = Cooldown::with_clock(Duration::minutes(30), clock.clock());
        cooldown.mark();

        clock.advance(Duration::minutes(31));
        assert!(cooldown.remaining().is_none());
        // no mark: a failed call leaves the window open
        clock.advance(Duration::minutes(1));
        assert!(cooldown.remaining().is_none());

        cooldown.mark();
        clock.advance(Duration::minutes(10));
        assert_eq!(cooldown.remaining(), Some(Duration::minutes(20)));
    }
}
