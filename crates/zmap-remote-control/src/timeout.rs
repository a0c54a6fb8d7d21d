//! Escalating request timeouts.
//!
//! A request is given the first timeout in the list. Each time it expires the
//! request is resent and the next, usually longer, timeout applies. When the
//! last timeout expires the request is abandoned.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Timeouts used when the application sets none, in milliseconds.
pub const DEFAULT_TIMEOUTS: &str = "333,1000,3000,9000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutListError {
    #[error("timeout list {0:?} contains no valid millisecond values")]
    NoValidValues(String),
}

/// Ordered list of per-attempt timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutList {
    durations: Vec<Duration>,
}

impl TimeoutList {
    /// Parses comma separated milliseconds, e.g. `"5,500,10000"`.
    ///
    /// Entries that are not whole non-negative numbers are skipped.
    pub fn parse(csv: &str) -> Result<Self, TimeoutListError> {
        let durations: Vec<Duration> = csv
            .split(',')
            .filter_map(|entry| entry.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .collect();

        if durations.is_empty() {
            return Err(TimeoutListError::NoValidValues(csv.to_string()));
        }
        Ok(Self { durations })
    }

    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

impl Default for TimeoutList {
    fn default() -> Self {
        Self {
            durations: [333, 1000, 3000, 9000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

impl fmt::Display for TimeoutList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.durations.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", d.as_millis())?;
        }
        Ok(())
    }
}

/// Result of checking the stopwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// Current timeout has not expired.
    Pending,
    /// Timeout expired and another attempt is allowed.
    Retry,
    /// Last timeout expired.
    Final,
}

/// Tracks the timeout cursor and stopwatch for the request in flight.
#[derive(Debug, Clone, Default)]
pub struct TimeoutController {
    list: TimeoutList,
    cursor: usize,
    started: Option<Instant>,
}

impl TimeoutController {
    pub fn new(list: TimeoutList) -> Self {
        Self {
            list,
            cursor: 0,
            started: None,
        }
    }

    /// Replaces the list and moves the cursor back to the first timeout.
    /// A running stopwatch restarts against the new first timeout.
    pub fn set_list(&mut self, list: TimeoutList) {
        let running = self.is_running();
        self.list = list;
        self.reset();
        if running {
            self.start();
        }
    }

    pub fn list(&self) -> &TimeoutList {
        &self.list
    }

    /// (Re)starts the stopwatch without moving the cursor.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stops the stopwatch and moves the cursor back to the first timeout.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.started = None;
    }

    /// Attempt number the next send should carry, starting at 1.
    pub fn attempt(&self) -> u32 {
        u32::try_from(self.cursor + 1).unwrap_or(u32::MAX)
    }

    /// Cursor position and the timeout that applies there.
    pub fn current(&self) -> (usize, Duration) {
        (self.cursor, self.list.durations[self.cursor])
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Checks the stopwatch against the current timeout.
    ///
    /// On [`TimeoutStatus::Retry`] the cursor has moved on and the stopwatch
    /// restarted. [`TimeoutStatus::Final`] leaves both alone; the caller
    /// resets once the request is discarded.
    pub fn has_timed_out(&mut self) -> TimeoutStatus {
        let Some(started) = self.started else {
            return TimeoutStatus::Pending;
        };
        let (cursor, limit) = self.current();
        if started.elapsed() <= limit {
            return TimeoutStatus::Pending;
        }
        if cursor + 1 >= self.list.len() {
            return TimeoutStatus::Final;
        }
        self.cursor += 1;
        self.start();
        TimeoutStatus::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_invalid_entries() {
        let list = TimeoutList::parse("5, x,500,,-3,10000").unwrap();
        assert_eq!(
            list.durations(),
            [
                Duration::from_millis(5),
                Duration::from_millis(500),
                Duration::from_millis(10000)
            ]
        );
        assert_eq!(list.to_string(), "5,500,10000");
    }

    #[test]
    fn parse_needs_one_value() {
        assert!(matches!(
            TimeoutList::parse("soon,later"),
            Err(TimeoutListError::NoValidValues(_))
        ));
        assert!(TimeoutList::parse("").is_err());
    }

    #[test]
    fn default_list() {
        assert_eq!(TimeoutList::default().to_string(), DEFAULT_TIMEOUTS);
        assert_eq!(TimeoutList::parse(DEFAULT_TIMEOUTS).unwrap(), TimeoutList::default());
    }

    #[test]
    fn not_started_never_times_out() {
        let mut timeouts = TimeoutController::new(TimeoutList::parse("0").unwrap());
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Pending);
        assert!(!timeouts.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn escalates_then_final() {
        let mut timeouts = TimeoutController::new(TimeoutList::parse("5,10,20").unwrap());
        timeouts.start();
        assert_eq!(timeouts.attempt(), 1);

        tokio::time::advance(Duration::from_millis(5)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Pending);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Retry);
        assert_eq!(timeouts.attempt(), 2);
        assert_eq!(timeouts.current(), (1, Duration::from_millis(10)));

        tokio::time::advance(Duration::from_millis(11)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Retry);
        assert_eq!(timeouts.attempt(), 3);

        tokio::time::advance(Duration::from_millis(15)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Pending);
        tokio::time::advance(Duration::from_millis(6)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Final);

        timeouts.reset();
        assert_eq!(timeouts.attempt(), 1);
        assert!(!timeouts.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn set_list_resets_cursor() {
        let mut timeouts = TimeoutController::default();
        timeouts.start();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Retry);

        timeouts.set_list(TimeoutList::parse("50").unwrap());
        assert_eq!(timeouts.current(), (0, Duration::from_millis(50)));
        assert!(timeouts.is_running());

        tokio::time::advance(Duration::from_millis(51)).await;
        assert_eq!(timeouts.has_timed_out(), TimeoutStatus::Final);
    }
}
