use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Backoff multiplier (1.5 which is 50% increase per backoff).
const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Backoff randomization factor (0 means no randomization).
const DEFAULT_RANDOMIZATION: f64 = 0.0;
/// Initial interval in milliseconds.
const INITIAL_INTERVAL: u64 = 1000;

/// A retry interval generator that increases timeouts with exponential backoff.
///
/// The first failure waits for the initial interval of one second, every following attempt waits
/// 50% longer, up to the configured maximum. [`reset`](Self::reset) starts over after a success.
///
/// ```
/// use std::time::Duration;
/// use ferry_common::RetryBackoff;
///
/// let mut backoff = RetryBackoff::new(Duration::from_secs(2));
/// assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
/// assert_eq!(backoff.next_backoff(), Duration::from_millis(1500));
/// assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
/// assert_eq!(backoff.attempt(), 3);
/// ```
pub struct RetryBackoff {
    backoff: ExponentialBackoff,
    attempt: usize,
}

impl RetryBackoff {
    /// Creates a new retry backoff capped at `max_interval`.
    pub fn new(max_interval: Duration) -> Self {
        Self::with_initial(Duration::from_millis(INITIAL_INTERVAL), max_interval)
    }

    /// Creates a new retry backoff with a custom initial interval.
    pub fn with_initial(initial_interval: Duration, max_interval: Duration) -> Self {
        let initial_interval = initial_interval.min(max_interval);
        let backoff = ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: DEFAULT_RANDOMIZATION,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };

        RetryBackoff {
            backoff,
            attempt: 0,
        }
    }

    /// Resets this backoff to its initial state.
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.attempt = 0;
    }

    /// Indicates whether a backoff attempt has started.
    pub fn started(&self) -> bool {
        self.attempt > 0
    }

    /// Returns the number of the retry attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the next backoff duration.
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt += 1;
        self.backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval)
    }
}
