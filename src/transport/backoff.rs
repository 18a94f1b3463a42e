use std::time::Duration;

/// Capped exponential delay between reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffController {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl BackoffController {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn mark_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Reset after a successful connect.
    pub fn mark_success(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next failure will return.
    pub fn current(&self) -> Duration {
        self.current
    }
}
