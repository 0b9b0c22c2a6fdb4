//! # Requeue Backoff
//!
//! Delays before retrying an extension whose last operation failed. The
//! actuator never retries on its own; the error policy keeps one
//! [`RequeueBackoff`] per extension and drops it again on success.
//!
//! Delays follow the Fibonacci sequence from a floor up to a ceiling. With a
//! 60s floor and a 600s ceiling: 60s, 60s, 120s, 180s, 300s, 480s, 600s, 600s, ...
//!
//! ```rust
//! use std::time::Duration;
//! use audit_extension::controller::backoff::RequeueBackoff;
//!
//! let mut backoff = RequeueBackoff::new(Duration::from_secs(60), Duration::from_secs(600));
//! assert_eq!(backoff.on_failure(), Duration::from_secs(60));
//! assert_eq!(backoff.on_failure(), Duration::from_secs(60));
//! assert_eq!(backoff.on_failure(), Duration::from_secs(120));
//! assert_eq!(backoff.failures(), 3);
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RequeueBackoff {
    ceiling: Duration,
    previous: Duration,
    next: Duration,
    failures: u32,
}

impl RequeueBackoff {
    /// A floor above the ceiling is clamped to the ceiling
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            ceiling,
            previous: Duration::ZERO,
            next: floor.min(ceiling),
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);

        let delay = self.next;
        self.next = (self.previous + self.next).min(self.ceiling);
        self.previous = delay;
        delay
    }

    /// Failures recorded since this backoff was created
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
