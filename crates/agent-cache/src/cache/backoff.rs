use std::time::Duration;

use rand::Rng;

/// Failures that are retried after [`RETRY_DELAY`] before exponential backoff starts.
const FAILURES_BEFORE_BACKOFF: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tracks consecutive fetch failures of one entry and derives the pause before the next fetch.
#[derive(Debug, Default)]
pub struct FailureBackoff {
    failures: u32,
}

impl FailureBackoff {
    /// Records a failed fetch.
    pub fn failed(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Records a successful fetch, resetting the backoff.
    pub fn succeeded(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The deterministic part of the pause, without the random stagger.
    pub fn base_delay(&self) -> Duration {
        match self.failures {
            0 => Duration::ZERO,
            n if n <= FAILURES_BEFORE_BACKOFF => RETRY_DELAY,
            n => {
                let exp = (n - FAILURES_BEFORE_BACKOFF).min(16);
                Duration::from_secs(1u64 << exp).min(MAX_BACKOFF)
            }
        }
    }

    /// The pause before the next fetch.
    ///
    /// Once exponential backoff is active, a random stagger of up to the base delay is added so
    /// that entries which failed together do not retry in lockstep.
    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay();
        if self.failures <= FAILURES_BEFORE_BACKOFF {
            return base;
        }
        let stagger_ms = rand::rng().random_range(0..=base.as_millis() as u64);
        base + Duration::from_millis(stagger_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = FailureBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::ZERO);

        let mut delays = vec![];
        for _ in 0..10 {
            backoff.failed();
            delays.push(backoff.base_delay().as_millis());
        }
        assert_eq!(
            delays,
            [100, 100, 100, 2000, 4000, 8000, 16000, 32000, 60000, 60000]
        );

        let delay = backoff.next_delay();
        assert!(delay >= MAX_BACKOFF && delay <= MAX_BACKOFF * 2);

        backoff.succeeded();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
