use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use brewery_core::{PipelineError, RetrySettings};
use brewery_logging::brew_warn;

use crate::signals::{Checkpoint, RunSignals};

/// Classifies failures by [`brewery_core::ErrorKind`] and paces retries with
/// capped exponential backoff plus uniform jitter.
///
/// One policy is shared by every worker of a run, so the retry counter covers
/// the whole job.
#[derive(Debug)]
pub struct RetryPolicy {
    settings: RetrySettings,
    retries: AtomicU64,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            retries: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// `attempt` is the number of attempts already made (1 after the first
    /// failure).
    pub fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        error.kind().is_retryable() && attempt < self.settings.max_attempts
    }

    /// Deterministic part of the delay: `min(cap, base * 2^(attempt-1))`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay_ms = self
            .settings
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.settings.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Backoff plus `uniform(0, jitter)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = match self.settings.jitter_ms {
            0 => 0,
            max => fastrand::u64(0..=max),
        };
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }

    /// Total retries scheduled by this policy so far.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Waits out the delay before attempt `attempt + 1` and counts the retry.
    ///
    /// A rate-limit hint from the dependency stretches the delay, but never
    /// beyond the configured cap plus jitter.
    pub fn wait_before_retry(
        &self,
        signals: &RunSignals,
        error: &PipelineError,
        attempt: u32,
    ) -> Checkpoint {
        let mut delay = self.delay_for(attempt);
        if let Some(hint_ms) = error.retry_after_ms() {
            let hint = Duration::from_millis(hint_ms.min(self.settings.max_delay_ms));
            delay = delay.max(hint);
        }
        if signals.sleep(delay) == Checkpoint::Cancelled {
            return Checkpoint::Cancelled;
        }
        self.retries.fetch_add(1, Ordering::Relaxed);
        Checkpoint::Proceed
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts, or the run is cancelled while waiting to retry.
    ///
    /// Returns the final result and the number of attempts made.
    pub fn run<T, F>(&self, signals: &RunSignals, mut op: F) -> (Result<T, PipelineError>, u32)
    where
        F: FnMut(u32) -> Result<T, PipelineError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op(attempt) {
                Ok(value) => return (Ok(value), attempt),
                Err(error) => error,
            };
            if !self.should_retry(&error, attempt) {
                return (Err(error), attempt);
            }
            brew_warn!(
                "attempt {}/{} failed ({}), retrying",
                attempt,
                self.settings.max_attempts,
                error
            );
            if self.wait_before_retry(signals, &error, attempt) == Checkpoint::Cancelled {
                return (Err(PipelineError::Cancelled), attempt);
            }
        }
    }
}
