//! Reconnect delay policy.
//!
//! `delay = base * 2^(failures - 1 + queue_len / queue_pressure_step)`, capped
//! at `max`, and never shorter than the previous delay until `reset()`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Every this many queued events doubles the delay once more
    pub queue_pressure_step: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(30),
            queue_pressure_step: 10,
        }
    }
}

/// Consecutive-failure state for one supervisor.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            last: Duration::ZERO,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Register a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self, queue_len: usize) -> Duration {
        self.failures = self.failures.saturating_add(1);

        let step = self.policy.queue_pressure_step.max(1);
        let pressure = u32::try_from(queue_len / step).unwrap_or(u32::MAX);
        let exponent = (self.failures - 1).saturating_add(pressure).min(31);
        let factor = 1u32 << exponent;

        let delay = self
            .policy
            .base
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        let delay = delay.max(self.last);
        self.last = delay;
        delay
    }

    /// Called after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last = Duration::ZERO;
    }
}
