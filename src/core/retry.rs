//! Retry timing policies.
//!
//! Two schedules are used in this crate:
//!
//! - a **constant** interval for the publisher's Queue-Full retry loop
//!   (wait 1000 ms while servicing delivery reports, then retry), and
//! - an **exponential** schedule for MQTT reconnects:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! Either schedule can be unbounded (the default for Queue-Full, where the
//! caller is throttled to the broker's real throughput instead of dropping
//! data) or capped at a number of attempts, after which
//! [`Backoff::next_sleep`] returns [`RetryError::AttemptsExhausted`].

use std::time::Duration;

use thiserror::Error;

/// Error returned once a capped policy runs out of attempts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("Maximum number of attempts exceeded: {0}")]
    AttemptsExhausted(u32),
}

/// Description of a retry schedule. Cheap to copy; call [`RetryPolicy::backoff`]
/// to start a fresh stateful schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Same delay every time.
    pub fn constant(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts,
        }
    }

    pub fn exponential(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            multiplier: multiplier.max(1.0),
            max_attempts,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(*self)
    }
}

impl Default for RetryPolicy {
    /// Queue-Full policy: 1000 ms between attempts, no attempt limit.
    fn default() -> Self {
        Self::constant(Duration::from_millis(1000), None)
    }
}

/// Stateful walk through a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    current_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current_delay: policy.initial_delay,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt and advances the schedule.
    pub fn next_sleep(&mut self) -> Result<Duration, RetryError> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return Err(RetryError::AttemptsExhausted(max));
            }
        }
        self.attempt = self.attempt.saturating_add(1);

        let sleep = self.current_delay;
        let next = self.current_delay.as_secs_f64() * self.policy.multiplier;
        self.current_delay = Duration::from_secs_f64(next).min(self.policy.max_delay);

        Ok(sleep)
    }

    /// Back to the initial delay; call after a success.
    pub fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.attempt = 0;
    }

    /// Retries handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
