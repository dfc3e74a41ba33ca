//! Retry policy shared by the reconnect loop and idempotent REST reads.
//!
//! A [`RetryState`] is fed one [`Failure`] at a time and answers with how long
//! to wait before the next attempt, or that the caller should give up.

use crate::client::utils::is_retryable_status;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// `None` keeps retrying until told otherwise.
    pub max_attempts: Option<u32>,
    pub first_delay: Duration,
    /// Added after every attempt until `delay_cap` is reached.
    pub delay_step: Duration,
    pub delay_cap: Duration,
    /// Prefer the server's `Retry-After` over our own delay.
    pub honor_retry_after: bool,
}

impl RetryConfig {
    /// Idempotent reads: a handful of attempts with a slowly growing delay.
    #[must_use]
    pub fn reads(max_attempts: u32, first_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            first_delay,
            delay_step: first_delay,
            delay_cap: first_delay * 3,
            honor_retry_after: true,
        }
    }

    /// Socket reconnects: one constant delay, optionally bounded.
    #[must_use]
    pub fn reconnect(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            first_delay: delay,
            delay_step: Duration::ZERO,
            delay_cap: delay,
            honor_retry_after: false,
        }
    }

    #[must_use]
    pub fn never() -> Self {
        Self::reconnect(Duration::ZERO, Some(0))
    }
}

/// What went wrong with the last attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Failure {
    /// The request never produced a response, or the socket closed.
    Network,
    /// The server answered with a non-success status.
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Wait(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    next_delay: Duration,
    config: RetryConfig,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            attempts: 0,
            next_delay: config.first_delay,
            config,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn after(&mut self, failure: Failure) -> RetryDecision {
        let hint = match failure {
            Failure::Network => None,
            Failure::Status { code, retry_after } => {
                if !is_retryable_status(code) {
                    return RetryDecision::GiveUp;
                }
                retry_after.filter(|_| self.config.honor_retry_after)
            }
        };

        self.attempts += 1;
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempts > max)
        {
            return RetryDecision::GiveUp;
        }

        let wait = hint.unwrap_or(self.next_delay);
        self.next_delay = (self.next_delay + self.config.delay_step).min(self.config.delay_cap);
        RetryDecision::Wait(wait)
    }

    /// Forget past failures after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = self.config.first_delay;
    }
}

/// `Retry-After` in its delta-seconds form; HTTP dates are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
