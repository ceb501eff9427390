//! Retry budget for downstream connection attempts.
//!
//! # Responsibilities
//! - Carry the attempt budget and per-attempt deadline of one descriptor
//! - Produce the delay to wait after a failed attempt
//!
//! # Design Decisions
//! - Budget comes from `retry`, which validation keeps at one or more
//! - No retry after the last attempt, so no delay is produced for it

use std::time::Duration;

use crate::config::ProxyDescriptor;

use super::backoff::calculate_backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_descriptor(descriptor: &ProxyDescriptor) -> Self {
        Self {
            max_attempts: descriptor.retry.max(1),
            attempt_timeout: Duration::from_secs(descriptor.timeout_secs),
            base_delay_ms: descriptor.retry_backoff_ms,
            max_delay_ms: descriptor.retry_backoff_max_ms,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), or
    /// `None` when the budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms))
    }
}
