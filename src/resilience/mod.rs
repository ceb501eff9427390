//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection attempt to a downstream:
//!     → connector enforces the per-attempt deadline
//!     → On failure: retries.rs (attempt budget from `retry`)
//!     → backoff.rs (jittered delay before the next attempt, when configured)
//! ```
//!
//! # Design Decisions
//! - Every attempt has a deadline; timeouts count as failures
//! - A descriptor's budget is fixed for the whole connect pass
//! - Zero base delay means immediate re-attempt

pub mod backoff;
pub mod retries;

pub use retries::RetryPolicy;
