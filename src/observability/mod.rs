//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with key/value fields (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stderr log stream
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Each topology runs inside a span carrying its uuid, so every event of
//!   one reload cycle can be correlated
//! - `RUST_LOG` overrides the configured level
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
