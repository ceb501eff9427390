//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (controller.rs):
//!     Load config → Bind endpoint → Connect downstreams → Spawn serve loop
//!
//! Reload (controller.rs, topology.rs):
//!     ReloadRequest → Load + validate → Tear down current → Activate new
//!     (on activation failure: re-activate previous config)
//!
//! Shutdown (shutdown.rs, topology.rs):
//!     Stop requested → Abandon in-flight connects → Signal serve loop
//!     → Abort after grace → Close connections
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful stop
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listener, then downstreams
//! - Exactly one topology is active; reload replaces it wholesale
//! - Stop is idempotent and never propagates cleanup failures

pub mod controller;
pub mod shutdown;
pub mod signals;
pub mod topology;

use thiserror::Error;

use crate::config::ConfigError;

pub use controller::{interruptible, LifecycleController, LifecycleState, ReloadOutcome};
pub use shutdown::{Shutdown, ShutdownHandle};
pub use topology::{TeardownReport, Topology};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("already started")]
    AlreadyStarted,

    #[error("shutting down")]
    ShuttingDown,
}
