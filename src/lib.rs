//! MCP aggregator library: mounts many downstream MCP servers behind one
//! endpoint and rebuilds that topology whenever its config file changes.

// Core subsystems
pub mod aggregator;
pub mod client;
pub mod config;
pub mod connection;
pub mod transport;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use aggregator::AggregatorEndpoint;
pub use config::{Config, ConfigStore, FileWatcher};
pub use lifecycle::{LifecycleController, ReloadOutcome};
