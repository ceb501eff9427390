//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → shared via Arc with the lifecycle controller
//!
//! On file change:
//!     watcher.rs detects change on its own thread
//!     → ReloadRequest sent to the cooperative core
//!     → ConfigStore::load + validate
//!     → topology rebuilt from the new Arc<Config>
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - A rejected file never replaces the last good config
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{ConfigError, ConfigStore};
pub use schema::{Config, ObservabilityConfig, ProxyDescriptor, ProxyTable, ServerDescriptor, TransportKind};
pub use watcher::{FileWatcher, ReloadRequest};
