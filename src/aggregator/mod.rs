//! Aggregator endpoint subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionManager
//!     → AggregatorEndpoint::import (filter, rename under prefix)
//!     → catalog.rs (new Catalog snapshot, swapped in atomically)
//!     → handlers.rs (GET /health, /namespaces, /namespaces/{prefix}, /capabilities)
//! ```
//!
//! # Design Decisions
//! - One endpoint per topology; reload builds a fresh one
//! - Dispatching calls to imported capabilities stays with the client library

pub mod catalog;
pub mod endpoint;
pub mod handlers;

pub use catalog::{Catalog, ImportError, Namespace, NamespacedCapability};
pub use endpoint::{AggregatorEndpoint, AppState};
