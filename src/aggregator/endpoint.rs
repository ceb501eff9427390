//! The unified endpoint downstream capabilities are grafted onto.
//!
//! # Responsibilities
//! - Hold the namespaced catalog for one topology
//! - Import a connected client's capabilities under its prefix
//! - Bind the listener and serve the HTTP surface until told to stop
//!
//! # Design Decisions
//! - The catalog is published through `ArcSwap`; handlers read a snapshot
//!   while the core imports
//! - Imports are all-or-nothing: a failed import stores nothing

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use super::catalog::{Catalog, ImportError};
use super::handlers;
use crate::client::{CapabilityFilter, DownstreamClient};
use crate::config::ServerDescriptor;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub descriptor: Arc<ServerDescriptor>,
    pub catalog: Arc<ArcSwap<Catalog>>,
}

pub struct AggregatorEndpoint {
    state: AppState,
}

impl AggregatorEndpoint {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            state: AppState {
                descriptor: Arc::new(descriptor),
                catalog: Arc::new(ArcSwap::from_pointee(Catalog::new())),
            },
        }
    }

    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.state.descriptor
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.state.catalog.load_full()
    }

    /// Imported prefixes, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.state.catalog.load().prefixes().map(String::from).collect()
    }

    /// Import `client`'s capabilities under `prefix`, after filtering.
    /// Returns how many capabilities were imported.
    pub fn import(
        &self,
        client: &dyn DownstreamClient,
        prefix: &str,
        filter: &CapabilityFilter,
    ) -> Result<usize, ImportError> {
        let capabilities = client.capabilities().filtered(filter);
        let next = self
            .state
            .catalog
            .load()
            .with_namespace(prefix, client.server_name(), &capabilities)?;
        self.state.catalog.store(Arc::new(next));

        tracing::debug!(
            prefix = %prefix,
            server = %client.server_name(),
            imported = capabilities.len(),
            filtered_out = client.capabilities().len() - capabilities.len(),
            "Capabilities imported"
        );
        Ok(capabilities.len())
    }

    /// Bind the listener at the descriptor's host and port.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let descriptor = &self.state.descriptor;
        TcpListener::bind((descriptor.host.as_str(), descriptor.port)).await
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/namespaces", get(handlers::list_namespaces))
            .route("/namespaces/{prefix}", get(handlers::get_namespace))
            .route("/capabilities", get(handlers::list_capabilities))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires or the sender is dropped.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            server = %self.state.descriptor.name,
            "Aggregator endpoint serving"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(address = %addr, "Aggregator endpoint stopped");
        Ok(())
    }
}
