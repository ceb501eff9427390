//! One generation of the aggregator: endpoint, connections and tasks.
//!
//! # Responsibilities
//! - Activate a config: bind, connect downstreams, spawn the serve loop
//! - Tear everything down again, reporting but never stopping on failures
//!
//! # Design Decisions
//! - Every topology gets a uuid; its work runs inside a span carrying it
//! - The listener is bound before any downstream is contacted
//! - The serve loop reports its own exit so the controller can react
//! - A shutdown request during activation closes whatever was connected
//!   and never starts serving

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::shutdown::Shutdown;
use super::LifecycleError;
use crate::aggregator::AggregatorEndpoint;
use crate::client::Connector;
use crate::config::Config;
use crate::connection::{ConnectReport, ConnectionManager, ShutdownError};

/// Sent by a serve loop when it returns.
#[derive(Debug)]
pub struct EndpointExit {
    pub topology: Uuid,
    pub error: Option<std::io::Error>,
}

#[derive(Debug)]
pub struct TeardownReport {
    pub topology: Uuid,
    /// Tasks that missed the grace period and were aborted.
    pub aborted_tasks: usize,
    pub failures: Vec<ShutdownError>,
}

pub struct Topology {
    id: Uuid,
    config: Arc<Config>,
    endpoint: Arc<AggregatorEndpoint>,
    connections: ConnectionManager,
    local_addr: SocketAddr,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    span: tracing::Span,
}

impl Topology {
    /// Bind the endpoint, connect every downstream and start serving.
    ///
    /// Fails with [`LifecycleError::ShuttingDown`] when `cancel` fires
    /// before the topology is live.
    pub async fn activate(
        config: Arc<Config>,
        connector: Arc<dyn Connector>,
        exits: mpsc::UnboundedSender<EndpointExit>,
        cancel: &CancellationToken,
    ) -> Result<(Self, ConnectReport), LifecycleError> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("topology", id = %id);

        let endpoint = Arc::new(AggregatorEndpoint::new(config.server.clone()));
        let listener = endpoint.bind().await.map_err(|source| LifecycleError::Bind {
            addr: format!("{}:{}", config.server.host, config.server.port),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| LifecycleError::Bind {
            addr: format!("{}:{}", config.server.host, config.server.port),
            source,
        })?;

        let mut connections = ConnectionManager::new(connector);
        let report = connections
            .connect_all(&config.mcp_servers, &endpoint, cancel)
            .instrument(span.clone())
            .await;

        if report.cancelled || cancel.is_cancelled() {
            let failures = connections.close_all().instrument(span.clone()).await;
            span.in_scope(|| {
                tracing::info!(
                    closed = report.connected(),
                    close_failures = failures.len(),
                    "Activation abandoned for shutdown"
                )
            });
            return Err(LifecycleError::ShuttingDown);
        }

        let shutdown = Shutdown::new();
        let stop = shutdown.subscribe();
        let serving = Arc::clone(&endpoint);
        let task = tokio::spawn(
            async move {
                let error = serving.serve(listener, stop).await.err();
                if let Some(e) = &error {
                    tracing::error!(error = %e, "Serve loop failed");
                }
                let _ = exits.send(EndpointExit { topology: id, error });
            }
            .instrument(span.clone()),
        );

        span.in_scope(|| {
            tracing::info!(
                address = %local_addr,
                namespaces = endpoint.catalog().len(),
                "Topology active"
            )
        });

        Ok((
            Self {
                id,
                config,
                endpoint,
                connections,
                local_addr,
                shutdown,
                tasks: vec![task],
                span,
            },
            report,
        ))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn endpoint(&self) -> &Arc<AggregatorEndpoint> {
        &self.endpoint
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the serve loop (aborting it after `grace`), then close every
    /// connection concurrently.
    pub async fn teardown(mut self, grace: Duration) -> TeardownReport {
        let span = self.span.clone();
        async move {
            let listening = self.shutdown.trigger();
            tracing::debug!(listening, "Shutdown signalled to serve loop");

            let mut aborted_tasks = 0;
            for mut task in self.tasks.drain(..) {
                if tokio::time::timeout(grace, &mut task).await.is_err() {
                    tracing::warn!(grace = ?grace, "Task missed the grace period, aborting");
                    task.abort();
                    let _ = task.await;
                    aborted_tasks += 1;
                }
            }

            let failures = self.connections.close_all().await;
            tracing::info!(
                aborted_tasks,
                close_failures = failures.len(),
                "Topology torn down"
            );

            TeardownReport {
                topology: self.id,
                aborted_tasks,
                failures,
            }
        }
        .instrument(span)
        .await
    }
}
