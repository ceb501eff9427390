//! Connection establishment for one topology.
//!
//! # Responsibilities
//! - Build a transport for every descriptor, in declaration order
//! - Connect with a bounded number of attempts per descriptor
//! - Import each connected client's capabilities under its prefix
//! - Close every retained connection on teardown
//! - Abandon remaining work as soon as shutdown is requested
//!
//! # Data Flow
//! ```text
//! ProxyTable (declaration order)
//!     → skip empty prefix
//!     → build_transport (failure: skip)
//!     → Connector::connect × up to `retry` attempts (exhausted: skip)
//!     → AggregatorEndpoint::import (failure: close client, skip)
//!     → Connection retained
//! ```
//!
//! # Design Decisions
//! - Sequential: one descriptor at a time, attempts never overlap
//! - Failures stay local to their descriptor and show up in the report
//! - Cancellation is checked before each descriptor and raced against
//!   every attempt and backoff sleep
//! - Closing is concurrent and collects every failure instead of stopping

use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{AggregatorEndpoint, ImportError};
use crate::client::{CapabilityFilter, Connector, DownstreamClient};
use crate::config::{ProxyDescriptor, ProxyTable};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::transport::{build_transport, ChannelError, Transport, TransportBuildError};

/// What happened to one descriptor during `connect_all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { attempts: u32, capabilities: usize },
    SkippedEmptyPrefix,
    SkippedBuild(TransportBuildError),
    Failed { attempts: u32 },
    ImportFailed(ImportError),
    /// Shutdown was requested while this descriptor was being connected.
    Cancelled { attempts: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    /// One entry per descriptor reached, in declaration order.
    pub outcomes: Vec<(String, ConnectOutcome)>,
    /// Shutdown cut the pass short.
    pub cancelled: bool,
}

impl ConnectReport {
    pub fn outcome(&self, entry: &str) -> Option<&ConnectOutcome> {
        self.outcomes.iter().find(|(name, _)| name == entry).map(|(_, o)| o)
    }

    pub fn connected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ConnectOutcome::Connected { .. }))
            .count()
    }
}

/// A connection that failed to close cleanly.
#[derive(Debug, Error)]
#[error("{entry}: close failed: {source}")]
pub struct ShutdownError {
    pub entry: String,
    #[source]
    pub source: ChannelError,
}

/// One live downstream in the active topology.
pub struct Connection {
    pub name: String,
    pub descriptor: ProxyDescriptor,
    pub transport: Transport,
    client: Box<dyn DownstreamClient>,
}

impl Connection {
    /// Prefix the catalog mounts this connection under.
    pub fn prefix(&self) -> &str {
        self.descriptor.prefix.trim()
    }

    pub fn server_name(&self) -> &str {
        self.client.server_name()
    }

    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.client.close().await
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connections: Vec<Connection>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Vec::new(),
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connect every descriptor and import it into `endpoint`, stopping
    /// early once `cancel` fires.
    pub async fn connect_all(
        &mut self,
        descriptors: &ProxyTable,
        endpoint: &AggregatorEndpoint,
        cancel: &CancellationToken,
    ) -> ConnectReport {
        let mut report = ConnectReport::default();

        if descriptors.is_empty() {
            tracing::info!("No downstream servers configured");
            return report;
        }

        for (entry, descriptor) in descriptors.iter() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let outcome = self.connect_entry(entry, descriptor, endpoint, cancel).await;
            report.cancelled = matches!(outcome, ConnectOutcome::Cancelled { .. });
            report.outcomes.push((entry.to_string(), outcome));
            if report.cancelled {
                break;
            }
        }

        if report.cancelled {
            tracing::info!(
                configured = descriptors.len(),
                reached = report.outcomes.len(),
                "Shutdown requested, abandoning remaining downstreams"
            );
            return report;
        }

        tracing::info!(
            configured = descriptors.len(),
            connected = report.connected(),
            "Downstream connections established"
        );
        report
    }

    async fn connect_entry(
        &mut self,
        entry: &str,
        descriptor: &ProxyDescriptor,
        endpoint: &AggregatorEndpoint,
        cancel: &CancellationToken,
    ) -> ConnectOutcome {
        let prefix = descriptor.prefix.trim();
        if prefix.is_empty() {
            tracing::warn!(entry = %entry, "Skipping downstream with empty prefix");
            return ConnectOutcome::SkippedEmptyPrefix;
        }

        let transport = match build_transport(entry, descriptor) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(entry = %entry, error = %e, "Failed to build transport, skipping");
                return ConnectOutcome::SkippedBuild(e);
            }
        };

        let policy = RetryPolicy::from_descriptor(descriptor);
        let connector = Arc::clone(&self.connector);
        let retry = connect_with_retry(connector.as_ref(), entry, prefix, &transport, &policy, cancel);
        let (mut client, attempts) = match retry.await {
            Ok(connected) => connected,
            Err(RetryExit::Cancelled(attempts)) => {
                tracing::info!(entry = %entry, attempts, "Connection abandoned for shutdown");
                return ConnectOutcome::Cancelled { attempts };
            }
            Err(RetryExit::Exhausted(attempts)) => {
                tracing::error!(
                    entry = %entry,
                    prefix = %prefix,
                    target = %transport.target(),
                    attempts,
                    "Giving up on downstream after exhausting retries"
                );
                return ConnectOutcome::Failed { attempts };
            }
        };

        let filter = CapabilityFilter::from_descriptor(descriptor);
        match endpoint.import(client.as_ref(), prefix, &filter) {
            Ok(capabilities) => {
                tracing::info!(
                    entry = %entry,
                    prefix = %prefix,
                    server = %client.server_name(),
                    transport = %transport,
                    capabilities,
                    "Downstream mounted"
                );
                self.connections.push(Connection {
                    name: entry.to_string(),
                    descriptor: descriptor.clone(),
                    transport,
                    client,
                });
                ConnectOutcome::Connected { attempts, capabilities }
            }
            Err(e) => {
                tracing::error!(entry = %entry, prefix = %prefix, error = %e, "Failed to import capabilities");
                if let Err(close_err) = client.close().await {
                    tracing::warn!(entry = %entry, error = %close_err, "Failed to close rejected client");
                }
                ConnectOutcome::ImportFailed(e)
            }
        }
    }

    /// Close every connection concurrently. Never stops early.
    pub async fn close_all(&mut self) -> Vec<ShutdownError> {
        let closing = self.connections.drain(..).map(|mut connection| async move {
            let result = connection.close().await;
            (connection.name, result)
        });

        let mut failures = Vec::new();
        for (entry, result) in join_all(closing).await {
            match result {
                Ok(()) => tracing::debug!(entry = %entry, "Downstream closed"),
                Err(source) => {
                    tracing::warn!(entry = %entry, error = %source, "Failed to close downstream");
                    failures.push(ShutdownError { entry, source });
                }
            }
        }
        failures
    }
}

enum RetryExit {
    /// Every attempt in the budget failed.
    Exhausted(u32),
    /// Shutdown arrived first; holds the attempts started.
    Cancelled(u32),
}

/// Returns the client and the attempt it succeeded on.
async fn connect_with_retry(
    connector: &dyn Connector,
    entry: &str,
    prefix: &str,
    transport: &Transport,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(Box<dyn DownstreamClient>, u32), RetryExit> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            result = connector.connect(entry, transport, policy.attempt_timeout) => result,
            _ = cancel.cancelled() => return Err(RetryExit::Cancelled(attempt)),
        };
        match result {
            Ok(client) => {
                metrics::record_connect_attempt(prefix, true);
                return Ok((client, attempt));
            }
            Err(e) => {
                metrics::record_connect_attempt(prefix, false);
                tracing::warn!(
                    entry = %entry,
                    prefix = %prefix,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Connection attempt failed"
                );
                match policy.delay_after(attempt) {
                    Some(delay) if !delay.is_zero() => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(RetryExit::Cancelled(attempt)),
                        }
                    }
                    Some(_) => {}
                    None => return Err(RetryExit::Exhausted(attempt)),
                }
            }
        }
    }
}
