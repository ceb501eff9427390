//! Start, reload and stop for the whole aggregator.
//!
//! # Responsibilities
//! - Own the config store and the single active topology
//! - Replace the topology when the config file changes
//! - Converge every exit path (signal, stop request, serve failure) on `stop`
//!
//! # Design Decisions
//! - A new config is validated before the running topology is touched
//! - Failed activation falls back to the previous config
//! - Teardown on stop runs in its own task so a cancelled caller cannot
//!   interrupt it
//! - Topology state is only mutated through `&mut self` on the core
//! - The stop handle is the shutting-down flag: once requested, an
//!   in-flight start or reload abandons its connection attempts and the
//!   caller converges on `stop`

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::shutdown::ShutdownHandle;
use super::signals;
use super::topology::{EndpointExit, TeardownReport, Topology};
use super::LifecycleError;
use crate::client::Connector;
use crate::config::{Config, ConfigStore, ReloadRequest};
use crate::connection::ConnectReport;
use crate::observability::metrics;

/// Time the serve loop gets to finish in-flight requests.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    ReloadPending,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// New config active.
    Applied,
    /// New config invalid; the running topology was kept.
    Rejected,
    /// New config failed to activate; the previous one is active again.
    RolledBack,
    /// Neither config could be activated; no topology is running.
    Failed,
    /// Not running, or shutting down.
    Skipped,
}

impl ReloadOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReloadOutcome::Applied => "applied",
            ReloadOutcome::Rejected => "rejected",
            ReloadOutcome::RolledBack => "rolled_back",
            ReloadOutcome::Failed => "failed",
            ReloadOutcome::Skipped => "skipped",
        }
    }
}

pub struct LifecycleController {
    store: ConfigStore,
    connector: Arc<dyn Connector>,
    state: LifecycleState,
    topology: Option<Topology>,
    stopped: bool,
    stop_requests: ShutdownHandle,
    exits_tx: mpsc::UnboundedSender<EndpointExit>,
    exits_rx: mpsc::UnboundedReceiver<EndpointExit>,
    grace: Duration,
}

impl LifecycleController {
    /// Load the config. Any config error is fatal here.
    pub fn create(mut store: ConfigStore, connector: Arc<dyn Connector>) -> Result<Self, LifecycleError> {
        let config = store.get()?;
        tracing::info!(
            path = %store.path().display(),
            server = %config.server.name,
            downstreams = config.mcp_servers.len(),
            "Configuration loaded"
        );

        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Ok(Self {
            store,
            connector,
            state: LifecycleState::Stopped,
            topology: None,
            stopped: false,
            stop_requests: ShutdownHandle::new(),
            exits_tx,
            exits_rx,
            grace: DEFAULT_GRACE,
        })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_shutting_down(&self) -> bool {
        self.stop_requests.is_requested()
    }

    /// Handle other tasks can use to stop `run` or cut a start or reload short.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.stop_requests.clone()
    }

    /// Config the active topology was built from.
    pub fn config(&self) -> Option<Arc<Config>> {
        self.topology.as_ref().map(|t| Arc::clone(t.config()))
    }

    pub fn topology_id(&self) -> Option<Uuid> {
        self.topology.as_ref().map(Topology::id)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.topology.as_ref().map(Topology::local_addr)
    }

    /// Prefixes mounted on the active endpoint, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.topology
            .as_ref()
            .map(|t| t.endpoint().namespaces())
            .unwrap_or_default()
    }

    /// Bind, connect every downstream and start serving.
    ///
    /// Returns [`LifecycleError::ShuttingDown`] if a stop is requested
    /// before the topology is live; nothing is left running.
    pub async fn start(&mut self) -> Result<ConnectReport, LifecycleError> {
        if self.is_shutting_down() {
            return Err(LifecycleError::ShuttingDown);
        }
        if self.state != LifecycleState::Stopped {
            return Err(LifecycleError::AlreadyStarted);
        }

        self.state = LifecycleState::Starting;
        let config = match self.store.get() {
            Ok(config) => config,
            Err(e) => {
                self.state = LifecycleState::Stopped;
                return Err(e.into());
            }
        };

        match self.activate(config).await {
            Ok(report) => {
                self.state = LifecycleState::Running;
                Ok(report)
            }
            Err(e) => {
                self.state = LifecycleState::Stopped;
                Err(e)
            }
        }
    }

    async fn activate(&mut self, config: Arc<Config>) -> Result<ConnectReport, LifecycleError> {
        let (topology, report) = Topology::activate(
            config,
            Arc::clone(&self.connector),
            self.exits_tx.clone(),
            self.stop_requests.token(),
        )
        .await?;
        metrics::set_connected_downstreams(topology.connections().len());
        self.topology = Some(topology);
        Ok(report)
    }

    /// Re-read the config file and rebuild the topology from it.
    pub async fn reload(&mut self) -> ReloadOutcome {
        let outcome = self.reload_inner().await;
        if outcome != ReloadOutcome::Skipped {
            metrics::record_reload(outcome.as_str());
        }
        outcome
    }

    async fn reload_inner(&mut self) -> ReloadOutcome {
        if self.is_shutting_down() || self.state != LifecycleState::Running {
            tracing::debug!(state = ?self.state, "Reload skipped");
            return ReloadOutcome::Skipped;
        }

        self.state = LifecycleState::ReloadPending;
        let previous = self.store.last_good();

        let config = match self.store.load() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Rejected configuration change, keeping current topology");
                self.state = LifecycleState::Running;
                return ReloadOutcome::Rejected;
            }
        };

        tracing::info!(downstreams = config.mcp_servers.len(), "Configuration accepted, replacing topology");
        if let Some(current) = self.topology.take() {
            log_teardown(current.teardown(self.grace).await);
        }

        let outcome = match self.activate(config).await {
            Ok(report) => {
                tracing::info!(connected = report.connected(), "Reload applied");
                ReloadOutcome::Applied
            }
            Err(LifecycleError::ShuttingDown) => {
                tracing::info!("Reload abandoned for shutdown");
                self.state = LifecycleState::Stopping;
                return ReloadOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to activate new configuration");
                self.roll_back(previous).await
            }
        };

        if outcome == ReloadOutcome::Failed {
            metrics::set_connected_downstreams(0);
        }
        self.state = match outcome {
            ReloadOutcome::Skipped => LifecycleState::Stopping,
            _ => LifecycleState::Running,
        };
        outcome
    }

    async fn roll_back(&mut self, previous: Option<Arc<Config>>) -> ReloadOutcome {
        let Some(previous) = previous else {
            return ReloadOutcome::Failed;
        };
        self.store.restore(Arc::clone(&previous));

        match self.activate(previous).await {
            Ok(_) => {
                tracing::warn!("Previous configuration re-activated");
                ReloadOutcome::RolledBack
            }
            Err(LifecycleError::ShuttingDown) => ReloadOutcome::Skipped,
            Err(e) => {
                tracing::error!(error = %e, "Previous configuration failed too, waiting for the next change");
                ReloadOutcome::Failed
            }
        }
    }

    /// Tear down the active topology. Returns whether this call did it.
    pub async fn stop(&mut self) -> bool {
        self.stop_requests.request_stop();
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.state = LifecycleState::Stopping;
        tracing::info!("Stopping aggregator");

        let topology = self.topology.take();
        let grace = self.grace;
        let teardown = tokio::spawn(async move {
            if let Some(topology) = topology {
                log_teardown(topology.teardown(grace).await);
            }
        });
        if let Err(e) = teardown.await {
            tracing::error!(error = %e, "Teardown task failed");
        }

        metrics::set_connected_downstreams(0);
        self.state = LifecycleState::Stopped;
        tracing::info!("Aggregator stopped");
        true
    }

    /// Run until a termination signal, a stop request or a serve-loop
    /// failure, applying reload requests meanwhile. Always ends in `stop`.
    pub async fn run(&mut self, mut reloads: mpsc::UnboundedReceiver<ReloadRequest>) {
        let stop_requests = self.stop_requests.clone();
        let termination = signals::wait_for_termination();
        tokio::pin!(termination);
        let mut watching = true;

        loop {
            tokio::select! {
                signal = &mut termination => {
                    tracing::info!(signal, "Termination signal received");
                    break;
                }
                _ = stop_requests.requested() => {
                    tracing::info!("Stop requested");
                    break;
                }
                request = reloads.recv(), if watching => match request {
                    Some(request) => {
                        tracing::info!(path = %request.path.display(), "Configuration change detected");
                        let outcome = interruptible(self.reload(), &stop_requests).await;
                        tracing::info!(outcome = outcome.as_str(), "Reload finished");
                        if stop_requests.is_requested() {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("Reload channel closed");
                        watching = false;
                    }
                },
                Some(exit) = self.exits_rx.recv() => {
                    if Some(exit.topology) == self.topology_id() {
                        tracing::error!(
                            topology = %exit.topology,
                            error = ?exit.error,
                            "Aggregator endpoint exited unexpectedly"
                        );
                        break;
                    }
                    tracing::debug!(topology = %exit.topology, "Ignoring exit of retired topology");
                }
            }
        }

        self.stop().await;
    }
}

/// Drive `operation` to completion, turning a termination signal that
/// arrives meanwhile into a stop request the operation observes.
pub async fn interruptible<F: Future>(operation: F, stop: &ShutdownHandle) -> F::Output {
    tokio::pin!(operation);
    tokio::select! {
        output = &mut operation => output,
        signal = signals::wait_for_termination() => {
            tracing::info!(signal, "Termination signal received, cancelling in-flight work");
            stop.request_stop();
            operation.await
        }
    }
}

fn log_teardown(report: TeardownReport) {
    for failure in &report.failures {
        tracing::warn!(topology = %report.topology, error = %failure, "Teardown failure");
    }
}
