//! Downstream MCP client.
//!
//! # Responsibilities
//! - Run the MCP handshake over a freshly opened transport (rmcp)
//! - List tools, resources and prompts the downstream advertises
//! - Expose the `Connector` seam the connection manager retries through
//!
//! # Data Flow
//! ```text
//! Transport (stdio child | event stream | WebSocket)
//!     → rmcp serve: initialize → notifications/initialized
//!     → list_all_tools / list_all_resources / list_all_prompts
//!     → McpClient { server name, CapabilitySet, running session }
//! ```
//!
//! # Design Decisions
//! - The whole connect is bounded by one deadline per attempt
//! - A failed listing cancels the session before returning
//! - Only advertised capability kinds are listed
//! - rmcp answers server pings and owns request ids and pagination

pub mod capabilities;

use std::time::Duration;

use async_trait::async_trait;
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::IntoTransport;
use rmcp::{RoleClient, ServiceExt};
use serde::Serialize;
use thiserror::Error;

use crate::transport::{ChannelError, Transport};

pub use capabilities::{Capability, CapabilityFilter, CapabilitySet};

/// Why one connection attempt failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("downstream returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl From<ServiceError> for ConnectionError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::McpError(error) => ConnectionError::Rpc {
                code: i64::from(error.code.0),
                message: error.message.to_string(),
            },
            other => ConnectionError::Handshake(other.to_string()),
        }
    }
}

/// A connected, initialized downstream server.
#[async_trait]
pub trait DownstreamClient: Send {
    /// Name the server reported in `serverInfo`.
    fn server_name(&self) -> &str;

    /// Everything the server listed during the handshake.
    fn capabilities(&self) -> &CapabilitySet;

    /// End the session and release the transport.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Produces connected clients from transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        entry: &str,
        transport: &Transport,
        timeout: Duration,
    ) -> Result<Box<dyn DownstreamClient>, ConnectionError>;
}

/// Connector that opens real transports and speaks MCP over them.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnector;

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        entry: &str,
        transport: &Transport,
        timeout: Duration,
    ) -> Result<Box<dyn DownstreamClient>, ConnectionError> {
        let attempt = async {
            match transport {
                Transport::Stdio(t) => McpClient::initialize(t.spawn()?).await,
                Transport::Sse(t) => McpClient::initialize(t.connect().await?).await,
                Transport::WebSocket(t) => McpClient::initialize(t.connect().await?).await,
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(client)) => {
                tracing::debug!(
                    entry = %entry,
                    server = %client.server_name(),
                    capabilities = client.capabilities().len(),
                    "Downstream initialized"
                );
                Ok(Box::new(client))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }
}

/// Client half of an MCP session.
pub struct McpClient {
    session: Option<RunningService<RoleClient, ()>>,
    server_name: String,
    capabilities: CapabilitySet,
}

impl McpClient {
    /// Run the handshake over `transport` and list capabilities.
    pub async fn initialize<T, E, A>(transport: T) -> Result<Self, ConnectionError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let session = ()
            .serve(transport)
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        let server_name = session
            .peer_info()
            .map(|info| info.server_info.name.clone())
            .unwrap_or_else(|| "unknown".to_string());

        match list_capabilities(&session).await {
            Ok(capabilities) => Ok(Self {
                session: Some(session),
                server_name,
                capabilities,
            }),
            Err(e) => {
                if let Err(cancel_err) = session.cancel().await {
                    tracing::debug!(error = %cancel_err, "Failed to cancel session after listing error");
                }
                Err(e)
            }
        }
    }
}

async fn list_capabilities(session: &RunningService<RoleClient, ()>) -> Result<CapabilitySet, ConnectionError> {
    let (tools, resources, prompts) = match session.peer_info() {
        Some(info) => (
            info.capabilities.tools.is_some(),
            info.capabilities.resources.is_some(),
            info.capabilities.prompts.is_some(),
        ),
        None => (false, false, false),
    };

    let mut capabilities = CapabilitySet::default();
    if tools {
        capabilities.tools = listing(session.list_all_tools().await?, "name")?;
    }
    if resources {
        capabilities.resources = listing(session.list_all_resources().await?, "uri")?;
    }
    if prompts {
        capabilities.prompts = listing(session.list_all_prompts().await?, "name")?;
    }
    Ok(capabilities)
}

fn listing<T: Serialize>(items: Vec<T>, key: &str) -> Result<Vec<Capability>, ConnectionError> {
    items
        .into_iter()
        .map(|item| -> Result<Capability, ConnectionError> {
            let definition = serde_json::to_value(item).map_err(ChannelError::from)?;
            Ok(Capability::from_listing(definition, key))
        })
        .collect()
}

#[async_trait]
impl DownstreamClient for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if let Some(session) = self.session.take() {
            let reason = session.cancel().await?;
            tracing::debug!(server = %self.server_name, reason = ?reason, "Downstream session closed");
        }
        Ok(())
    }
}
