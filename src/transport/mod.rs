//! Downstream transports.
//!
//! # Data Flow
//! ```text
//! ProxyDescriptor
//!     → build_transport (pure, per kind)
//!     → Transport (Stdio | Sse | WebSocket)
//!     → StdioTransport::spawn      → rmcp TokioChildProcess
//!       SseTransport::connect      → (MessageSink, MessageStream)
//!       WebSocketTransport::connect → (MessageSink, MessageStream)
//! ```
//!
//! # Design Decisions
//! - Closed enum over transport kinds, matched exhaustively
//! - Missing per-kind fields are build errors, never defaulted
//! - Framing is delegated: rmcp owns stdio framing, eventsource-stream parses
//!   the event stream, tokio-tungstenite carries WebSocket frames

pub mod sse;
pub mod stdio;
pub mod websocket;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::pin::Pin;

use futures_util::stream::BoxStream;
use futures_util::Sink;
use reqwest::header::{HeaderName, HeaderValue};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyDescriptor, TransportKind};

pub use sse::SseTransport;
pub use stdio::{Launcher, StdioTransport};
pub use websocket::WebSocketTransport;

/// Outgoing half of a network session: client messages in, one per frame or POST.
pub type MessageSink = Pin<Box<dyn Sink<ClientJsonRpcMessage, Error = ChannelError> + Send>>;

/// Incoming half of a network session. Ends when the downstream goes away.
pub type MessageStream = BoxStream<'static, ServerJsonRpcMessage>;

/// Errors raised by an open downstream session.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("downstream closed the channel")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::WebSocket(Box::new(e))
    }
}

/// Errors raised while turning a descriptor into a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportBuildError {
    #[error("{entry}: type '{kind}' requires field '{field}'")]
    MissingField {
        entry: String,
        kind: TransportKind,
        field: &'static str,
    },

    #[error("{entry}: unsupported script type '{path}' (expected .py or .js)")]
    UnsupportedScript { entry: String, path: String },

    #[error("{entry}: invalid url '{url}': {reason}")]
    InvalidUrl {
        entry: String,
        url: String,
        reason: String,
    },

    #[error("{entry}: invalid header '{name}'")]
    InvalidHeader { entry: String, name: String },
}

/// A concrete transport built for one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Child process speaking over stdin/stdout (process, uvx, npx).
    Stdio(StdioTransport),
    /// HTTP event stream (http, https).
    Sse(SseTransport),
    /// WebSocket (websocket).
    WebSocket(WebSocketTransport),
}

impl Transport {
    /// URL for network transports, command line for processes.
    pub fn target(&self) -> String {
        match self {
            Transport::Stdio(t) => t.command_line(),
            Transport::Sse(t) => t.url.clone(),
            Transport::WebSocket(t) => t.url.clone(),
        }
    }

    /// Custom headers, when the transport carries any.
    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Transport::Sse(t) => Some(&t.headers),
            Transport::Stdio(_) | Transport::WebSocket(_) => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Transport::Stdio(t) => t.launcher.as_str(),
            Transport::Sse(_) => "sse",
            Transport::WebSocket(_) => "websocket",
        };
        write!(f, "{} {}", kind, self.target())
    }
}

/// Build the transport a descriptor asks for.
pub fn build_transport(entry: &str, descriptor: &ProxyDescriptor) -> Result<Transport, TransportBuildError> {
    match descriptor.kind {
        TransportKind::Process => process_transport(entry, descriptor).map(Transport::Stdio),
        TransportKind::Http | TransportKind::Https => sse_transport(entry, descriptor).map(Transport::Sse),
        TransportKind::Websocket => {
            let url = checked_url(entry, descriptor)?;
            Ok(Transport::WebSocket(WebSocketTransport { url }))
        }
        TransportKind::Uvx => uvx_transport(entry, descriptor).map(Transport::Stdio),
        TransportKind::Npx => npx_transport(entry, descriptor).map(Transport::Stdio),
    }
}

fn required<'a>(
    entry: &str,
    kind: TransportKind,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, TransportBuildError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TransportBuildError::MissingField {
            entry: entry.to_string(),
            kind,
            field,
        }),
    }
}

fn process_transport(entry: &str, d: &ProxyDescriptor) -> Result<StdioTransport, TransportBuildError> {
    let command = required(entry, d.kind, "command", d.command.as_deref())?;
    let script = required(entry, d.kind, "script_path", d.script_path.as_deref())?;

    let launcher = match Path::new(script).extension().and_then(|e| e.to_str()) {
        Some("py") => Launcher::Python,
        Some("js") => Launcher::Node,
        _ => {
            return Err(TransportBuildError::UnsupportedScript {
                entry: entry.to_string(),
                path: script.to_string(),
            })
        }
    };

    let mut args = vec![script.to_string()];
    args.extend(d.args.iter().cloned());

    Ok(StdioTransport {
        launcher,
        program: command.to_string(),
        args,
        env: d.env.clone(),
        cwd: d.cwd.clone(),
    })
}

fn uvx_transport(entry: &str, d: &ProxyDescriptor) -> Result<StdioTransport, TransportBuildError> {
    let tool = required(entry, d.kind, "tool_name", d.tool_name.as_deref())?;

    let mut args = Vec::new();
    if let Some(from) = d.from_package.as_deref().filter(|p| !p.trim().is_empty()) {
        args.extend(["--from".to_string(), from.to_string()]);
    }
    for package in &d.with_packages {
        args.extend(["--with".to_string(), package.clone()]);
    }
    if let Some(version) = d.python_version.as_deref().filter(|v| !v.trim().is_empty()) {
        args.extend(["--python".to_string(), version.to_string()]);
    }
    args.push(tool.to_string());
    args.extend(d.args.iter().cloned());

    Ok(StdioTransport {
        launcher: Launcher::Uvx,
        program: "uvx".to_string(),
        args,
        env: d.env.clone(),
        cwd: d.project_directory.clone().or_else(|| d.cwd.clone()),
    })
}

fn npx_transport(entry: &str, d: &ProxyDescriptor) -> Result<StdioTransport, TransportBuildError> {
    let package = required(entry, d.kind, "package", d.package.as_deref())?;

    let mut args = Vec::new();
    if !d.use_package_lock {
        args.push("--no-package-lock".to_string());
    }
    args.extend(["-y".to_string(), package.to_string()]);
    args.extend(d.args.iter().cloned());

    Ok(StdioTransport {
        launcher: Launcher::Npx,
        program: "npx".to_string(),
        args,
        env: d.env.clone(),
        cwd: d.project_directory.clone().or_else(|| d.cwd.clone()),
    })
}

fn sse_transport(entry: &str, d: &ProxyDescriptor) -> Result<SseTransport, TransportBuildError> {
    let url = checked_url(entry, d)?;
    for (name, value) in &d.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            return Err(TransportBuildError::InvalidHeader {
                entry: entry.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(SseTransport {
        url,
        headers: d.headers.clone(),
    })
}

fn checked_url(entry: &str, d: &ProxyDescriptor) -> Result<String, TransportBuildError> {
    let url = required(entry, d.kind, "url", d.url.as_deref())?;
    Url::parse(url).map_err(|e| TransportBuildError::InvalidUrl {
        entry: entry.to_string(),
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(url.to_string())
}
