//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use mcp_aggregator::client::{Capability, CapabilitySet, ConnectionError, Connector, DownstreamClient};
use mcp_aggregator::transport::{ChannelError, Transport};

/// How a scripted downstream answers connection attempts.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Succeed,
    FailTimes(u32),
    AlwaysFail,
    /// Succeed after hanging for the given time.
    Slow(Duration),
}

/// Connector whose per-entry results are fixed in advance.
#[derive(Default)]
pub struct ScriptedConnector {
    behaviours: HashMap<String, Behaviour>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entry: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(entry.to_string(), behaviour);
        self
    }

    pub fn attempts(&self, entry: &str) -> u32 {
        self.attempts.lock().unwrap().get(entry).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        entry: &str,
        _transport: &Transport,
        _timeout: Duration,
    ) -> Result<Box<dyn DownstreamClient>, ConnectionError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(entry.to_string()).or_default();
            *count += 1;
            *count
        };

        let fail = match self.behaviours.get(entry).copied().unwrap_or(Behaviour::Succeed) {
            Behaviour::Succeed => false,
            Behaviour::FailTimes(n) => attempt <= n,
            Behaviour::AlwaysFail => true,
            Behaviour::Slow(latency) => {
                tokio::time::sleep(latency).await;
                false
            }
        };
        if fail {
            return Err(ConnectionError::Handshake(format!("{} refused attempt {}", entry, attempt)));
        }

        Ok(Box::new(StaticClient {
            name: entry.to_string(),
            capabilities: CapabilitySet {
                tools: vec![Capability::named("echo")],
                ..Default::default()
            },
        }))
    }
}

/// Client with a fixed capability set and no channel behind it.
pub struct StaticClient {
    pub name: String,
    pub capabilities: CapabilitySet,
}

#[async_trait]
impl DownstreamClient for StaticClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// A websocket downstream entry pointing at `url`.
pub fn ws_entry(entry: &str, url: &str, retry: u32) -> String {
    format!(
        r#"
[mcpServers.{entry}]
type = "websocket"
url = "{url}"
prefix = "{entry}"
retry = {retry}
timeout_secs = 2
"#
    )
}

/// Config text for a server on `port` with the given downstream blocks.
pub fn config_toml(port: u16, entries: &[String]) -> String {
    let mut text = format!(
        r#"
[server]
name = "test-aggregator"
port = {port}
"#
    );
    for entry in entries {
        text.push_str(entry);
    }
    text
}

pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("mcp_config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Swap the config in with a rename so watchers see one complete change.
pub fn replace_config(dir: &Path, content: &str) -> PathBuf {
    let staged = dir.join("mcp_config.toml.staged");
    std::fs::write(&staged, content).unwrap();
    let path = dir.join("mcp_config.toml");
    std::fs::rename(&staged, &path).unwrap();
    path
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

pub async fn get_json(addr: SocketAddr, path: &str) -> (u16, Value) {
    let res = http_client()
        .get(format!("http://{}{}", addr, path))
        .send()
        .await
        .expect("aggregator unreachable");
    let status = res.status().as_u16();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct MockServer {
    pub addr: SocketAddr,
    sessions: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Websocket sessions accepted so far.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

/// Start a websocket MCP server advertising `tools`.
pub async fn start_mock_mcp_server(name: &'static str, tools: Vec<&'static str>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sessions = Arc::new(AtomicUsize::new(0));

    let counter = sessions.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tools = tools.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let select_mcp = |_: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mcp"));
                    Ok(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(socket, select_mcp).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else { continue };
                    let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                    let Some(id) = request.get("id").cloned() else { continue };

                    let result = match request["method"].as_str() {
                        Some("initialize") => json!({
                            "protocolVersion": request["params"]["protocolVersion"],
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": name, "version": "1.0.0"},
                        }),
                        Some("tools/list") => json!({
                            "tools": tools.iter().map(|t| json!({"name": t, "inputSchema": {}})).collect::<Vec<_>>()
                        }),
                        _ => json!({}),
                    };
                    let response = json!({"jsonrpc": "2.0", "id": id, "result": result});
                    if ws.send(Message::Text(response.to_string().into())).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    MockServer { addr, sessions }
}
