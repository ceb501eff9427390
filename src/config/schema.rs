//! Configuration schema definitions.
//!
//! This module defines the complete topology description for the aggregator.
//! All types derive Serde traits for deserialization from the TOML file;
//! semantic checks live in [`crate::config::validation`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Root configuration: the aggregator endpoint plus its downstream servers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Unified endpoint settings.
    pub server: ServerDescriptor,

    /// Downstream servers keyed by entry name, in declaration order.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: ProxyTable,

    /// Logging and metrics settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Aggregator endpoint identity and bind address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerDescriptor {
    /// Name advertised by the unified endpoint.
    pub name: String,

    /// Bind host (default "127.0.0.1").
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (default 8000). Port 0 binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Version advertised by the unified endpoint.
    #[serde(default = "default_version")]
    pub version: String,
}

impl ServerDescriptor {
    /// Descriptor with the given name and every other field defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: default_port(),
            version: default_version(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Transport kinds a downstream descriptor may declare.
///
/// Closed set: anything else is rejected while the file is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local script speaking the protocol over stdin/stdout.
    Process,
    /// HTTP event stream.
    Http,
    /// HTTP event stream over TLS.
    Https,
    /// WebSocket.
    Websocket,
    /// Python tool package run through `uvx`.
    Uvx,
    /// Node package run through `npx`.
    Npx,
}

impl TransportKind {
    /// Whether the kind connects to a URL rather than spawning a process.
    pub fn is_network(self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Websocket)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Http => "http",
            Self::Https => "https",
            Self::Websocket => "websocket",
            Self::Uvx => "uvx",
            Self::Npx => "npx",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downstream server entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyDescriptor {
    /// Transport kind.
    #[serde(rename = "type")]
    pub kind: TransportKind,

    /// Namespace prefix for the imported capabilities.
    pub prefix: String,

    /// Target URL (http, https, websocket).
    pub url: Option<String>,

    /// Interpreter command (process).
    pub command: Option<String>,

    /// Script run by the interpreter (process).
    pub script_path: Option<String>,

    /// Extra arguments passed after the script, tool or package.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for spawned processes.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for spawned processes.
    pub cwd: Option<PathBuf>,

    /// Tool to run (uvx).
    pub tool_name: Option<String>,

    /// Package providing the tool (uvx).
    pub from_package: Option<String>,

    /// Additional packages installed alongside the tool (uvx).
    #[serde(default)]
    pub with_packages: Vec<String>,

    /// Python version requested from uvx.
    pub python_version: Option<String>,

    /// Package to run (npx).
    pub package: Option<String>,

    /// Honour the package lock file (npx).
    #[serde(default = "default_true")]
    pub use_package_lock: bool,

    /// Working directory for uvx/npx; falls back to `cwd`.
    pub project_directory: Option<PathBuf>,

    /// Connection attempts before the entry is skipped (default: 1).
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Base delay between attempts in milliseconds (0 = immediate).
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Upper bound for the delay between attempts in milliseconds.
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Deadline for one connect + handshake attempt in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Opaque headers sent to network downstreams.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Capability names never imported.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// When present, only these capability names are imported.
    #[serde(rename = "whiteLists")]
    pub white_lists: Option<Vec<String>>,
}

impl ProxyDescriptor {
    /// Descriptor of the given kind with every optional field defaulted.
    pub fn new(kind: TransportKind, prefix: impl Into<String>) -> Self {
        Self {
            kind,
            prefix: prefix.into(),
            url: None,
            command: None,
            script_path: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            tool_name: None,
            from_package: None,
            with_packages: Vec::new(),
            python_version: None,
            package: None,
            use_package_lock: true,
            project_directory: None,
            retry: default_retry(),
            retry_backoff_ms: 0,
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
            exclude: Vec::new(),
            white_lists: None,
        }
    }

    /// Shorthand for a URL-based descriptor.
    pub fn network(kind: TransportKind, prefix: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(kind, prefix)
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retry() -> u32 {
    1
}

fn default_retry_backoff_max_ms() -> u64 {
    10_000
}

fn default_timeout_secs() -> u64 {
    30
}

/// Downstream entries in the order they appear in the file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyTable {
    entries: Vec<(String, ProxyDescriptor)>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entry names are not checked for uniqueness here;
    /// the TOML parser already rejects duplicate keys.
    pub fn push(&mut self, name: impl Into<String>, descriptor: ProxyDescriptor) {
        self.entries.push((name.into(), descriptor));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProxyDescriptor)> {
        self.entries.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub fn get(&self, name: &str) -> Option<&ProxyDescriptor> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ProxyDescriptor)> for ProxyTable {
    fn from_iter<T: IntoIterator<Item = (String, ProxyDescriptor)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for ProxyTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ProxyTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of downstream server entries")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, descriptor)) = map.next_entry::<String, ProxyDescriptor>()? {
                    entries.push((name, descriptor));
                }
                Ok(ProxyTable { entries })
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

impl Serialize for ProxyTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.entries.iter().map(|(name, d)| (name, d)))
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Enable the Prometheus metrics listener.
    pub metrics_enabled: bool,

    /// Metrics listener bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
