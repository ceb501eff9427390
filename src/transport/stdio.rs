//! Child-process transport: the downstream speaks MCP over its stdin/stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use rmcp::transport::TokioChildProcess;
use tokio::process::Command;

use super::ChannelError;

/// Which launcher runs the downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    Python,
    Node,
    Uvx,
    Npx,
}

impl Launcher {
    pub fn as_str(self) -> &'static str {
        match self {
            Launcher::Python => "python",
            Launcher::Node => "node",
            Launcher::Uvx => "uvx",
            Launcher::Npx => "npx",
        }
    }
}

/// A fully resolved command line for a downstream process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioTransport {
    pub launcher: Launcher,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl StdioTransport {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The command to spawn. Stdin and stdout are wired up by rmcp.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    /// Spawn the downstream. The child is killed when the session drops it.
    pub fn spawn(&self) -> Result<TokioChildProcess, ChannelError> {
        let process = TokioChildProcess::new(self.command())?;
        tracing::debug!(command = %self.command_line(), "Downstream process spawned");
        Ok(process)
    }
}
