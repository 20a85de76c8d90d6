//! Connection façade
//!
//! One uniform session handle per server regardless of whether a daemon or
//! a direct connection is behind it. The tool filter is applied here, on
//! the way out of `list_tools` and before `call_tool` ever contacts the
//! server. Daemon-path failures demote the handle to a direct connection;
//! they are never fatal.

use std::path::{Path, PathBuf};

use rmcp::model::CallToolRequestParam;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::credentials::CredentialStore;
use crate::daemon::{self, DaemonHandle};
use crate::error::{suggest_tool_failure, CliError, CliResult, ErrorKind};
use crate::settings::Settings;

use super::filter::is_tool_allowed;
use super::transport::{self, McpService};
use super::types::{tool_from_rmcp, McpTool};

enum SessionKind {
    Direct(McpService),
    Daemon(DaemonHandle),
}

/// A connected server session.
pub struct ServerSession {
    name: String,
    config: ServerConfig,
    config_path: PathBuf,
    store: CredentialStore,
    settings: Settings,
    interactive: bool,
    kind: Option<SessionKind>,
}

/// Open a session: the daemon path first (unless disabled), then direct
/// with retry.
pub async fn connect(
    name: &str,
    config: &ServerConfig,
    config_path: &Path,
    store: &CredentialStore,
    settings: &Settings,
    interactive: bool,
) -> CliResult<ServerSession> {
    let kind = match daemon::ensure_daemon(name, config, config_path, settings).await {
        Some(handle) => SessionKind::Daemon(handle),
        None => {
            let service =
                transport::connect_with_retry(name, config, store, settings, interactive).await?;
            SessionKind::Direct(service)
        }
    };

    Ok(ServerSession {
        name: name.to_string(),
        config: config.clone(),
        config_path: config_path.to_path_buf(),
        store: store.clone(),
        settings: settings.clone(),
        interactive,
        kind: Some(kind),
    })
}

impl ServerSession {
    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self.kind, Some(SessionKind::Daemon(_)))
    }

    /// List the server's tools with the allow/deny filter applied.
    pub async fn list_tools(&mut self) -> CliResult<Vec<McpTool>> {
        let tools = self.raw_list_tools().await?;
        Ok(tools
            .into_iter()
            .filter(|tool| is_tool_allowed(&tool.name, &self.config))
            .collect())
    }

    /// Invoke a tool, refusing disabled ones without contacting the
    /// server. Returns the raw MCP result as JSON.
    pub async fn call_tool(&mut self, tool: &str, args: Option<Value>) -> CliResult<Value> {
        if !is_tool_allowed(tool, &self.config) {
            return Err(CliError::new(
                ErrorKind::ToolDisabled,
                format!("tool '{}' is disabled for server '{}'", tool, self.name),
            )
            .with_details("the server was not contacted".to_string())
            .with_suggestion(format!(
                "adjust allowedTools/disabledTools for '{}' in mcpx.json",
                self.name
            )));
        }

        if let Some(SessionKind::Daemon(handle)) = &self.kind {
            match handle.call_tool(tool, args.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    // A remote tool failure relayed by the worker is real;
                    // only infrastructure errors demote to direct.
                    let message = format!("{:#}", e);
                    if !is_daemon_plumbing_error(&message) {
                        return Err(call_error(&self.name, tool, &message));
                    }
                    tracing::debug!(
                        "daemon call for '{}' failed ({}), falling back to direct",
                        self.name,
                        message
                    );
                    self.demote_to_direct().await?;
                }
            }
        }

        let Some(SessionKind::Direct(service)) = &self.kind else {
            return Err(session_closed(&self.name));
        };
        let arguments = args.and_then(|v| v.as_object().cloned());
        let result = service
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| call_error(&self.name, tool, &e.to_string()))?;
        serde_json::to_value(&result).map_err(|e| {
            CliError::new(ErrorKind::ToolExecutionFailed, "unserialisable tool result")
                .with_details(e.to_string())
        })
    }

    /// The server's instructions string, when it advertises one.
    pub async fn instructions(&mut self) -> CliResult<Option<String>> {
        if let Some(SessionKind::Daemon(handle)) = &self.kind {
            match handle.get_instructions().await {
                Ok(instructions) => return Ok(instructions),
                Err(e) => {
                    tracing::debug!(
                        "daemon instructions for '{}' failed ({}), falling back to direct",
                        self.name,
                        e
                    );
                    self.demote_to_direct().await?;
                }
            }
        }

        let Some(SessionKind::Direct(service)) = &self.kind else {
            return Err(session_closed(&self.name));
        };
        Ok(service.peer_info().and_then(|info| info.instructions.clone()))
    }

    /// Idempotent close. A daemon-backed handle only lets go of the
    /// socket; the worker keeps its session warm.
    pub async fn close(&mut self) {
        match self.kind.take() {
            Some(SessionKind::Direct(service)) => {
                if let Err(e) = service.cancel().await {
                    tracing::debug!("close of '{}' reported: {}", self.name, e);
                }
            }
            Some(SessionKind::Daemon(_)) | None => {}
        }
    }

    async fn raw_list_tools(&mut self) -> CliResult<Vec<McpTool>> {
        if let Some(SessionKind::Daemon(handle)) = &self.kind {
            match handle.list_tools().await {
                Ok(mut tools) => {
                    for tool in &mut tools {
                        tool.server = self.name.clone();
                    }
                    return Ok(tools);
                }
                Err(e) => {
                    tracing::debug!(
                        "daemon list for '{}' failed ({}), falling back to direct",
                        self.name,
                        e
                    );
                    self.demote_to_direct().await?;
                }
            }
        }

        let Some(SessionKind::Direct(service)) = &self.kind else {
            return Err(session_closed(&self.name));
        };
        let response = service.list_tools(Default::default()).await.map_err(|e| {
            CliError::new(
                ErrorKind::ServerConnectionFailed,
                format!("failed to list tools on '{}'", self.name),
            )
            .with_details(e.to_string())
        })?;
        Ok(response
            .tools
            .into_iter()
            .map(|t| tool_from_rmcp(&self.name, t))
            .collect())
    }

    /// Replace a failed daemon handle with a direct connection.
    async fn demote_to_direct(&mut self) -> CliResult<()> {
        let service = transport::connect_with_retry(
            &self.name,
            &self.config,
            &self.store,
            &self.settings,
            self.interactive,
        )
        .await?;
        self.kind = Some(SessionKind::Direct(service));
        Ok(())
    }
}

fn session_closed(name: &str) -> CliError {
    CliError::new(
        ErrorKind::ServerConnectionFailed,
        format!("session for '{}' is closed", name),
    )
}

/// Socket-level trouble (vs a relayed remote failure) demotes to direct.
fn is_daemon_plumbing_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out")
        || lower.contains("connect")
        || lower.contains("connection")
        || lower.contains("unparseable daemon response")
        || lower.contains("id mismatch")
        || lower.contains("broken pipe")
}

fn call_error(server: &str, tool: &str, message: &str) -> CliError {
    let lower = message.to_lowercase();
    if lower.contains("unknown tool") || lower.contains("tool not found")
        || (lower.contains("not found") && lower.contains(&tool.to_lowercase()))
    {
        return CliError::new(
            ErrorKind::ToolNotFound,
            format!("server '{}' has no tool '{}'", server, tool),
        )
        .with_details(message.to_string())
        .with_suggestion(format!("list the server's tools with `mcpx info {}`", server));
    }

    let mut error = CliError::new(
        ErrorKind::ToolExecutionFailed,
        format!("'{}/{}' failed", server, tool),
    )
    .with_details(message.to_string());
    if let Some(suggestion) = suggest_tool_failure(message) {
        error = error.with_suggestion(suggestion);
    }
    error
}
