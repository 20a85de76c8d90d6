//! Daemon worker
//!
//! A detached process holding one warm MCP session for one server. Serves
//! newline-framed requests on the per-server Unix socket until the idle
//! timer fires, a `close` request arrives, or a signal lands. All paths
//! exit through the same cleanup.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rmcp::model::CallToolRequestParam;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use crate::config::{Catalogue, ServerConfig};
use crate::credentials::CredentialStore;
use crate::mcp::transport::{self, McpService};
use crate::mcp::types::tool_from_rmcp;
use crate::settings::Settings;

use super::paths::{self, DaemonDescriptor};
use super::protocol::{RequestKind, WorkerRequest, WorkerResponse, READY_MARKER};

/// Entry point for the hidden `daemon` subcommand.
pub async fn run(server_name: &str, config_path: Option<&Path>) -> Result<()> {
    let settings = Settings::from_env();
    let catalogue = Catalogue::load(config_path, settings.strict_env)
        .map_err(|e| anyhow!("{}", e))?;
    let config = catalogue
        .get(server_name)
        .with_context(|| format!("server '{}' is not in the configuration", server_name))?
        .clone();

    let result = serve(server_name, &config, &settings).await;
    paths::remove_files(server_name);
    if let Err(e) = &result {
        tracing::error!("daemon for '{}' exiting: {}", server_name, e);
    }
    result
}

async fn serve(name: &str, config: &ServerConfig, settings: &Settings) -> Result<()> {
    let socket_path = paths::socket_path(name);
    let _ = std::fs::remove_file(&socket_path);

    let descriptor = DaemonDescriptor {
        pid: std::process::id(),
        config_hash: paths::config_hash(config),
        started_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    descriptor
        .write(name)
        .context("failed to write daemon descriptor")?;

    // A detached daemon has no browser to offer, so the session is opened
    // non-interactively; servers that need a fresh authorization fail here
    // and the CLI falls back to a direct (interactive) connection.
    let store = CredentialStore::from_env();
    let service = transport::connect_with_retry(name, config, &store, settings, false)
        .await
        .map_err(|e| anyhow!("{}", e))?;

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    // Unblock the spawner.
    println!("{}", READY_MARKER);
    use std::io::Write;
    let _ = std::io::stdout().flush();

    tracing::info!("daemon for '{}' serving on {}", name, socket_path.display());

    let idle = settings.daemon_idle_timeout;
    let mut deadline = tokio::time::Instant::now() + idle;
    let mut sigterm = signal(SignalKind::terminate()).context("sigterm handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("sigint handler")?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                deadline = tokio::time::Instant::now() + idle;
                match handle_connection(stream, &service).await {
                    Ok(true) => {
                        // Grace so the close response reaches the client.
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        tracing::info!("close requested, shutting down");
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("connection error: {}", e),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::info!("idle for {:?}, shutting down", idle);
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT, shutting down");
                break;
            }
        }
    }

    let _ = service.cancel().await;
    Ok(())
}

/// One JSON request per connection; returns `true` when the request was
/// `close` and the worker should shut down.
async fn handle_connection(stream: UnixStream, service: &McpService) -> Result<bool> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Ok(false);
    }

    let (response, shutdown) = match serde_json::from_str::<WorkerRequest>(&line) {
        Ok(request) => {
            let shutdown = request.kind == RequestKind::Close;
            (dispatch(request, service).await, shutdown)
        }
        Err(e) => (WorkerResponse::err(0, format!("bad request: {}", e)), false),
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;

    Ok(shutdown)
}

async fn dispatch(request: WorkerRequest, service: &McpService) -> WorkerResponse {
    let id = request.id;
    match request.kind {
        RequestKind::Ping => WorkerResponse::ok(id, Some(serde_json::json!("pong"))),

        RequestKind::ListTools => match service.list_tools(Default::default()).await {
            Ok(response) => {
                let tools: Vec<_> = response
                    .tools
                    .into_iter()
                    .map(|t| tool_from_rmcp("", t))
                    .collect();
                match serde_json::to_value(&tools) {
                    Ok(data) => WorkerResponse::ok(id, Some(data)),
                    Err(e) => WorkerResponse::err(id, e.to_string()),
                }
            }
            Err(e) => WorkerResponse::err(id, e.to_string()),
        },

        RequestKind::CallTool => {
            let Some(tool_name) = request.tool_name else {
                return WorkerResponse::err(id, "callTool requires toolName");
            };
            let arguments = request.args.and_then(|v| v.as_object().cloned());
            match service
                .call_tool(CallToolRequestParam {
                    name: tool_name.into(),
                    arguments,
                })
                .await
            {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(data) => WorkerResponse::ok(id, Some(data)),
                    Err(e) => WorkerResponse::err(id, e.to_string()),
                },
                Err(e) => WorkerResponse::err(id, e.to_string()),
            }
        }

        RequestKind::GetInstructions => {
            let instructions = service
                .peer_info()
                .and_then(|info| info.instructions.clone());
            WorkerResponse::ok(id, Some(serde_json::json!(instructions)))
        }

        RequestKind::Close => WorkerResponse::ok(id, None),
    }
}
