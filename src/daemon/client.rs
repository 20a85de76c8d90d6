//! Daemon client
//!
//! Locates or spawns the per-server worker, verifies freshness (pid alive,
//! config hash, socket present), and forwards framed requests. Every
//! failure on this path returns `None` or an internal error so the façade
//! can fall back to a direct connection; nothing here is fatal to the
//! user's operation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::Command;

use crate::config::ServerConfig;
use crate::mcp::types::McpTool;
use crate::settings::Settings;

use super::paths::{self, DaemonDescriptor};
use super::protocol::{RequestKind, WorkerRequest, WorkerResponse, READY_MARKER};

/// Whole-request deadline on the daemon socket; short so a wedged worker
/// surfaces the fallback quickly.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the spawner waits for `DAEMON_READY`.
const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-less handle on a running worker.
pub struct DaemonHandle {
    socket_path: PathBuf,
    next_id: AtomicU64,
}

impl DaemonHandle {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path, next_id: AtomicU64::new(1) }
    }

    pub async fn ping(&self) -> Result<()> {
        self.request(RequestKind::Ping, None, None).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let data = self
            .request(RequestKind::ListTools, None, None)
            .await?
            .ok_or_else(|| anyhow!("daemon returned no tool list"))?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn call_tool(&self, tool: &str, args: Option<Value>) -> Result<Value> {
        let data = self
            .request(RequestKind::CallTool, Some(tool.to_string()), args)
            .await?
            .ok_or_else(|| anyhow!("daemon returned no call result"))?;
        Ok(data)
    }

    pub async fn get_instructions(&self) -> Result<Option<String>> {
        let data = self.request(RequestKind::GetInstructions, None, None).await?;
        Ok(data.and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    /// Ask the worker to shut down (it responds before exiting).
    pub async fn close(&self) -> Result<()> {
        self.request(RequestKind::Close, None, None).await?;
        Ok(())
    }

    /// One request per connection, newline framing both ways.
    async fn request(
        &self,
        kind: RequestKind,
        tool_name: Option<String>,
        args: Option<Value>,
    ) -> Result<Option<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = WorkerRequest { id, kind, tool_name, args };

        let exchange = async {
            let stream = UnixStream::connect(&self.socket_path)
                .await
                .with_context(|| format!("connect {}", self.socket_path.display()))?;
            let (reader, mut writer) = stream.into_split();

            let mut payload = serde_json::to_string(&request)?;
            payload.push('\n');
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await?;

            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await?;
            let response: WorkerResponse =
                serde_json::from_str(&line).context("unparseable daemon response")?;
            Ok::<WorkerResponse, anyhow::Error>(response)
        };

        let response = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| anyhow!("daemon request timed out"))??;

        if response.id != id {
            bail!("daemon response id mismatch ({} != {})", response.id, id);
        }
        if !response.success {
            bail!(
                "{}",
                response.error.unwrap_or_else(|| "daemon reported failure".into())
            );
        }
        Ok(response.data)
    }
}

/// Return a live, fresh daemon handle for the server, spawning or
/// respawning as needed; `None` means the caller must go direct.
pub async fn ensure_daemon(
    name: &str,
    config: &ServerConfig,
    config_path: &Path,
    settings: &Settings,
) -> Option<DaemonHandle> {
    if settings.no_daemon {
        return None;
    }

    let current_hash = paths::config_hash(config);

    if let Some(descriptor) = DaemonDescriptor::read(name) {
        let socket_exists = paths::socket_path(name).exists();
        let fresh = is_fresh(&descriptor, &current_hash, socket_exists);

        if fresh {
            let handle = DaemonHandle::new(paths::socket_path(name));
            if handle.ping().await.is_ok() {
                tracing::debug!("reusing daemon for '{}' (pid {})", name, descriptor.pid);
                return Some(handle);
            }
            tracing::debug!("daemon for '{}' not answering, respawning", name);
        } else {
            tracing::debug!(
                "daemon for '{}' is stale (alive={}, hash match={}, socket={})",
                name,
                paths::pid_alive(descriptor.pid),
                descriptor.config_hash == current_hash,
                socket_exists
            );
        }

        if paths::pid_alive(descriptor.pid) {
            unsafe {
                libc::kill(descriptor.pid as libc::pid_t, libc::SIGTERM);
            }
        }
        paths::remove_files(name);
    }

    match spawn_worker(name, config_path).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::debug!("daemon spawn for '{}' failed: {}", name, e);
            paths::remove_files(name);
            None
        }
    }
}

/// A daemon is valid only when its process is alive, its config hash
/// matches the current record, and its socket file exists; any violated
/// conjunct forces cleanup and respawn.
fn is_fresh(descriptor: &DaemonDescriptor, current_hash: &str, socket_exists: bool) -> bool {
    paths::pid_alive(descriptor.pid) && descriptor.config_hash == current_hash && socket_exists
}

/// Re-execute ourselves as a detached worker and wait for readiness.
async fn spawn_worker(name: &str, config_path: &Path) -> Result<DaemonHandle> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;

    std::fs::create_dir_all(paths::socket_dir()).context("cannot create socket directory")?;
    let log = std::fs::File::create(paths::log_path(name)).context("cannot create daemon log")?;

    let mut cmd = Command::new(exe);
    cmd.arg("daemon")
        .arg(name)
        .arg("--config")
        .arg(config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(log));
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().context("failed to spawn daemon worker")?;
    let stdout = child
        .stdout
        .take()
        .context("daemon worker has no stdout")?;

    let readiness = tokio::time::timeout(SPAWN_TIMEOUT, async {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == READY_MARKER {
                return true;
            }
        }
        false
    })
    .await;

    match readiness {
        Ok(true) => {}
        Ok(false) => {
            let _ = child.start_kill();
            bail!("daemon worker exited before reporting readiness");
        }
        Err(_) => {
            let _ = child.start_kill();
            bail!("daemon worker did not report readiness within {:?}", SPAWN_TIMEOUT);
        }
    }

    let handle = DaemonHandle::new(paths::socket_path(name));
    handle.ping().await.context("post-spawn ping failed")?;
    tracing::debug!("spawned daemon for '{}' (pid {:?})", name, child.id());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(pid: u32, hash: &str) -> DaemonDescriptor {
        DaemonDescriptor {
            pid,
            config_hash: hash.to_string(),
            started_at: 0,
        }
    }

    #[test]
    fn every_conjunct_is_required() {
        let own_pid = std::process::id();
        assert!(is_fresh(&descriptor(own_pid, "abc"), "abc", true));

        // Dead pid.
        assert!(!is_fresh(&descriptor(0, "abc"), "abc", true));
        // Config hash changed.
        assert!(!is_fresh(&descriptor(own_pid, "abc"), "def", true));
        // Socket file gone.
        assert!(!is_fresh(&descriptor(own_pid, "abc"), "abc", false));
    }
}
