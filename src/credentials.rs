//! File-backed credential store
//!
//! Per-user tree holding OAuth state keyed by server name:
//!
//! ```text
//! ~/.mcpx/
//!   tokens/<name>.json      access/refresh tokens
//!   clients/<name>.json     dynamically registered client info
//!   verifiers/<name>.txt    PKCE code verifier
//! ```
//!
//! Directories are 0700, files 0600. Reads are forgiving (missing or
//! malformed files read as absent); writes are strict and go through an
//! atomic rename so concurrent CLI invocations can only race whole files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult, ErrorKind};

/// Stored OAuth tokens for one server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix milliseconds; `None` when the server did not report an expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl StoredTokens {
    /// Expired (with a one-minute buffer) or expiring; tokens without an
    /// expiry never report as expired.
    pub fn is_expired(&self, now_millis: u64) -> bool {
        match self.expires_at {
            Some(at) => now_millis >= at.saturating_sub(60_000),
            None => false,
        }
    }
}

/// Dynamically registered OAuth client information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredClient {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// The redirect URIs this client was registered against. A mismatch
    /// with the provider's current redirect URL invalidates the record.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Which credential files to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateScope {
    All,
    Client,
    Tokens,
    Verifier,
}

/// Handle on the per-user credential tree.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root from `MCPX_HOME`, else `~/.mcpx`.
    pub fn from_env() -> Self {
        let root = std::env::var("MCPX_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".mcpx")))
            .unwrap_or_else(|| PathBuf::from(".mcpx"));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─── tokens ──────────────────────────────────────────────────────────

    pub fn load_tokens(&self, server: &str) -> Option<StoredTokens> {
        read_json(&self.tokens_path(server))
    }

    pub fn save_tokens(&self, server: &str, tokens: &StoredTokens) -> CliResult<()> {
        self.write_json(&self.tokens_path(server), tokens)
    }

    // ─── client info ─────────────────────────────────────────────────────

    pub fn load_client(&self, server: &str) -> Option<StoredClient> {
        read_json(&self.client_path(server))
    }

    pub fn save_client(&self, server: &str, client: &StoredClient) -> CliResult<()> {
        self.write_json(&self.client_path(server), client)
    }

    // ─── PKCE verifier ───────────────────────────────────────────────────

    pub fn load_verifier(&self, server: &str) -> Option<String> {
        let raw = fs::read_to_string(self.verifier_path(server)).ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn save_verifier(&self, server: &str, verifier: &str) -> CliResult<()> {
        self.write_raw(&self.verifier_path(server), verifier.as_bytes())
    }

    /// Delete exactly the files in the given scope.
    pub fn invalidate(&self, server: &str, scope: InvalidateScope) {
        let paths: Vec<PathBuf> = match scope {
            InvalidateScope::All => vec![
                self.tokens_path(server),
                self.client_path(server),
                self.verifier_path(server),
            ],
            InvalidateScope::Client => vec![self.client_path(server)],
            InvalidateScope::Tokens => vec![self.tokens_path(server)],
            InvalidateScope::Verifier => vec![self.verifier_path(server)],
        };
        for path in paths {
            let _ = fs::remove_file(path);
        }
    }

    fn tokens_path(&self, server: &str) -> PathBuf {
        self.root
            .join("tokens")
            .join(format!("{}.json", sanitize(server)))
    }

    fn client_path(&self, server: &str) -> PathBuf {
        self.root
            .join("clients")
            .join(format!("{}.json", sanitize(server)))
    }

    fn verifier_path(&self, server: &str) -> PathBuf {
        self.root
            .join("verifiers")
            .join(format!("{}.txt", sanitize(server)))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> CliResult<()> {
        let json = serde_json::to_vec_pretty(value).map_err(|e| {
            CliError::new(ErrorKind::OauthFlowError, "cannot serialise credential record")
                .with_details(e.to_string())
        })?;
        self.write_raw(path, &json)
    }

    /// Strict write: 0700 parent, 0600 file, temp-then-rename.
    fn write_raw(&self, path: &Path, bytes: &[u8]) -> CliResult<()> {
        let write = || -> std::io::Result<()> {
            let dir = path
                .parent()
                .ok_or_else(|| std::io::Error::other("credential path has no parent"))?;
            fs::create_dir_all(dir)?;
            set_mode(dir, 0o700)?;

            let tmp = path.with_extension("tmp");
            {
                let mut file = open_private(&tmp)?;
                file.write_all(bytes)?;
                file.sync_all()?;
            }
            fs::rename(&tmp, path)?;
            Ok(())
        };
        write().map_err(|e| {
            CliError::new(
                ErrorKind::OauthFlowError,
                format!("cannot write credential file {}", path.display()),
            )
            .with_details(e.to_string())
        })
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
