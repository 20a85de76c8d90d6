//! Transport factory
//!
//! Builds a live MCP session for a server record: a spawned subprocess
//! over stdio, or a streaming HTTP endpoint wired into the OAuth provider
//! and credential store. The stdio path captures the child's stderr so a
//! failed connect carries the tail of whatever the server printed.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rmcp::{
    service::RunningService,
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig, StreamableHttpClientTransport,
        TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::{GrantType, HttpConfig, ServerConfig, StdioConfig, TransportConfig};
use crate::credentials::{CredentialStore, InvalidateScope};
use crate::error::{CliError, CliResult, ErrorKind};
use crate::oauth::OAuthProvider;
use crate::settings::Settings;

use super::retry::{with_retry, RetryPolicy};

/// A connected MCP client session.
pub type McpService = RunningService<RoleClient, ()>;

/// How many stderr lines from a stdio child are kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Connect to a server, retrying transient failures under the settings'
/// budget. Errors are user-facing.
pub async fn connect_with_retry(
    name: &str,
    config: &ServerConfig,
    store: &CredentialStore,
    settings: &Settings,
    interactive: bool,
) -> CliResult<McpService> {
    let policy = RetryPolicy::from_settings(settings);
    let result = with_retry(&policy, &format!("connect '{}'", name), || {
        connect(name, config, store, interactive)
    })
    .await;
    result.map_err(|e| connect_error(name, e))
}

/// One connection attempt, no retry.
pub async fn connect(
    name: &str,
    config: &ServerConfig,
    store: &CredentialStore,
    interactive: bool,
) -> Result<McpService> {
    match &config.transport {
        TransportConfig::Stdio(stdio) => connect_stdio(name, stdio).await,
        TransportConfig::Http(http) => connect_http(name, http, store, interactive).await,
    }
}

fn connect_error(name: &str, error: anyhow::Error) -> CliError {
    match error.downcast::<CliError>() {
        Ok(cli) => cli,
        Err(other) => CliError::new(
            ErrorKind::ServerConnectionFailed,
            format!("cannot connect to server '{}'", name),
        )
        .with_details(format!("{:#}", other))
        .with_suggestion("check that the server is reachable and its config entry is correct"),
    }
}

// ─── stdio ───────────────────────────────────────────────────────────────

async fn connect_stdio(name: &str, config: &StdioConfig) -> Result<McpService> {
    tracing::debug!("spawning stdio server '{}': {}", name, config.command);

    let mut cmd = Command::new(&config.command);
    if !config.args.is_empty() {
        cmd.args(&config.args);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    let (transport, stderr) = TokioChildProcess::builder(cmd)
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", config.command))?;

    // Tee the child's stderr to ours (authorization prompts stay visible)
    // while keeping a bounded tail for connect-failure diagnostics.
    let tail: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
    if let Some(stderr) = stderr {
        let tail = tail.clone();
        let prefix = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                eprintln!("[{}] {}", prefix, line);
                let mut tail = tail.lock().expect("stderr tail poisoned");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });
    }

    match ().serve(transport).await {
        Ok(service) => Ok(service),
        Err(e) => {
            // Give the reader a beat to drain what the child printed on
            // the way down.
            tokio::time::sleep(Duration::from_millis(200)).await;
            let tail = tail.lock().expect("stderr tail poisoned");
            if tail.is_empty() {
                Err(anyhow!("initialize failed: {}", e))
            } else {
                let captured: Vec<String> =
                    tail.iter().map(|line| format!("  {}", line)).collect();
                Err(anyhow!(
                    "initialize failed: {}\nserver stderr:\n{}",
                    e,
                    captured.join("\n")
                ))
            }
        }
    }
}

// ─── http ────────────────────────────────────────────────────────────────

async fn connect_http(
    name: &str,
    config: &HttpConfig,
    store: &CredentialStore,
    interactive: bool,
) -> Result<McpService> {
    let mut provider = config.oauth.as_ref().map(|oauth| {
        let provider = OAuthProvider::new(name, &config.url, oauth.clone(), store.clone());
        if interactive {
            provider
        } else {
            provider.non_interactive()
        }
    });

    if let Some(provider) = provider.as_mut() {
        prepare_tokens(name, provider, store).await?;
    }

    match serve_http(name, config, store).await {
        Ok(service) => Ok(service),
        Err(error) => {
            let Some(provider) = provider.as_mut() else {
                return Err(error);
            };
            let message = format!("{:#}", error);
            if !looks_like_auth_failure(&message)
                || provider.grant_type() != GrantType::AuthorizationCode
            {
                return Err(error);
            }

            tracing::debug!("'{}' rejected the connection ({}), starting OAuth flow", name, message);
            store.invalidate(name, InvalidateScope::Tokens);
            provider
                .run_authorization_flow()
                .await
                .map_err(|e| anyhow::Error::new(CliError::from(e)))?;

            // The first transport is already started and not reusable;
            // open a fresh one with the stored tokens.
            serve_http(name, config, store).await
        }
    }
}

/// Make sure usable tokens are on disk before the first transport is
/// built: mint client-credentials tokens, refresh expired ones.
async fn prepare_tokens(
    name: &str,
    provider: &mut OAuthProvider,
    store: &CredentialStore,
) -> Result<()> {
    let now = crate::oauth::now_millis();
    let tokens = store.load_tokens(name);

    match provider.grant_type() {
        GrantType::ClientCredentials => {
            let usable = tokens.map(|t| !t.is_expired(now)).unwrap_or(false);
            if !usable {
                provider
                    .client_credentials_tokens()
                    .await
                    .map_err(|e| anyhow::Error::new(CliError::from(e)))?;
            }
        }
        GrantType::AuthorizationCode => {
            if let Some(tokens) = tokens {
                if tokens.is_expired(now) {
                    match tokens.refresh_token.as_deref() {
                        Some(refresh) => {
                            if let Err(e) = provider.refresh_tokens(refresh).await {
                                tracing::debug!(
                                    "token refresh for '{}' failed ({}), falling back to a new flow",
                                    name,
                                    e
                                );
                                store.invalidate(name, InvalidateScope::Tokens);
                            }
                        }
                        None => store.invalidate(name, InvalidateScope::Tokens),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn serve_http(name: &str, config: &HttpConfig, store: &CredentialStore) -> Result<McpService> {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let key = HeaderName::from_bytes(key.as_bytes())
            .with_context(|| format!("invalid header name '{}'", key))?;
        let value = HeaderValue::from_str(value).context("invalid header value")?;
        headers.insert(key, value);
    }
    if let Some(tokens) = store.load_tokens(name) {
        let bearer = format!("Bearer {}", tokens.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).context("stored access token is not a valid header")?,
        );
    }

    let mut builder = reqwest::Client::builder().default_headers(headers);
    if let Some(secs) = config.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let http = builder.build().context("failed to build HTTP client")?;

    let transport = StreamableHttpClientTransport::with_client(
        http,
        StreamableHttpClientTransportConfig::with_uri(config.url.clone()),
    );

    let service = ()
        .serve(transport)
        .await
        .with_context(|| format!("initialize failed for '{}'", config.url))?;
    Ok(service)
}

/// The OAuth-required signal: a 401 or an invalid/expired token report.
fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("401")
        || lower.contains("unauthorized")
        || lower.contains("invalid_token")
        || lower.contains("invalid token")
        || lower.contains("token expired")
}
