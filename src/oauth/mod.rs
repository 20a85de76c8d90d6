//! OAuth 2.0 support for HTTP MCP servers
//!
//! Covers the authorization-code-with-PKCE flow (localhost callback
//! listener, dynamic client registration, token exchange and refresh) and
//! the browserless client-credentials grant.

mod callback;
mod pkce;
mod provider;
mod registration;

pub use callback::{CallbackListener, CallbackOutcome};
pub use pkce::{generate_state, PkceChallenge};
pub use provider::{FlowState, OAuthProvider, DEFAULT_CALLBACK_PORTS};
pub use registration::{discover_metadata, register_client, AuthServerMetadata, ClientMetadata};

use crate::error::{CliError, ErrorKind};

/// Errors from the OAuth subsystem.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Misconfiguration (bad grant combination, no bindable port).
    #[error("OAuth config error: {0}")]
    Config(String),

    /// Network or HTTP transport failure.
    #[error("OAuth network error: {0}")]
    Network(String),

    /// The authorization server rejected a request.
    #[error("OAuth server error: {0}")]
    Backend(String),

    /// The flow itself broke (missing verifier, bad callback).
    #[error("OAuth flow error: {0}")]
    Flow(String),

    /// Callback carried `error=` from the authorization server.
    #[error("authorization callback reported: {0}")]
    Callback(String),

    /// No callback arrived before the listener timeout.
    #[error("timed out waiting for the authorization callback")]
    Timeout,

    /// Non-interactive mode: authorization is needed and the URL was
    /// captured instead of opened.
    #[error("authorization required")]
    AuthRequired { url: String },
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Network(e.to_string())
    }
}

impl From<OAuthError> for CliError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::Config(msg) => CliError::new(ErrorKind::OauthConfigError, msg)
                .with_suggestion("check the server's oauth block in mcpx.json"),
            OAuthError::AuthRequired { url } => {
                CliError::new(ErrorKind::AuthRequired, "server requires authorization")
                    .with_details(format!("open this URL to authorize: {}", url))
                    .with_suggestion("re-run interactively to complete the browser flow")
            }
            OAuthError::Timeout => {
                CliError::new(ErrorKind::OauthFlowError, "authorization flow timed out")
                    .with_suggestion(
                        "complete the browser prompt within 5 minutes, then re-run the command",
                    )
            }
            OAuthError::Callback(msg) => CliError::new(
                ErrorKind::OauthFlowError,
                format!("authorization was rejected: {}", msg),
            )
            .with_suggestion("re-run and approve the authorization request in the browser"),
            OAuthError::Network(msg) => {
                CliError::new(ErrorKind::OauthFlowError, "token endpoint unreachable")
                    .with_details(msg)
                    .with_suggestion("check connectivity to the authorization server")
            }
            OAuthError::Backend(msg) => {
                CliError::new(ErrorKind::OauthFlowError, "authorization server refused the request")
                    .with_details(msg)
                    .with_suggestion(
                        "stored credentials may be stale; they are re-registered on the next run",
                    )
            }
            OAuthError::Flow(msg) => CliError::new(ErrorKind::OauthFlowError, msg)
                .with_suggestion("retry the command to restart the authorization flow"),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
