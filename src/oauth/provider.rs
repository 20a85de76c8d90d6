//! OAuth provider: owns one authorization flow per CLI invocation
//!
//! Pre-starts the callback listener (so the redirect URI carries the port
//! that actually bound), resolves client information (static config wins,
//! then persisted registration validated against the current redirect URL,
//! then dynamic registration), drives the browser redirect, and exchanges
//! or refreshes tokens through the credential store.

use std::time::Duration;

use crate::config::{GrantType, OauthConfig};
use crate::credentials::{CredentialStore, InvalidateScope, StoredClient, StoredTokens};

use super::callback::{CallbackListener, CallbackOutcome};
use super::pkce::{generate_state, PkceChallenge};
use super::registration::{discover_metadata, register_client, AuthServerMetadata, ClientMetadata};
use super::{now_millis, OAuthError};

/// Default port walk: high ports, then let the OS choose. Port 80 is only
/// tried when configured explicitly.
pub const DEFAULT_CALLBACK_PORTS: [u16; 4] = [38742, 45106, 51234, 0];

/// How long the listener waits for the browser redirect.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Flow progress, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    ListenerPending,
    ListenerReady,
    Authorizing,
    CodeReceived,
    CallbackError,
    Timeout,
    TokensSaved,
}

pub struct OAuthProvider {
    server_name: String,
    server_url: String,
    config: OauthConfig,
    store: CredentialStore,
    http: reqwest::Client,
    interactive: bool,
    state: FlowState,
    listener: Option<CallbackListener>,
    effective_port: Option<u16>,
    captured_url: Option<String>,
    metadata: Option<AuthServerMetadata>,
}

impl OAuthProvider {
    pub fn new(
        server_name: impl Into<String>,
        server_url: impl Into<String>,
        config: OauthConfig,
        store: CredentialStore,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_url: server_url.into(),
            config,
            store,
            http: reqwest::Client::new(),
            interactive: true,
            state: FlowState::Idle,
            listener: None,
            effective_port: None,
            captured_url: None,
            metadata: None,
        }
    }

    /// Capture the authorization URL instead of launching a browser.
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn grant_type(&self) -> GrantType {
        self.config.grant_type
    }

    /// URL captured in non-interactive mode, if the flow got that far.
    pub fn captured_url(&self) -> Option<&str> {
        self.captured_url.as_deref()
    }

    /// The port fallback list: explicit `callbackPorts` verbatim, else the
    /// preferred port (when set) followed by the defaults, deduplicated.
    pub fn port_candidates(config: &OauthConfig) -> Vec<u16> {
        if let Some(explicit) = &config.callback_ports {
            return explicit.clone();
        }
        let mut ports: Vec<u16> = Vec::new();
        if let Some(preferred) = config.callback_port {
            ports.push(preferred);
        }
        for port in DEFAULT_CALLBACK_PORTS {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    /// Bind the callback listener ahead of URL construction. No-op for
    /// client-credentials (no browser round-trip) and on re-entry.
    pub async fn prestart_listener(&mut self) -> Result<(), OAuthError> {
        if self.config.grant_type == GrantType::ClientCredentials || self.listener.is_some() {
            return Ok(());
        }
        self.state = FlowState::ListenerPending;
        let listener = CallbackListener::bind(&Self::port_candidates(&self.config)).await?;
        self.effective_port = Some(listener.port());
        self.listener = Some(listener);
        self.state = FlowState::ListenerReady;
        Ok(())
    }

    pub fn effective_port(&self) -> Option<u16> {
        self.effective_port
    }

    /// The redirect URL for the effective port; absent for
    /// client-credentials. Port 80 is elided as standard.
    pub fn redirect_url(&self) -> Option<String> {
        if self.config.grant_type == GrantType::ClientCredentials {
            return None;
        }
        self.effective_port.map(redirect_url_for_port)
    }

    /// Client metadata advertised on dynamic registration.
    pub fn client_metadata(&self) -> ClientMetadata {
        let auth_method = if self.config.client_secret.is_some() {
            "client_secret_post"
        } else {
            "none"
        };
        match self.config.grant_type {
            GrantType::AuthorizationCode => ClientMetadata {
                client_name: format!("mcpx ({})", self.server_name),
                redirect_uris: self.redirect_url().into_iter().collect(),
                grant_types: vec!["authorization_code".into(), "refresh_token".into()],
                response_types: vec!["code".into()],
                token_endpoint_auth_method: auth_method.into(),
                scope: self.config.scope.clone(),
            },
            GrantType::ClientCredentials => ClientMetadata {
                client_name: format!("mcpx ({})", self.server_name),
                redirect_uris: Vec::new(),
                grant_types: vec!["client_credentials".into()],
                response_types: Vec::new(),
                token_endpoint_auth_method: auth_method.into(),
                scope: self.config.scope.clone(),
            },
        }
    }

    async fn metadata(&mut self) -> Result<AuthServerMetadata, OAuthError> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }
        let metadata = discover_metadata(&self.http, &self.server_url).await?;
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    /// Resolve client information: static config wins unconditionally;
    /// otherwise the persisted record, invalidated when its registered
    /// redirect URIs no longer cover the current redirect URL; otherwise
    /// dynamic registration.
    pub async fn resolve_client(&mut self) -> Result<StoredClient, OAuthError> {
        if let Some(client_id) = &self.config.client_id {
            return Ok(StoredClient {
                client_id: client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uris: self.redirect_url().into_iter().collect(),
            });
        }

        let current_redirect = self.redirect_url();
        if let Some(stored) = self.store.load_client(&self.server_name) {
            let still_valid = match &current_redirect {
                Some(url) => stored.redirect_uris.iter().any(|u| u == url),
                None => true,
            };
            if still_valid {
                return Ok(stored);
            }
            tracing::debug!(
                "stored client for '{}' registered against {:?}, need {:?}; re-registering",
                self.server_name,
                stored.redirect_uris,
                current_redirect
            );
            self.store.invalidate(&self.server_name, InvalidateScope::Client);
        }

        let metadata = self.metadata().await?;
        let endpoint = metadata.registration_endpoint.ok_or_else(|| {
            OAuthError::Config(format!(
                "server '{}' has no clientId configured and offers no registration endpoint",
                self.server_name
            ))
        })?;
        let client = register_client(&self.http, &endpoint, &self.client_metadata()).await?;
        self.store
            .save_client(&self.server_name, &client)
            .map_err(|e| OAuthError::Flow(e.to_string()))?;
        Ok(client)
    }

    /// Run the complete authorization-code flow and persist the tokens.
    pub async fn run_authorization_flow(&mut self) -> Result<StoredTokens, OAuthError> {
        if self.config.grant_type != GrantType::AuthorizationCode {
            return Err(OAuthError::Config(
                "authorization flow requested for a client_credentials server".into(),
            ));
        }

        self.prestart_listener().await?;
        let client = self.resolve_client().await?;
        let redirect = self
            .redirect_url()
            .ok_or_else(|| OAuthError::Flow("callback listener is not bound".into()))?;

        let pkce = PkceChallenge::generate();
        self.store
            .save_verifier(&self.server_name, &pkce.verifier)
            .map_err(|e| OAuthError::Flow(e.to_string()))?;

        let metadata = self.metadata().await?;
        let url = build_authorization_url(
            &metadata.authorization_endpoint,
            &client.client_id,
            &redirect,
            self.config.scope.as_deref(),
            &pkce.challenge,
            &generate_state(),
        );
        // Ports chosen at runtime may differ from whatever the endpoint
        // carries pre-baked; force the effective value.
        let url = rewrite_redirect_uri(&url, &redirect);

        self.state = FlowState::Authorizing;

        if !self.interactive {
            self.captured_url = Some(url.clone());
            self.cleanup();
            return Err(OAuthError::AuthRequired { url });
        }

        eprintln!("Authorize '{}' in your browser:\n  {}", self.server_name, url);
        if let Err(e) = open::that(&url) {
            tracing::debug!("browser launch failed ({}), URL printed above", e);
        }

        let listener = self
            .listener
            .take()
            .ok_or_else(|| OAuthError::Flow("callback listener is not bound".into()))?;
        let outcome = match listener.wait(CALLBACK_TIMEOUT).await {
            Ok(outcome) => outcome,
            Err(OAuthError::Timeout) => {
                self.state = FlowState::Timeout;
                return Err(OAuthError::Timeout);
            }
            Err(other) => return Err(other),
        };

        let code = match outcome {
            CallbackOutcome::Code { code, .. } => {
                self.state = FlowState::CodeReceived;
                code
            }
            CallbackOutcome::Error(message) => {
                self.state = FlowState::CallbackError;
                return Err(OAuthError::Callback(message));
            }
        };

        self.exchange_code(&client, &code, &redirect).await
    }

    /// Exchange an authorization code for tokens and persist them.
    pub async fn exchange_code(
        &mut self,
        client: &StoredClient,
        code: &str,
        redirect: &str,
    ) -> Result<StoredTokens, OAuthError> {
        let verifier = self.store.load_verifier(&self.server_name).ok_or_else(|| {
            OAuthError::Flow("PKCE verifier is missing; the flow must be restarted".into())
        })?;

        let metadata = self.metadata().await?;
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".into()),
            ("code", code.to_string()),
            ("redirect_uri", redirect.to_string()),
            ("client_id", client.client_id.clone()),
            ("code_verifier", verifier),
        ];
        if let Some(secret) = &client.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let tokens = self.request_tokens(&metadata.token_endpoint, &form).await?;
        self.store
            .save_tokens(&self.server_name, &tokens)
            .map_err(|e| OAuthError::Flow(e.to_string()))?;
        self.store
            .invalidate(&self.server_name, InvalidateScope::Verifier);
        self.state = FlowState::TokensSaved;
        Ok(tokens)
    }

    /// Refresh with a stored refresh token; the old refresh token is kept
    /// when the server omits a new one.
    pub async fn refresh_tokens(
        &mut self,
        refresh_token: &str,
    ) -> Result<StoredTokens, OAuthError> {
        let client = self.resolve_client().await?;
        let metadata = self.metadata().await?;

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "refresh_token".into()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", client.client_id.clone()),
        ];
        if let Some(secret) = &client.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let mut tokens = self.request_tokens(&metadata.token_endpoint, &form).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        self.store
            .save_tokens(&self.server_name, &tokens)
            .map_err(|e| OAuthError::Flow(e.to_string()))?;
        self.state = FlowState::TokensSaved;
        Ok(tokens)
    }

    /// URL-encoded token-request parameters for the client-credentials
    /// grant; `scope_override` replaces the configured scope per call.
    pub fn client_credentials_params(&self, scope_override: Option<&str>) -> String {
        let mut params = String::from("grant_type=client_credentials");
        if let Some(scope) = scope_override.or(self.config.scope.as_deref()) {
            params.push_str("&scope=");
            params.push_str(&urlencoding::encode(scope));
        }
        params
    }

    /// Fetch tokens via the client-credentials grant and persist them.
    pub async fn client_credentials_tokens(&mut self) -> Result<StoredTokens, OAuthError> {
        let (client_id, client_secret) = match (&self.config.client_id, &self.config.client_secret)
        {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                return Err(OAuthError::Config(
                    "client_credentials requires clientId and clientSecret".into(),
                ))
            }
        };

        let metadata = self.metadata().await?;
        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "client_credentials".into()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = &self.config.scope {
            form.push(("scope", scope.clone()));
        }

        let tokens = self.request_tokens(&metadata.token_endpoint, &form).await?;
        self.store
            .save_tokens(&self.server_name, &tokens)
            .map_err(|e| OAuthError::Flow(e.to_string()))?;
        self.state = FlowState::TokensSaved;
        Ok(tokens)
    }

    async fn request_tokens(
        &self,
        token_endpoint: &str,
        form: &[(&str, String)],
    ) -> Result<StoredTokens, OAuthError> {
        let response = self
            .http
            .post(token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Network(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Backend(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::Backend(format!("bad token response: {}", e)))?;

        Ok(StoredTokens {
            access_token: parsed.access_token,
            token_type: parsed.token_type,
            refresh_token: parsed.refresh_token,
            expires_at: parsed.expires_in.map(|secs| now_millis() + secs * 1000),
        })
    }

    /// Drop the listener and reset to idle. Safe to call at any point.
    pub fn cleanup(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.cleanup();
        }
        self.effective_port = None;
        if self.state != FlowState::TokensSaved {
            self.state = FlowState::Idle;
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn redirect_url_for_port(port: u16) -> String {
    if port == 80 {
        "http://localhost/callback".to_string()
    } else {
        format!("http://localhost:{}/callback", port)
    }
}

fn build_authorization_url(
    endpoint: &str,
    client_id: &str,
    redirect: &str,
    scope: Option<&str>,
    challenge: &str,
    state: &str,
) -> String {
    let mut params: Vec<(&str, &str)> = vec![
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", redirect),
        ("code_challenge", challenge),
        ("code_challenge_method", "S256"),
        ("state", state),
    ];
    if let Some(scope) = scope {
        params.push(("scope", scope));
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}{}", endpoint, separator, query)
}

/// Force the `redirect_uri` query parameter to `redirect`, appending it
/// when absent.
fn rewrite_redirect_uri(url: &str, redirect: &str) -> String {
    let encoded = urlencoding::encode(redirect);
    let Some((base, query)) = url.split_once('?') else {
        return format!("{}?redirect_uri={}", url, encoded);
    };

    let mut replaced = false;
    let rewritten: Vec<String> = query
        .split('&')
        .map(|pair| {
            if pair.starts_with("redirect_uri=") {
                replaced = true;
                format!("redirect_uri={}", encoded)
            } else {
                pair.to_string()
            }
        })
        .collect();

    let mut query = rewritten.join("&");
    if !replaced {
        query.push_str(&format!("&redirect_uri={}", encoded));
    }
    format!("{}?{}", base, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn oauth_config() -> OauthConfig {
        OauthConfig {
            grant_type: GrantType::AuthorizationCode,
            client_id: None,
            client_secret: None,
            scope: None,
            callback_port: None,
            callback_ports: None,
        }
    }

    #[test]
    fn port_candidates_default_order() {
        let ports = OAuthProvider::port_candidates(&oauth_config());
        assert_eq!(ports, DEFAULT_CALLBACK_PORTS.to_vec());
    }

    #[test]
    fn preferred_port_goes_first_without_duplicates() {
        let config = OauthConfig {
            callback_port: Some(DEFAULT_CALLBACK_PORTS[1]),
            ..oauth_config()
        };
        let ports = OAuthProvider::port_candidates(&config);
        assert_eq!(ports[0], DEFAULT_CALLBACK_PORTS[1]);
        assert_eq!(ports.len(), DEFAULT_CALLBACK_PORTS.len());
    }

    #[test]
    fn explicit_list_fully_overrides() {
        let config = OauthConfig {
            callback_port: Some(9999),
            callback_ports: Some(vec![80, 0]),
            ..oauth_config()
        };
        assert_eq!(OAuthProvider::port_candidates(&config), vec![80, 0]);
    }

    #[test]
    fn redirect_url_elides_port_80() {
        assert_eq!(redirect_url_for_port(80), "http://localhost/callback");
        assert_eq!(redirect_url_for_port(38742), "http://localhost:38742/callback");
    }

    #[test]
    fn rewrite_replaces_existing_redirect() {
        let url = "https://auth.example/authorize?client_id=c&redirect_uri=http%3A%2F%2Flocalhost%3A1111%2Fcallback&state=s";
        let out = rewrite_redirect_uri(url, "http://localhost:2222/callback");
        assert!(out.contains("redirect_uri=http%3A%2F%2Flocalhost%3A2222%2Fcallback"));
        assert!(!out.contains("1111"));
        assert!(out.contains("client_id=c"));
        assert!(out.contains("state=s"));
    }

    #[test]
    fn rewrite_appends_when_absent() {
        let out = rewrite_redirect_uri(
            "https://auth.example/authorize",
            "http://localhost:2222/callback",
        );
        assert!(out.ends_with("?redirect_uri=http%3A%2F%2Flocalhost%3A2222%2Fcallback"));
    }

    #[test]
    fn client_credentials_params_shape() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        let config = OauthConfig {
            grant_type: GrantType::ClientCredentials,
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            scope: Some("tools:read tools:call".into()),
            callback_port: None,
            callback_ports: None,
        };
        let provider = OAuthProvider::new("x", "https://mcp.example", config, store);

        assert_eq!(
            provider.client_credentials_params(None),
            "grant_type=client_credentials&scope=tools%3Aread%20tools%3Acall"
        );
        assert_eq!(
            provider.client_credentials_params(Some("other")),
            "grant_type=client_credentials&scope=other"
        );
    }

    #[test]
    fn client_metadata_matches_grant() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        let mut provider = OAuthProvider::new("x", "https://mcp.example", oauth_config(), store);
        provider.effective_port = Some(4567);

        let metadata = provider.client_metadata();
        assert_eq!(metadata.response_types, vec!["code"]);
        assert_eq!(metadata.redirect_uris, vec!["http://localhost:4567/callback"]);
        assert_eq!(metadata.token_endpoint_auth_method, "none");
        assert!(metadata.grant_types.contains(&"refresh_token".to_string()));

        let dir2 = tempdir().unwrap();
        let cc = OAuthProvider::new(
            "y",
            "https://mcp.example",
            OauthConfig {
                grant_type: GrantType::ClientCredentials,
                client_id: Some("id".into()),
                client_secret: Some("s".into()),
                scope: None,
                callback_port: None,
                callback_ports: None,
            },
            CredentialStore::new(dir2.path().to_path_buf()),
        );
        let metadata = cc.client_metadata();
        assert!(metadata.response_types.is_empty());
        assert!(metadata.redirect_uris.is_empty());
        assert_eq!(metadata.token_endpoint_auth_method, "client_secret_post");
    }

    #[test]
    fn static_client_id_wins() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        store
            .save_client(
                "x",
                &StoredClient {
                    client_id: "persisted".into(),
                    client_secret: None,
                    redirect_uris: vec![],
                },
            )
            .unwrap();

        let config = OauthConfig {
            client_id: Some("static-id".into()),
            ..oauth_config()
        };
        let mut provider = OAuthProvider::new("x", "https://mcp.example", config, store);
        let client = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(provider.resolve_client())
            .unwrap();
        assert_eq!(client.client_id, "static-id");
    }

    #[tokio::test]
    async fn redirect_mismatch_invalidates_stored_client() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        store
            .save_client(
                "x",
                &StoredClient {
                    client_id: "old".into(),
                    client_secret: None,
                    redirect_uris: vec!["http://localhost:1111/callback".into()],
                },
            )
            .unwrap();

        let mut provider =
            OAuthProvider::new("x", "http://127.0.0.1:1/mcp", oauth_config(), store.clone());
        provider.effective_port = Some(2222);

        // Registration endpoint is unreachable, so resolution fails, but
        // the stale record must already be gone.
        let result = provider.resolve_client().await;
        assert!(result.is_err());
        assert!(store.load_client("x").is_none());
    }

    #[tokio::test]
    async fn matching_stored_client_is_reused() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        store
            .save_client(
                "x",
                &StoredClient {
                    client_id: "good".into(),
                    client_secret: None,
                    redirect_uris: vec!["http://localhost:2222/callback".into()],
                },
            )
            .unwrap();

        let mut provider =
            OAuthProvider::new("x", "http://127.0.0.1:1/mcp", oauth_config(), store);
        provider.effective_port = Some(2222);
        let client = provider.resolve_client().await.unwrap();
        assert_eq!(client.client_id, "good");
    }

    #[tokio::test]
    async fn missing_verifier_is_fatal_before_any_request() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().to_path_buf());
        let mut provider =
            OAuthProvider::new("x", "http://127.0.0.1:1/mcp", oauth_config(), store);
        let client = StoredClient {
            client_id: "c".into(),
            client_secret: None,
            redirect_uris: vec![],
        };
        let err = provider
            .exchange_code(&client, "code", "http://localhost:2222/callback")
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Flow(_)));
    }
}
