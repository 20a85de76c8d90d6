//! OAuth flow against a stub authorization server.
//!
//! The stub serves metadata discovery (with a 404, forcing the
//! conventional endpoint fallback), dynamic registration, and the token
//! endpoint, so the provider's full lifecycle runs over real HTTP.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mcpx::config::{GrantType, OauthConfig};
use mcpx::credentials::{CredentialStore, StoredTokens};
use mcpx::oauth::{CallbackListener, FlowState, OAuthError, OAuthProvider};

async fn stub_auth_server() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let mut content_length = 0usize;
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let header = header.trim();
                    if header.is_empty() {
                        break;
                    }
                    if let Some(value) = header
                        .to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().to_string())
                    {
                        content_length = value.parse().unwrap_or(0);
                    }
                }
                let mut body = vec![0u8; content_length];
                if content_length > 0 {
                    let _ = reader.read_exact(&mut body).await;
                }
                let body = String::from_utf8_lossy(&body).to_string();

                let (status, payload) = if request_line.contains("/.well-known/") {
                    ("404 Not Found", "{}".to_string())
                } else if request_line.starts_with("POST /register") {
                    (
                        "201 Created",
                        r#"{"client_id": "dyn-client", "client_secret": "dyn-secret"}"#.to_string(),
                    )
                } else if request_line.starts_with("POST /token") {
                    assert!(body.contains("grant_type="), "token request has a grant: {}", body);
                    (
                        "200 OK",
                        r#"{"access_token": "at-xyz", "token_type": "Bearer",
                           "expires_in": 3600, "refresh_token": "rt-1"}"#
                            .to_string(),
                    )
                } else {
                    ("404 Not Found", "{}".to_string())
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    payload.len(),
                    payload
                );
                let _ = writer.write_all(response.as_bytes()).await;
            });
        }
    });

    (port, task)
}

fn auth_code_config() -> OauthConfig {
    OauthConfig {
        grant_type: GrantType::AuthorizationCode,
        client_id: None,
        client_secret: None,
        scope: Some("tools:read".into()),
        callback_port: None,
        callback_ports: Some(vec![0]),
    }
}

#[tokio::test]
async fn registration_and_code_exchange_persist_credentials() {
    let (port, _server) = stub_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().to_path_buf());

    let mut provider = OAuthProvider::new(
        "x",
        format!("http://127.0.0.1:{}/mcp", port),
        auth_code_config(),
        store.clone(),
    );

    provider.prestart_listener().await.unwrap();
    assert_eq!(provider.state(), FlowState::ListenerReady);
    let redirect = provider.redirect_url().unwrap();
    assert!(redirect.starts_with("http://localhost:"));

    let client = provider.resolve_client().await.unwrap();
    assert_eq!(client.client_id, "dyn-client");
    let persisted = store.load_client("x").unwrap();
    assert_eq!(persisted.redirect_uris, vec![redirect.clone()]);

    store.save_verifier("x", "verifier-123").unwrap();
    let tokens = provider.exchange_code(&client, "abc", &redirect).await.unwrap();
    assert_eq!(tokens.access_token, "at-xyz");
    assert_eq!(provider.state(), FlowState::TokensSaved);

    let stored = store.load_tokens("x").unwrap();
    assert_eq!(stored.access_token, "at-xyz");
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
    assert!(stored.expires_at.is_some());

    // The verifier is single-use.
    assert!(store.load_verifier("x").is_none());
}

#[tokio::test]
async fn non_interactive_flow_captures_the_url() {
    let (port, _server) = stub_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().to_path_buf());

    let mut provider = OAuthProvider::new(
        "x",
        format!("http://127.0.0.1:{}/mcp", port),
        auth_code_config(),
        store,
    )
    .non_interactive();

    let err = provider.run_authorization_flow().await.unwrap_err();
    let OAuthError::AuthRequired { url } = err else {
        panic!("expected AuthRequired, got {:?}", err);
    };
    assert!(url.contains("response_type=code"));
    assert!(url.contains("code_challenge="));
    assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A"));
    assert_eq!(provider.captured_url(), Some(url.as_str()));
}

#[tokio::test]
async fn client_credentials_tokens_are_minted_without_a_listener() {
    let (port, _server) = stub_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().to_path_buf());

    let config = OauthConfig {
        grant_type: GrantType::ClientCredentials,
        client_id: Some("svc".into()),
        client_secret: Some("secret".into()),
        scope: Some("tools:call".into()),
        callback_port: None,
        callback_ports: None,
    };
    let mut provider = OAuthProvider::new(
        "cc",
        format!("http://127.0.0.1:{}/mcp", port),
        config,
        store.clone(),
    );

    assert!(provider.redirect_url().is_none());
    let tokens = provider.client_credentials_tokens().await.unwrap();
    assert_eq!(tokens.access_token, "at-xyz");
    assert!(store.load_tokens("cc").is_some());
}

#[tokio::test]
async fn refresh_keeps_the_old_refresh_token_when_omitted() {
    let (port, _server) = stub_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().to_path_buf());

    store
        .save_tokens(
            "x",
            &StoredTokens {
                access_token: "stale".into(),
                token_type: "Bearer".into(),
                refresh_token: Some("rt-old".into()),
                expires_at: Some(1),
            },
        )
        .unwrap();

    let config = OauthConfig {
        client_id: Some("static".into()),
        ..auth_code_config()
    };
    let mut provider = OAuthProvider::new(
        "x",
        format!("http://127.0.0.1:{}/mcp", port),
        config,
        store.clone(),
    );

    let tokens = provider.refresh_tokens("rt-old").await.unwrap();
    assert_eq!(tokens.access_token, "at-xyz");
    // The stub returns rt-1, so the stored record carries it.
    assert_eq!(store.load_tokens("x").unwrap().refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn privileged_port_falls_back_to_an_os_assigned_one() {
    // callbackPorts = [80, 0]: unless the suite runs as root, 80 is not
    // bindable and the OS-assigned fallback must win.
    let listener = CallbackListener::bind(&[80, 0]).await.unwrap();
    let port = listener.port();
    assert_ne!(port, 0);
    listener.cleanup();
}

#[tokio::test]
async fn callback_timeout_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let _store = CredentialStore::new(dir.path().to_path_buf());
    let listener = CallbackListener::bind(&[0]).await.unwrap();
    let err = listener.wait(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, OAuthError::Timeout));
}
