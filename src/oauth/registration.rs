//! Authorization-server metadata discovery and dynamic client registration
//!
//! Discovery follows RFC 8414 (`/.well-known/oauth-authorization-server`)
//! with a fallback to the conventional `/authorize`, `/token`, `/register`
//! paths when the server publishes no metadata document. Registration is
//! RFC 7591.

use serde::{Deserialize, Serialize};

use super::OAuthError;
use crate::credentials::StoredClient;

/// Endpoints of the authorization server backing an MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
}

impl AuthServerMetadata {
    /// Conventional endpoints rooted at the server origin.
    pub fn fallback(origin: &str) -> Self {
        Self {
            authorization_endpoint: format!("{}/authorize", origin),
            token_endpoint: format!("{}/token", origin),
            registration_endpoint: Some(format!("{}/register", origin)),
        }
    }
}

/// Client metadata advertised during registration.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadata {
    pub client_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// `scheme://host[:port]` of an absolute URL.
pub fn origin_of(url: &str) -> Result<String, OAuthError> {
    let Some(scheme_end) = url.find("://") else {
        return Err(OAuthError::Config(format!("'{}' is not an absolute URL", url)));
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest
        .find(['/', '?', '#'])
        .unwrap_or(rest.len());
    if authority_end == 0 {
        return Err(OAuthError::Config(format!("'{}' has no host", url)));
    }
    Ok(format!("{}{}", &url[..scheme_end + 3], &rest[..authority_end]))
}

/// Fetch authorization-server metadata for the MCP server at `server_url`.
pub async fn discover_metadata(
    http: &reqwest::Client,
    server_url: &str,
) -> Result<AuthServerMetadata, OAuthError> {
    let origin = origin_of(server_url)?;
    let well_known = format!("{}/.well-known/oauth-authorization-server", origin);

    match http.get(&well_known).send().await {
        Ok(response) if response.status().is_success() => {
            match response.json::<AuthServerMetadata>().await {
                Ok(metadata) => {
                    tracing::debug!("authorization metadata discovered at {}", well_known);
                    return Ok(metadata);
                }
                Err(e) => {
                    tracing::debug!("metadata document unparseable ({}), using defaults", e);
                }
            }
        }
        Ok(response) => {
            tracing::debug!(
                "metadata discovery returned {}, using default endpoints",
                response.status()
            );
        }
        Err(e) => {
            tracing::debug!("metadata discovery failed ({}), using default endpoints", e);
        }
    }

    Ok(AuthServerMetadata::fallback(&origin))
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Register a new OAuth client and return the stored form.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    metadata: &ClientMetadata,
) -> Result<StoredClient, OAuthError> {
    let response = http
        .post(registration_endpoint)
        .json(metadata)
        .send()
        .await
        .map_err(|e| OAuthError::Network(format!("client registration failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::Backend(format!(
            "client registration rejected ({}): {}",
            status, body
        )));
    }

    let registered: RegistrationResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::Backend(format!("bad registration response: {}", e)))?;

    Ok(StoredClient {
        client_id: registered.client_id,
        client_secret: registered.client_secret,
        redirect_uris: metadata.redirect_uris.clone(),
    })
}
