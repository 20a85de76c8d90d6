//! Localhost OAuth callback listener
//!
//! Bound before the authorization URL is built so the redirect URI can
//! carry the port that actually succeeded. Serves `/callback` until a
//! terminal outcome (code, error, or timeout), answering `/favicon.ico`
//! and strays quietly along the way.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::OAuthError;

/// Terminal result of one callback wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// `/callback?code=...` arrived.
    Code { code: String, state: Option<String> },
    /// `/callback?error=...` arrived.
    Error(String),
}

/// A bound callback listener owned by one OAuth flow.
pub struct CallbackListener {
    port: u16,
    task: JoinHandle<()>,
    rx: oneshot::Receiver<CallbackOutcome>,
}

impl CallbackListener {
    /// Bind the first port from `ports` that succeeds (`0` lets the OS
    /// choose). The accept loop starts immediately.
    pub async fn bind(ports: &[u16]) -> Result<Self, OAuthError> {
        for &port in ports {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    let bound = listener
                        .local_addr()
                        .map_err(|e| OAuthError::Config(e.to_string()))?
                        .port();
                    tracing::debug!("callback listener bound on port {}", bound);
                    let (tx, rx) = oneshot::channel();
                    let task = tokio::spawn(accept_loop(listener, tx));
                    return Ok(Self { port: bound, task, rx });
                }
                Err(e) => {
                    tracing::debug!("callback port {} unavailable: {}", port, e);
                }
            }
        }
        Err(OAuthError::Config(format!(
            "no callback port could be bound (tried {:?})",
            ports
        )))
    }

    /// The effective port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the terminal outcome, cleaning up the listener on
    /// resolve, reject, or timeout.
    pub async fn wait(self, timeout: Duration) -> Result<CallbackOutcome, OAuthError> {
        let result = tokio::time::timeout(timeout, self.rx).await;
        self.task.abort();
        match result {
            Err(_) => Err(OAuthError::Timeout),
            Ok(Err(_)) => Err(OAuthError::Flow("callback listener closed unexpectedly".into())),
            Ok(Ok(outcome)) => Ok(outcome),
        }
    }

    /// Tear the listener down without waiting.
    pub fn cleanup(self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: oneshot::Sender<CallbackOutcome>) {
    let mut tx = Some(tx);
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        match serve_connection(stream).await {
            Ok(Some(outcome)) => {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(outcome);
                }
                return;
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("callback connection error: {}", e),
        }
    }
}

/// Handle one HTTP connection; `Some` when the flow is terminal.
async fn serve_connection(stream: TcpStream) -> std::io::Result<Option<CallbackOutcome>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    let mut stream = reader.into_inner();

    let (route, query) = match path.split_once('?') {
        Some((r, q)) => (r, Some(q)),
        None => (path.as_str(), None),
    };

    match route {
        "/callback" => {
            let params = query.map(parse_query).unwrap_or_default();
            let get = |key: &str| {
                params
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            };
            if let Some(code) = get("code") {
                respond(
                    &mut stream,
                    "200 OK",
                    "<html><body><h2>Authorization complete</h2>\
                     <p>You can close this tab and return to the terminal.</p></body></html>",
                )
                .await?;
                Ok(Some(CallbackOutcome::Code { code, state: get("state") }))
            } else if let Some(error) = get("error") {
                let description = get("error_description").unwrap_or_default();
                respond(
                    &mut stream,
                    "400 Bad Request",
                    "<html><body><h2>Authorization failed</h2>\
                     <p>The authorization server reported an error. \
                     Check the terminal for details.</p></body></html>",
                )
                .await?;
                let message = if description.is_empty() {
                    error
                } else {
                    format!("{}: {}", error, description)
                };
                Ok(Some(CallbackOutcome::Error(message)))
            } else {
                respond(&mut stream, "400 Bad Request", "missing code or error parameter").await?;
                Ok(None)
            }
        }
        "/favicon.ico" => {
            respond(&mut stream, "404 Not Found", "").await?;
            Ok(None)
        }
        _ => {
            respond(&mut stream, "404 Not Found", "not found").await?;
            Ok(None)
        }
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            (decode(k), decode(v))
        })
        .collect()
}
