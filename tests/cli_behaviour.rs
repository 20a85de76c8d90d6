//! Handler-level behaviour: refusals that must happen before any server
//! contact, and error taxonomy mapping.

use std::path::Path;
use std::time::Duration;

use mcpx::config::Catalogue;
use mcpx::credentials::CredentialStore;
use mcpx::error::ErrorKind;
use mcpx::handlers::{run_call, run_info, Context};
use mcpx::settings::Settings;

/// A context whose only server runs a binary that cannot exist; any code
/// path that actually connects will fail loudly with a connection error,
/// which the no-contact assertions rely on.
fn context(config_json: &str) -> (tempfile::TempDir, Context) {
    let catalogue = Catalogue::parse(config_json, Path::new("test-mcpx.json"), true).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("creds"));

    let settings = Settings {
        no_daemon: true,
        request_timeout: Duration::from_secs(10),
        max_retries: 1,
        ..Settings::default()
    };

    let ctx = Context {
        catalogue,
        store,
        settings,
        with_descriptions: false,
    };
    (dir, ctx)
}

#[tokio::test]
async fn disabled_tool_is_refused_without_contact() {
    // Scenario: disabledTools ["delete_*"], call delete_file.
    let (_dir, ctx) = context(
        r#"{"mcpServers": {"fs": {
            "command": "/nonexistent/mcpx-test-server",
            "disabledTools": ["delete_*"]
        }}}"#,
    );

    let err = run_call(&ctx, "fs", "delete_file", Some("{}"))
        .await
        .unwrap_err();
    // A connection attempt would have produced SERVER_CONNECTION_FAILED;
    // TOOL_DISABLED proves the server was never contacted.
    assert_eq!(err.kind, ErrorKind::ToolDisabled);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn allow_list_refusal_is_also_local() {
    let (_dir, ctx) = context(
        r#"{"mcpServers": {"fs": {
            "command": "/nonexistent/mcpx-test-server",
            "allowedTools": ["read_*"]
        }}}"#,
    );

    let err = run_call(&ctx, "fs", "write_file", Some("{}"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolDisabled);
}

#[tokio::test]
async fn unknown_server_lists_the_available_ones() {
    let (_dir, ctx) = context(r#"{"mcpServers": {"fs": {"command": "/bin/true"}}}"#);

    let err = run_info(&ctx, "nope", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerNotFound);
    assert_eq!(err.exit_code(), 1);
    assert!(err.details.unwrap().contains("fs"));
}

#[tokio::test]
async fn bad_json_arguments_fail_before_connecting() {
    let (_dir, ctx) = context(r#"{"mcpServers": {"fs": {"command": "/nonexistent/mcpx-test-server"}}}"#);

    let err = run_call(&ctx, "fs", "read_file", Some("{not json"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidJsonArguments);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let (_dir, ctx) = context(r#"{"mcpServers": {"fs": {"command": "/nonexistent/mcpx-test-server"}}}"#);

    let err = run_call(&ctx, "fs", "read_file", Some("{}"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServerConnectionFailed);
    assert_eq!(err.exit_code(), 3);
}
