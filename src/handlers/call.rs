//! `call <server> <tool> [<json>]`: invoke one tool.
//!
//! JSON arguments default to standard input when omitted, so the command
//! composes in shell pipelines. The raw MCP result goes to stdout.

use std::io::Read;

use serde_json::Value;

use crate::error::{CliError, CliResult, ErrorKind};
use crate::mcp::session;
use crate::output;

use super::Context;

pub async fn run_call(
    ctx: &Context,
    server: &str,
    tool: &str,
    json: Option<&str>,
) -> CliResult<()> {
    let arguments = resolve_arguments(json)?;

    let config = ctx.catalogue.require(server)?;

    // Refuse disabled tools before any server contact: no daemon spawn,
    // no subprocess, no network.
    if !crate::mcp::is_tool_allowed(tool, config) {
        return Err(CliError::new(
            ErrorKind::ToolDisabled,
            format!("tool '{}' is disabled for server '{}'", tool, server),
        )
        .with_details("the server was not contacted".to_string())
        .with_suggestion(format!(
            "adjust allowedTools/disabledTools for '{}' in mcpx.json",
            server
        )));
    }

    let mut session = session::connect(
        server,
        config,
        ctx.catalogue.path(),
        &ctx.store,
        &ctx.settings,
        true,
    )
    .await?;

    // The global deadline bounds the whole call, daemon or direct.
    let deadline = ctx.settings.request_timeout;
    let result = match tokio::time::timeout(deadline, session.call_tool(tool, arguments)).await {
        Ok(result) => result,
        Err(_) => Err(CliError::new(
            ErrorKind::ServerConnectionFailed,
            format!("'{}/{}' exceeded the {}s deadline", server, tool, deadline.as_secs()),
        )
        .with_suggestion("raise MCPX_TIMEOUT (seconds) for long-running tools")),
    };
    session.close().await;
    let result = result?;

    let rendered = output::render_call_result(&result);
    if !rendered.is_empty() {
        println!("{}", rendered);
    }

    if output::result_is_error(&result) {
        return Err(CliError::new(
            ErrorKind::ToolExecutionFailed,
            format!("'{}/{}' reported an error", server, tool),
        )
        .with_details("the error content was written to standard output".to_string()));
    }
    Ok(())
}

/// Explicit argument, else stdin; empty input means no arguments.
fn resolve_arguments(json: Option<&str>) -> CliResult<Option<Value>> {
    let raw = match json {
        Some(s) => s.to_string(),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).map_err(|e| {
                CliError::new(ErrorKind::InvalidJsonArguments, "cannot read arguments from stdin")
                    .with_details(e.to_string())
            })?;
            buffer
        }
    };

    parse_arguments(&raw)
}

fn parse_arguments(raw: &str) -> CliResult<Option<Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        CliError::new(ErrorKind::InvalidJsonArguments, "tool arguments are not valid JSON")
            .with_details(e.to_string())
            .with_suggestion("pass a JSON object, e.g. '{\"path\": \"/tmp/x\"}'")
    })?;

    match value {
        Value::Object(_) => Ok(Some(value)),
        Value::Null => Ok(None),
        other => Err(CliError::new(
            ErrorKind::InvalidJsonArguments,
            "tool arguments must be a JSON object",
        )
        .with_details(format!("got: {}", other))
        .with_suggestion("wrap the value in an object matching the tool's input schema")),
    }
}
