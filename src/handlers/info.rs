//! `info <server> [<tool>]`: server or tool detail.

use crate::error::{CliError, CliResult, ErrorKind};
use crate::mcp::session;
use crate::output;

use super::Context;

pub async fn run_info(ctx: &Context, server: &str, tool: Option<&str>) -> CliResult<()> {
    let config = ctx.catalogue.require(server)?;
    let mut session = session::connect(
        server,
        config,
        ctx.catalogue.path(),
        &ctx.store,
        &ctx.settings,
        true,
    )
    .await?;

    let result = render(ctx, &mut session, server, tool).await;
    session.close().await;
    let rendered = result?;
    println!("{}", rendered);
    Ok(())
}

async fn render(
    ctx: &Context,
    session: &mut session::ServerSession,
    server: &str,
    tool: Option<&str>,
) -> CliResult<String> {
    let tools = session.list_tools().await?;

    match tool {
        None => {
            let instructions = session.instructions().await.unwrap_or(None);
            Ok(output::render_server_info(
                server,
                instructions.as_deref(),
                &tools,
                ctx.with_descriptions,
            ))
        }
        Some(name) => {
            let found = tools
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    let known: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                    CliError::new(
                        ErrorKind::ToolNotFound,
                        format!("server '{}' has no tool '{}'", server, name),
                    )
                    .with_details(if known.is_empty() {
                        "the server exposes no tools (after filtering)".to_string()
                    } else {
                        format!("available tools: {}", known.join(", "))
                    })
                })?;
            Ok(output::render_tool_info(found))
        }
    }
}
