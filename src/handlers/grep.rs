//! `grep <pattern>`: search tool names across all servers.

use crate::error::CliResult;
use crate::mcp::{glob_match, McpTool};
use crate::output;

use super::{fetch_all_tools, Context};

pub async fn run_grep(ctx: &Context, pattern: &str) -> CliResult<()> {
    let results = fetch_all_tools(ctx).await;

    let mut matches: Vec<McpTool> = Vec::new();
    for entry in &results {
        match &entry.result {
            Ok(tools) => {
                matches.extend(
                    tools
                        .iter()
                        .filter(|tool| name_matches(pattern, &tool.name))
                        .cloned(),
                );
            }
            Err(message) => {
                eprintln!("mcpx: warning: '{}' unavailable: {}", entry.server, message);
            }
        }
    }

    if matches.is_empty() {
        eprintln!("no tools match '{}'", pattern);
        return Ok(());
    }

    println!("{}", output::render_grep_matches(&matches, ctx.with_descriptions));
    Ok(())
}

/// Patterns with metacharacters use glob semantics; bare text matches as
/// a case-insensitive substring.
fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern.contains('*') || pattern.contains('?') {
        glob_match(pattern, name)
    } else {
        name.to_lowercase().contains(&pattern.to_lowercase())
    }
}
