//! Plain-text formatters
//!
//! Everything here renders to strings destined for stdout; diagnostics and
//! errors never pass through this module.

use serde_json::Value;

use crate::mcp::{FanoutResult, McpTool};

/// The default listing: servers in input order, tools grouped underneath,
/// failures rendered inline so one dead server never hides the rest.
pub fn render_server_list(
    results: &[FanoutResult<Vec<McpTool>>],
    with_descriptions: bool,
) -> String {
    let mut out = String::new();
    for entry in results {
        match &entry.result {
            Ok(tools) => {
                out.push_str(&format!("{} ({} tools)\n", entry.server, tools.len()));
                for tool in tools {
                    if with_descriptions && !tool.summary().is_empty() {
                        out.push_str(&format!("  {} - {}\n", tool.name, tool.summary()));
                    } else {
                        out.push_str(&format!("  {}\n", tool.name));
                    }
                }
            }
            Err(message) => {
                out.push_str(&format!("{} (unavailable: {})\n", entry.server, message));
            }
        }
        out.push('\n');
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Server detail: instructions (when advertised) and the filtered tools.
pub fn render_server_info(
    server: &str,
    instructions: Option<&str>,
    tools: &[McpTool],
    with_descriptions: bool,
) -> String {
    let mut out = format!("server: {}\ntools: {}\n", server, tools.len());
    if let Some(instructions) = instructions {
        let trimmed = instructions.trim();
        if !trimmed.is_empty() {
            out.push_str(&format!("\ninstructions:\n{}\n", indent(trimmed)));
        }
    }
    if !tools.is_empty() {
        out.push('\n');
        for tool in tools {
            if with_descriptions && !tool.summary().is_empty() {
                out.push_str(&format!("  {} - {}\n", tool.name, tool.summary()));
            } else {
                out.push_str(&format!("  {}\n", tool.name));
            }
        }
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Tool detail: name, description, and the input schema pretty-printed.
pub fn render_tool_info(tool: &McpTool) -> String {
    let mut out = format!("tool: {}/{}\n", tool.server, tool.name);
    if let Some(description) = tool.description.as_deref() {
        let trimmed = description.trim();
        if !trimmed.is_empty() {
            out.push_str(&format!("\n{}\n", trimmed));
        }
    }
    if let Some(schema) = &tool.input_schema {
        if !schema.is_null() {
            let rendered = serde_json::to_string_pretty(schema)
                .unwrap_or_else(|_| schema.to_string());
            out.push_str(&format!("\ninput schema:\n{}\n", indent(&rendered)));
        }
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Grep output: `server/tool` per match, with optional descriptions.
pub fn render_grep_matches(matches: &[McpTool], with_descriptions: bool) -> String {
    matches
        .iter()
        .map(|tool| {
            if with_descriptions && !tool.summary().is_empty() {
                format!("{}/{} - {}", tool.server, tool.name, tool.summary())
            } else {
                format!("{}/{}", tool.server, tool.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Raw MCP call result: text content verbatim, anything else as JSON.
pub fn render_call_result(result: &Value) -> String {
    let Some(content) = result.get("content").and_then(|c| c.as_array()) else {
        return serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    };

    let mut pieces: Vec<String> = Vec::new();
    for item in content {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                    pieces.push(text.to_string());
                    continue;
                }
                pieces.push(item.to_string());
            }
            _ => pieces.push(
                serde_json::to_string_pretty(item).unwrap_or_else(|_| item.to_string()),
            ),
        }
    }
    pieces.join("\n")
}

/// Whether the raw result reports a tool-level error.
pub fn result_is_error(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str, desc: Option<&str>) -> McpTool {
        McpTool {
            server: server.into(),
            name: name.into(),
            description: desc.map(|d| d.to_string()),
            input_schema: None,
        }
    }

    #[test]
    fn list_preserves_order_and_shows_failures_inline() {
        let results = vec![
            FanoutResult { server: "a".into(), result: Ok(vec![tool("a", "t1", None)]) },
            FanoutResult { server: "b".into(), result: Err("connect refused".into()) },
            FanoutResult { server: "c".into(), result: Ok(vec![]) },
        ];
        let out = render_server_list(&results, false);
        let a = out.find("a (1 tools)").unwrap();
        let b = out.find("b (unavailable: connect refused)").unwrap();
        let c = out.find("c (0 tools)").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn descriptions_only_when_asked() {
        let results = vec![FanoutResult {
            server: "a".into(),
            result: Ok(vec![tool("a", "t1", Some("first line\nsecond"))]),
        }];
        assert!(!render_server_list(&results, false).contains("first line"));
        let with = render_server_list(&results, true);
        assert!(with.contains("t1 - first line"));
        assert!(!with.contains("second"));
    }

    #[test]
    fn call_result_prints_text_verbatim() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "text", "text": "world"}
            ],
            "isError": false
        });
        assert_eq!(render_call_result(&result), "hello\nworld");
        assert!(!result_is_error(&result));
    }

    #[test]
    fn non_text_content_falls_back_to_json() {
        let result = serde_json::json!({
            "content": [{"type": "image", "data": "deadbeef"}]
        });
        assert!(render_call_result(&result).contains("deadbeef"));
    }

    #[test]
    fn error_flag_is_read() {
        let result = serde_json::json!({"content": [], "isError": true});
        assert!(result_is_error(&result));
    }

    #[test]
    fn grep_renders_server_slash_tool() {
        let matches = vec![tool("fs", "read_file", Some("Reads a file"))];
        assert_eq!(render_grep_matches(&matches, false), "fs/read_file");
        assert_eq!(
            render_grep_matches(&matches, true),
            "fs/read_file - Reads a file"
        );
    }
}
