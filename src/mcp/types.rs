//! Shared MCP-facing types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool offered by one server. The schema is passed through opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

impl McpTool {
    /// First line of the description, for one-line listings.
    pub fn summary(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("")
    }
}

/// Convert an rmcp tool descriptor.
pub fn tool_from_rmcp(server: &str, tool: rmcp::model::Tool) -> McpTool {
    McpTool {
        server: server.to_string(),
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: Some(serde_json::to_value(&tool.input_schema).unwrap_or_default()),
    }
}
