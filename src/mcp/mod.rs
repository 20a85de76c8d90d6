//! MCP connection plane: transports, retry, sessions, fan-out.

pub mod fanout;
pub mod filter;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

pub use fanout::{fan_out, FanoutResult};
pub use filter::{glob_match, is_tool_allowed};
pub use session::{connect, ServerSession};
pub use types::McpTool;
