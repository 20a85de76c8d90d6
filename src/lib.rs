//! mcpx: a command-line MCP client
//!
//! Discovers MCP servers from `mcpx.json`, keeps per-server connection
//! daemons warm between invocations, speaks OAuth 2.0 to HTTP servers,
//! and fans list/search operations out across all servers with bounded
//! concurrency. Built to be driven by humans and by agents that need
//! deterministic, machine-recoverable errors.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod oauth;
pub mod output;
pub mod settings;
