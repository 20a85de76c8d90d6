//! Per-server connection daemons
//!
//! A lazily spawned worker process keeps one MCP session warm per server,
//! amortising session startup across CLI invocations. The client side
//! verifies freshness via a config hash and falls back to a direct
//! connection on any failure.

pub mod client;
pub mod paths;
pub mod protocol;
pub mod worker;

pub use client::{ensure_daemon, DaemonHandle};
pub use paths::{config_hash, sweep, DaemonDescriptor};
