//! Command-line surface.

pub mod args;

pub use args::{parse_args, Invocation, Parsed, ParseResult};
