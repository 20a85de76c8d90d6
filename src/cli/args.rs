//! CLI argument definitions and dispatch resolution
//!
//! clap handles the recognised surface; unknown first tokens are captured
//! as an external subcommand and mapped to the argument-error taxonomy:
//! known aliases suggest the intended subcommand, server-shaped tokens
//! produce an ambiguity error offering both readings.

use std::path::PathBuf;

use clap::error::{ContextKind, ErrorKind as ClapErrorKind};
use clap::{ArgAction, Parser, Subcommand};

use crate::error::{CliError, CliResult, ErrorKind};

#[derive(Parser)]
#[command(
    name = "mcpx",
    about = "Command-line MCP client: list, inspect, and call tools on MCP servers",
    disable_version_flag = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Include tool descriptions in listings
    #[arg(short = 'd', long = "with-descriptions", global = true, action = ArgAction::SetTrue)]
    pub with_descriptions: bool,

    /// Print version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    pub version: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show detail for a server, or for one of its tools
    Info {
        /// Server name (or server/tool)
        target: String,
        /// Tool name
        tool: Option<String>,
    },
    /// Search tool names across all servers
    Grep {
        /// Glob pattern (bare text matches as a substring)
        pattern: String,
    },
    /// Invoke a tool: call <server> <tool> [<json>] (JSON defaults to stdin)
    Call {
        /// <server> <tool> [<json>], or <server>/<tool> [<json>]
        #[arg(required = true)]
        args: Vec<String>,
    },
    /// Internal: per-server daemon worker
    #[command(hide = true)]
    Daemon {
        server: String,
    },
    #[command(external_subcommand)]
    External(Vec<String>),
}

/// A fully resolved invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    List,
    Info { server: String, tool: Option<String> },
    Grep { pattern: String },
    Call { server: String, tool: String, json: Option<String> },
    Daemon { server: String },
    Version,
}

#[derive(Debug)]
pub struct Parsed {
    pub invocation: Invocation,
    pub config: Option<PathBuf>,
    pub with_descriptions: bool,
}

/// Parse succeeded, or the user asked for help text.
#[derive(Debug)]
pub enum ParseResult {
    Run(Parsed),
    Help(String),
}

/// Parse an argv (including the program name).
pub fn parse_args<I>(argv: I) -> CliResult<ParseResult>
where
    I: IntoIterator<Item = String>,
{
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ClapErrorKind::DisplayHelp
                    | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            return Ok(ParseResult::Help(e.to_string()));
        }
        Err(e) => return Err(translate_clap_error(e)),
    };

    if cli.version {
        return Ok(ParseResult::Run(Parsed {
            invocation: Invocation::Version,
            config: cli.config,
            with_descriptions: cli.with_descriptions,
        }));
    }

    let invocation = match cli.command {
        None => Invocation::List,
        Some(Commands::Info { target, tool }) => resolve_info(target, tool)?,
        Some(Commands::Grep { pattern }) => Invocation::Grep { pattern },
        Some(Commands::Call { args }) => resolve_call(args)?,
        Some(Commands::Daemon { server }) => Invocation::Daemon { server },
        Some(Commands::External(tokens)) => resolve_external(tokens)?,
    };

    Ok(ParseResult::Run(Parsed {
        invocation,
        config: cli.config,
        with_descriptions: cli.with_descriptions,
    }))
}

fn translate_clap_error(error: clap::Error) -> CliError {
    match error.kind() {
        ClapErrorKind::UnknownArgument => {
            let offending = error
                .get(ContextKind::InvalidArg)
                .map(|v| v.to_string())
                .unwrap_or_default();
            if offending.starts_with('-') {
                CliError::new(
                    ErrorKind::UnknownOption,
                    format!("unknown option {}", offending),
                )
                .with_suggestion("see `mcpx --help` for the supported flags")
            } else {
                CliError::new(
                    ErrorKind::TooManyArguments,
                    format!("unexpected argument '{}'", offending),
                )
                .with_suggestion("see `mcpx --help` for each subcommand's arguments")
            }
        }
        ClapErrorKind::MissingRequiredArgument => CliError::new(
            ErrorKind::MissingArgument,
            "a required argument is missing",
        )
        .with_details(error.to_string().lines().next().unwrap_or("").to_string())
        .with_suggestion("see `mcpx --help` for each subcommand's arguments"),
        _ => CliError::new(ErrorKind::UnknownOption, "cannot parse arguments")
            .with_details(error.to_string().lines().next().unwrap_or("").to_string())
            .with_suggestion("see `mcpx --help`"),
    }
}

fn resolve_info(target: String, tool: Option<String>) -> CliResult<Invocation> {
    let (server, from_target) = split_target(&target)?;
    match (from_target, tool) {
        (Some(_), Some(_)) => Err(CliError::new(
            ErrorKind::TooManyArguments,
            "tool given both in the target and as an argument",
        )
        .with_suggestion("use `info <server> <tool>` or `info <server>/<tool>`, not both")),
        (Some(t), None) => Ok(Invocation::Info { server, tool: Some(t) }),
        (None, tool) => Ok(Invocation::Info { server, tool }),
    }
}

fn resolve_call(args: Vec<String>) -> CliResult<Invocation> {
    let (server, tool_from_target) = split_target(&args[0])?;

    let (tool, json, extra) = match tool_from_target {
        Some(tool) => (tool, args.get(1).cloned(), args.len() > 2),
        None => {
            let Some(tool) = args.get(1).cloned() else {
                return Err(CliError::new(
                    ErrorKind::MissingArgument,
                    "call needs a tool name",
                )
                .with_suggestion(format!(
                    "try `mcpx call {} <tool> '<json>'`; `mcpx info {}` lists its tools",
                    server, server
                )));
            };
            (tool, args.get(2).cloned(), args.len() > 3)
        }
    };

    if extra {
        return Err(CliError::new(
            ErrorKind::TooManyArguments,
            "call takes at most a server, a tool, and one JSON argument",
        )
        .with_suggestion("quote the JSON so the shell passes it as a single argument"));
    }

    Ok(Invocation::Call { server, tool, json })
}

/// Split `server` or `server/tool`; reject malformed targets.
fn split_target(target: &str) -> CliResult<(String, Option<String>)> {
    match target.split_once('/') {
        None => Ok((target.to_string(), None)),
        Some((server, tool)) => {
            if server.is_empty() || tool.is_empty() || tool.contains('/') {
                return Err(CliError::new(
                    ErrorKind::InvalidTarget,
                    format!("'{}' is not a valid <server>/<tool> target", target),
                )
                .with_suggestion("use exactly one '/' between server and tool"));
            }
            Ok((server.to_string(), Some(tool.to_string())))
        }
    }
}

/// Aliases users reach for, mapped to the intended subcommand. `list`
/// maps to the bare default invocation.
const ALIASES: &[(&str, &str)] = &[
    ("run", "call"),
    ("exec", "call"),
    ("invoke", "call"),
    ("tool", "call"),
    ("ls", "list"),
    ("list", "list"),
    ("servers", "list"),
    ("search", "grep"),
    ("find", "grep"),
    ("query", "grep"),
    ("show", "info"),
    ("describe", "info"),
    ("inspect", "info"),
];

fn resolve_external(tokens: Vec<String>) -> CliResult<Invocation> {
    let first = tokens.first().cloned().unwrap_or_default();
    let rest: Vec<String> = tokens.iter().skip(1).cloned().collect();

    if let Some((_, canonical)) = ALIASES.iter().find(|(alias, _)| *alias == first) {
        let suggestion = match *canonical {
            "list" => "run `mcpx` with no subcommand to list servers".to_string(),
            other => {
                if rest.is_empty() {
                    format!("did you mean `{}`?", other)
                } else {
                    format!(
                        "did you mean `{}`? try: mcpx {} {}",
                        other,
                        other,
                        quote_args(&rest)
                    )
                }
            }
        };
        return Err(CliError::new(
            ErrorKind::UnknownSubcommand,
            format!("unknown subcommand \"{}\"", first),
        )
        .with_suggestion(suggestion));
    }

    // Not a known alias: read it as a server reference and offer both
    // plausible commands.
    let all = quote_args(&tokens);
    let suggestion = if tokens.len() >= 2 {
        format!(
            "run `mcpx call {}` to invoke the tool, or `mcpx info {}` to inspect it",
            all,
            quote_args(&tokens[..2.min(tokens.len())])
        )
    } else {
        format!(
            "run `mcpx info {}` for server detail, or `mcpx` alone to list servers",
            first
        )
    };
    Err(CliError::new(
        ErrorKind::AmbiguousCommand,
        format!("\"{}\" is not a subcommand", first),
    )
    .with_details(format!("arguments: {}", all))
    .with_suggestion(suggestion))
}

/// Shell-quote arguments that need it (JSON mostly).
fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c)) {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', "'\\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
