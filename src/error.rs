//! User-facing error taxonomy
//!
//! Every error that reaches the user is a [`CliError`] with a stable kind
//! tag, an optional details block, and an optional recovery suggestion.
//! Rendering happens in exactly one place (`render`) so agents scripting
//! the CLI can parse the output deterministically.

use std::fmt;

/// Stable error kinds. The tag string is part of the CLI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigNotFound,
    ConfigInvalidJson,
    ConfigValidationFailed,
    MissingEnvVar,
    ServerNotFound,
    ServerConnectionFailed,
    ToolNotFound,
    ToolDisabled,
    ToolExecutionFailed,
    AmbiguousCommand,
    UnknownSubcommand,
    MissingArgument,
    TooManyArguments,
    UnknownOption,
    InvalidTarget,
    InvalidJsonArguments,
    OauthConfigError,
    OauthFlowError,
    AuthRequired,
}

impl ErrorKind {
    /// The bracketed tag rendered to the user.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorKind::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorKind::ConfigInvalidJson => "CONFIG_INVALID_JSON",
            ErrorKind::ConfigValidationFailed => "CONFIG_VALIDATION_FAILED",
            ErrorKind::MissingEnvVar => "MISSING_ENV_VAR",
            ErrorKind::ServerNotFound => "SERVER_NOT_FOUND",
            ErrorKind::ServerConnectionFailed => "SERVER_CONNECTION_FAILED",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::ToolDisabled => "TOOL_DISABLED",
            ErrorKind::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            ErrorKind::AmbiguousCommand => "AMBIGUOUS_COMMAND",
            ErrorKind::UnknownSubcommand => "UNKNOWN_SUBCOMMAND",
            ErrorKind::MissingArgument => "MISSING_ARGUMENT",
            ErrorKind::TooManyArguments => "TOO_MANY_ARGUMENTS",
            ErrorKind::UnknownOption => "UNKNOWN_OPTION",
            ErrorKind::InvalidTarget => "INVALID_TARGET",
            ErrorKind::InvalidJsonArguments => "INVALID_JSON_ARGUMENTS",
            ErrorKind::OauthConfigError => "OAUTH_CONFIG_ERROR",
            ErrorKind::OauthFlowError => "OAUTH_FLOW_ERROR",
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
        }
    }

    /// Process exit code for this kind.
    ///
    /// 0 success, 1 client error, 2 server/tool error, 3 network error,
    /// 4 authentication error. Signals (130/143) are handled in main.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::ConfigNotFound
            | ErrorKind::ConfigInvalidJson
            | ErrorKind::ConfigValidationFailed
            | ErrorKind::MissingEnvVar
            | ErrorKind::ServerNotFound
            | ErrorKind::ToolNotFound
            | ErrorKind::ToolDisabled
            | ErrorKind::AmbiguousCommand
            | ErrorKind::UnknownSubcommand
            | ErrorKind::MissingArgument
            | ErrorKind::TooManyArguments
            | ErrorKind::UnknownOption
            | ErrorKind::InvalidTarget
            | ErrorKind::InvalidJsonArguments => 1,
            ErrorKind::ToolExecutionFailed => 2,
            ErrorKind::ServerConnectionFailed => 3,
            ErrorKind::OauthConfigError | ErrorKind::OauthFlowError | ErrorKind::AuthRequired => 4,
        }
    }
}

/// A user-facing error.
#[derive(Debug)]
pub struct CliError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
    pub suggestion: Option<String>,
}

impl CliError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            suggestion: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Write the canonical error block to the error channel.
    ///
    /// Shape: `Error [<TYPE>]: <message>` followed by indented `Details:`
    /// and `Suggestion:` lines when present.
    pub fn render(&self) {
        eprintln!("Error [{}]: {}", self.kind.tag(), self.message);
        if let Some(details) = &self.details {
            eprintln!("  Details: {}", details);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("  Suggestion: {}", suggestion);
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error [{}]: {}", self.kind.tag(), self.message)
    }
}

impl std::error::Error for CliError {}

pub type CliResult<T> = Result<T, CliError>;

/// Suggestion text for common remote tool-call failure sub-causes.
///
/// The remote error message is scanned for known shapes; `None` when the
/// failure does not match anything actionable.
pub fn suggest_tool_failure(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if lower.contains("validation") || lower.contains("invalid argument")
        || lower.contains("invalid params")
    {
        Some("check the tool's input schema with `mcpx info <server> <tool>` and fix the JSON arguments")
    } else if lower.contains("required") {
        Some("a required argument is missing; `mcpx info <server> <tool>` shows the schema")
    } else if lower.contains("permission") || lower.contains("denied")
        || lower.contains("forbidden")
    {
        Some("the server refused access; check its credentials or allow-list")
    } else if lower.contains("not found") || lower.contains("unknown tool") {
        Some("list the server's tools with `mcpx info <server>`")
    } else {
        None
    }
}
