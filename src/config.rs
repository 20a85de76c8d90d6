//! Configuration loading
//!
//! Loads the `mcpx.json` server catalogue: path discovery, structural
//! validation with path-rooted issues, and `${VAR}` substitution over every
//! string leaf. Records are read-only once handed out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CliError, CliResult, ErrorKind};

/// File name searched for in the working directory and home locations.
pub const CONFIG_FILE: &str = "mcpx.json";

/// One server entry from the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

/// Exactly one of the two transports per record; enforced during
/// validation, so the untagged deserialize here cannot be ambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Http(HttpConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OauthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthConfig {
    #[serde(default)]
    pub grant_type: GrantType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Single preferred callback port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,
    /// Explicit fallback list; fully overrides the default order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GrantType {
    #[default]
    #[serde(rename = "authorization_code")]
    AuthorizationCode,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
}

/// The validated, substituted server catalogue.
#[derive(Debug, Clone)]
pub struct Catalogue {
    servers: BTreeMap<String, ServerConfig>,
    path: PathBuf,
}

impl Catalogue {
    /// Load the catalogue, searching the standard locations.
    ///
    /// Search order: explicit path, `MCPX_CONFIG_PATH`, `./mcpx.json`,
    /// `~/.mcpx.json`, `~/.config/mcpx/mcpx.json`. First hit wins.
    pub fn load(explicit: Option<&Path>, strict_env: bool) -> CliResult<Self> {
        let path = find_config_path(explicit)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CliError::new(
                ErrorKind::ConfigNotFound,
                format!("cannot read config file {}", path.display()),
            )
            .with_details(e.to_string())
        })?;
        Self::parse(&content, &path, strict_env)
    }

    /// Parse and validate a config document.
    pub fn parse(content: &str, path: &Path, strict_env: bool) -> CliResult<Self> {
        let document: Value = serde_json::from_str(content).map_err(|e| {
            CliError::new(
                ErrorKind::ConfigInvalidJson,
                format!("{} is not valid JSON", path.display()),
            )
            .with_details(e.to_string())
        })?;

        let issues = validate_document(&document);
        if !issues.is_empty() {
            return Err(CliError::new(
                ErrorKind::ConfigValidationFailed,
                format!("{} failed validation", path.display()),
            )
            .with_details(issues.join("; ")));
        }

        let document = substitute_env(document, strict_env)?;

        // Post-validation deserialize; failures here indicate a check the
        // validator missed, surfaced under the same kind.
        let raw: RawDocument = serde_json::from_value(document).map_err(|e| {
            CliError::new(
                ErrorKind::ConfigValidationFailed,
                format!("{} failed validation", path.display()),
            )
            .with_details(e.to_string())
        })?;

        Ok(Self {
            servers: raw.mcp_servers,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// Look up a server or fail with the available names.
    pub fn require(&self, name: &str) -> CliResult<&ServerConfig> {
        self.servers.get(name).ok_or_else(|| {
            let available = self.server_names();
            let listed = if available.is_empty() {
                "none configured".to_string()
            } else {
                available.join(", ")
            };
            CliError::new(
                ErrorKind::ServerNotFound,
                format!("server '{}' is not in the configuration", name),
            )
            .with_details(format!("available servers: {}", listed))
            .with_suggestion("run `mcpx` with no arguments to list configured servers")
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    mcp_servers: BTreeMap<String, ServerConfig>,
}

/// Resolve the config path or report every location searched.
fn find_config_path(explicit: Option<&Path>) -> CliResult<PathBuf> {
    let mut searched: Vec<PathBuf> = Vec::new();

    if let Some(p) = explicit {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        searched.push(p.to_path_buf());
    }

    if let Ok(p) = std::env::var("MCPX_CONFIG_PATH") {
        let p = PathBuf::from(p);
        if p.exists() {
            return Ok(p);
        }
        searched.push(p);
    }

    let cwd = PathBuf::from(CONFIG_FILE);
    if cwd.exists() {
        return Ok(cwd);
    }
    searched.push(cwd);

    if let Some(home) = dirs::home_dir() {
        let dot = home.join(format!(".{}", CONFIG_FILE));
        if dot.exists() {
            return Ok(dot);
        }
        searched.push(dot);

        let xdg = home.join(".config").join("mcpx").join(CONFIG_FILE);
        if xdg.exists() {
            return Ok(xdg);
        }
        searched.push(xdg);
    }

    let listed: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
    Err(
        CliError::new(ErrorKind::ConfigNotFound, "no configuration file found")
            .with_details(format!("searched: {}", listed.join(", ")))
            .with_suggestion(format!(
                "create {} with an mcpServers section, or pass --config <path>",
                CONFIG_FILE
            )),
    )
}

/// Structural validation: a path-rooted issue list, empty when the
/// document is well-formed.
fn validate_document(document: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    let Some(root) = document.as_object() else {
        return vec!["$: top level must be an object".to_string()];
    };
    let Some(servers) = root.get("mcpServers") else {
        return vec!["$.mcpServers: missing".to_string()];
    };
    let Some(servers) = servers.as_object() else {
        return vec!["$.mcpServers: must be an object".to_string()];
    };

    for (name, record) in servers {
        let at = |field: &str| format!("$.mcpServers.{}.{}", name, field);
        let Some(record) = record.as_object() else {
            issues.push(format!("$.mcpServers.{}: must be an object", name));
            continue;
        };

        let has_command = record.contains_key("command");
        let has_url = record.contains_key("url");
        match (has_command, has_url) {
            (true, true) => {
                issues.push(format!(
                    "$.mcpServers.{}: 'command' and 'url' are mutually exclusive",
                    name
                ));
            }
            (false, false) => {
                issues.push(format!(
                    "$.mcpServers.{}: exactly one of 'command' or 'url' is required",
                    name
                ));
            }
            _ => {}
        }

        if has_command && !record["command"].is_string() {
            issues.push(format!("{}: must be a string", at("command")));
        }
        if let Some(args) = record.get("args") {
            if !is_string_array(args) {
                issues.push(format!("{}: must be an array of strings", at("args")));
            }
        }
        if let Some(env) = record.get("env") {
            if !is_string_map(env) {
                issues.push(format!("{}: must be a string-to-string object", at("env")));
            }
        }
        if let Some(cwd) = record.get("cwd") {
            match cwd.as_str() {
                Some(s) if Path::new(s).is_absolute() => {}
                Some(_) => issues.push(format!("{}: must be an absolute path", at("cwd"))),
                None => issues.push(format!("{}: must be a string", at("cwd"))),
            }
        }

        if has_url {
            match record["url"].as_str() {
                Some(u) if u.starts_with("http://") || u.starts_with("https://") => {}
                Some(_) => issues.push(format!("{}: must be an absolute http(s) URL", at("url"))),
                None => issues.push(format!("{}: must be a string", at("url"))),
            }
            if let Some(headers) = record.get("headers") {
                if !is_string_map(headers) {
                    issues.push(format!(
                        "{}: must be a string-to-string object",
                        at("headers")
                    ));
                }
            }
        }

        for field in ["allowedTools", "disabledTools"] {
            if let Some(list) = record.get(field) {
                if !is_string_array(list) {
                    issues.push(format!("{}: must be an array of strings", at(field)));
                }
            }
        }

        if let Some(oauth) = record.get("oauth") {
            validate_oauth(name, oauth, &mut issues);
            if !has_url {
                issues.push(format!(
                    "$.mcpServers.{}: 'oauth' only applies to http servers",
                    name
                ));
            }
        }
    }

    issues
}

fn validate_oauth(name: &str, oauth: &Value, issues: &mut Vec<String>) {
    let at = |field: &str| format!("$.mcpServers.{}.oauth.{}", name, field);
    let Some(oauth) = oauth.as_object() else {
        issues.push(format!("$.mcpServers.{}.oauth: must be an object", name));
        return;
    };

    let grant = oauth.get("grantType").and_then(|g| g.as_str());
    match grant {
        None | Some("authorization_code") => {}
        Some("client_credentials") => {
            let has_id = oauth.get("clientId").and_then(|v| v.as_str()).is_some();
            let has_secret = oauth.get("clientSecret").and_then(|v| v.as_str()).is_some();
            if !has_id || !has_secret {
                issues.push(format!(
                    "$.mcpServers.{}.oauth: client_credentials requires clientId and clientSecret",
                    name
                ));
            }
        }
        Some(other) => {
            issues.push(format!(
                "{}: '{}' is not a recognised grant (authorization_code, client_credentials)",
                at("grantType"),
                other
            ));
        }
    }

    if let Some(port) = oauth.get("callbackPort") {
        match port.as_u64() {
            Some(p) if (1..=65535).contains(&p) => {}
            _ => issues.push(format!("{}: must be a port in 1-65535", at("callbackPort"))),
        }
    }
    if let Some(ports) = oauth.get("callbackPorts") {
        let ok = ports
            .as_array()
            .map(|a| a.iter().all(|p| p.as_u64().is_some_and(|p| p <= 65535)))
            .unwrap_or(false);
        if !ok {
            issues.push(format!(
                "{}: must be an array of ports (0 lets the OS choose)",
                at("callbackPorts")
            ));
        }
    }
}

fn is_string_array(v: &Value) -> bool {
    v.as_array()
        .map(|a| a.iter().all(Value::is_string))
        .unwrap_or(false)
}

fn is_string_map(v: &Value) -> bool {
    v.as_object()
        .map(|m| m.values().all(Value::is_string))
        .unwrap_or(false)
}

/// Expand `${VAR}` in every string leaf.
///
/// Strict mode aborts with every unset name listed; lax mode substitutes
/// the empty string and notes each miss on stderr.
fn substitute_env(document: Value, strict: bool) -> CliResult<Value> {
    let mut missing: Vec<String> = Vec::new();
    let substituted = substitute_value(document, &mut missing);

    missing.sort();
    missing.dedup();
    if missing.is_empty() {
        return Ok(substituted);
    }

    if strict {
        return Err(CliError::new(
            ErrorKind::MissingEnvVar,
            format!("unset environment variable(s): {}", missing.join(", ")),
        )
        .with_suggestion(
            "export the variable(s), or set MCPX_STRICT_ENV=false to substitute empty strings",
        ));
    }

    for name in &missing {
        eprintln!("mcpx: warning: ${{{}}} is unset, substituting empty string", name);
    }
    Ok(substituted)
}

fn substitute_value(value: Value, missing: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => Value::String(expand_leaf(&s, missing)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute_value(v, missing))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_value(v, missing)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_leaf(s: &str, missing: &mut Vec<String>) -> String {
    let context = |var: &str| -> Result<Option<String>, std::convert::Infallible> {
        match std::env::var(var) {
            Ok(v) => Ok(Some(v)),
            Err(_) => {
                missing.push(var.to_string());
                Ok(Some(String::new()))
            }
        }
    };
    match shellexpand::env_with_context(s, context) {
        Ok(expanded) => expanded.into_owned(),
        // Malformed ${ sequences pass through untouched.
        Err(_) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CliResult<Catalogue> {
        Catalogue::parse(json, Path::new("test.json"), true)
    }

    #[test]
    fn minimal_stdio_server_parses() {
        let cat = parse(r#"{"mcpServers": {"fs": {"command": "mcp-fs"}}}"#).unwrap();
        let server = cat.get("fs").unwrap();
        match &server.transport {
            TransportConfig::Stdio(s) => {
                assert_eq!(s.command, "mcp-fs");
                assert!(s.args.is_empty());
                assert!(s.env.is_empty());
            }
            TransportConfig::Http(_) => panic!("expected stdio"),
        }
    }

    #[test]
    fn http_server_with_oauth_parses() {
        let cat = parse(
            r#"{"mcpServers": {"x": {
                "url": "https://mcp.example.com/mcp",
                "headers": {"X-Team": "a"},
                "oauth": {"grantType": "authorization_code", "scope": "tools:read",
                          "callbackPorts": [80, 0]}
            }}}"#,
        )
        .unwrap();
        match &cat.get("x").unwrap().transport {
            TransportConfig::Http(h) => {
                let oauth = h.oauth.as_ref().unwrap();
                assert_eq!(oauth.grant_type, GrantType::AuthorizationCode);
                assert_eq!(oauth.callback_ports.as_deref(), Some(&[80, 0][..]));
            }
            TransportConfig::Stdio(_) => panic!("expected http"),
        }
    }

    #[test]
    fn exactly_one_transport_is_enforced() {
        let both = parse(
            r#"{"mcpServers": {"x": {"command": "a", "url": "https://b.example"}}}"#,
        )
        .unwrap_err();
        assert_eq!(both.kind, ErrorKind::ConfigValidationFailed);
        assert!(both.details.unwrap().contains("mutually exclusive"));

        let neither = parse(r#"{"mcpServers": {"x": {}}}"#).unwrap_err();
        assert_eq!(neither.kind, ErrorKind::ConfigValidationFailed);
        assert!(neither.details.unwrap().contains("exactly one"));
    }

    #[test]
    fn client_credentials_requires_both_halves() {
        let err = parse(
            r#"{"mcpServers": {"x": {
                "url": "https://b.example",
                "oauth": {"grantType": "client_credentials", "clientId": "id"}
            }}}"#,
        )
        .unwrap_err();
        assert!(err.details.unwrap().contains("clientSecret"));
    }

    #[test]
    fn unknown_grant_is_rejected() {
        let err = parse(
            r#"{"mcpServers": {"x": {
                "url": "https://b.example",
                "oauth": {"grantType": "implicit"}
            }}}"#,
        )
        .unwrap_err();
        assert!(err.details.unwrap().contains("implicit"));
    }

    #[test]
    fn callback_port_range_is_checked() {
        let err = parse(
            r#"{"mcpServers": {"x": {
                "url": "https://b.example",
                "oauth": {"callbackPort": 0}
            }}}"#,
        )
        .unwrap_err();
        assert!(err.details.unwrap().contains("callbackPort"));
    }

    #[test]
    fn invalid_json_is_its_own_kind() {
        let err = parse("{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigInvalidJson);
    }

    #[test]
    fn strict_env_lists_every_unset_name() {
        let err = parse(
            r#"{"mcpServers": {"fs": {
                "command": "mcp-fs",
                "env": {"A": "${MCPX_TEST_UNSET_ONE}", "B": "${MCPX_TEST_UNSET_TWO}"}
            }}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEnvVar);
        assert!(err.message.contains("MCPX_TEST_UNSET_ONE"));
        assert!(err.message.contains("MCPX_TEST_UNSET_TWO"));
    }

    #[test]
    fn set_variables_are_expanded() {
        std::env::set_var("MCPX_TEST_SET_VAR", "tok-123");
        let cat = parse(
            r#"{"mcpServers": {"fs": {
                "command": "mcp-fs",
                "env": {"TOKEN": "${MCPX_TEST_SET_VAR}"}
            }}}"#,
        )
        .unwrap();
        match &cat.get("fs").unwrap().transport {
            TransportConfig::Stdio(s) => {
                assert_eq!(s.env.get("TOKEN").map(String::as_str), Some("tok-123"));
            }
            _ => panic!("expected stdio"),
        }
    }

    #[test]
    fn lax_mode_substitutes_empty() {
        let cat = Catalogue::parse(
            r#"{"mcpServers": {"fs": {
                "command": "mcp-fs",
                "env": {"TOKEN": "${MCPX_TEST_UNSET_LAX}"}
            }}}"#,
            Path::new("test.json"),
            false,
        )
        .unwrap();
        match &cat.get("fs").unwrap().transport {
            TransportConfig::Stdio(s) => {
                assert_eq!(s.env.get("TOKEN").map(String::as_str), Some(""));
            }
            _ => panic!("expected stdio"),
        }
    }

    #[test]
    fn load_is_idempotent() {
        let json = r#"{"mcpServers": {"b": {"command": "b"}, "a": {"command": "a", "args": ["-x"]}}}"#;
        let one = parse(json).unwrap();
        let two = parse(json).unwrap();
        assert_eq!(one.server_names(), two.server_names());
        assert_eq!(
            serde_json::to_value(one.get("a").unwrap()).unwrap(),
            serde_json::to_value(two.get("a").unwrap()).unwrap()
        );
    }

    #[test]
    fn require_reports_available_names() {
        let cat = parse(r#"{"mcpServers": {"fs": {"command": "mcp-fs"}}}"#).unwrap();
        let err = cat.require("nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerNotFound);
        assert!(err.details.unwrap().contains("fs"));
    }
}
