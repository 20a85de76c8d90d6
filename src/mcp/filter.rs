//! Tool allow/deny filtering
//!
//! Patterns are glob-like: `*` matches any run of characters, `?` exactly
//! one; everything else is literal. Matching is case-insensitive. A
//! `disabledTools` match denies unconditionally; otherwise a non-empty
//! `allowedTools` list must match; otherwise the tool is allowed.

use crate::config::ServerConfig;

/// Case-insensitive glob match over a whole string.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    // Iterative with star backtracking.
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Whether the record's filter lets this tool through.
pub fn is_tool_allowed(tool: &str, config: &ServerConfig) -> bool {
    if config
        .disabled_tools
        .iter()
        .any(|pattern| glob_match(pattern, tool))
    {
        return false;
    }
    if config.allowed_tools.is_empty() {
        return true;
    }
    config
        .allowed_tools
        .iter()
        .any(|pattern| glob_match(pattern, tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StdioConfig, TransportConfig};

    fn server(allowed: &[&str], disabled: &[&str]) -> ServerConfig {
        ServerConfig {
            transport: TransportConfig::Stdio(StdioConfig {
                command: "srv".into(),
                args: vec![],
                env: Default::default(),
                cwd: None,
            }),
            allowed_tools: allowed.iter().map(|s| s.to_string()).collect(),
            disabled_tools: disabled.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn star_matches_any_run() {
        assert!(glob_match("delete_*", "delete_file"));
        assert!(glob_match("delete_*", "delete_"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*file*", "read_file_v2"));
        assert!(!glob_match("delete_*", "remove_file"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        assert!(glob_match("read_?", "read_a"));
        assert!(!glob_match("read_?", "read_"));
        assert!(!glob_match("read_?", "read_ab"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(glob_match("Read_File", "read_file"));
        assert!(glob_match("READ_*", "read_file"));
    }

    #[test]
    fn literal_patterns_match_whole_names() {
        assert!(glob_match("read_file", "read_file"));
        assert!(!glob_match("read_file", "read_file_v2"));
        assert!(!glob_match("read", "read_file"));
    }

    #[test]
    fn empty_filters_allow_everything() {
        let cfg = server(&[], &[]);
        assert!(is_tool_allowed("anything", &cfg));
    }

    #[test]
    fn allow_list_limits_to_matches() {
        let cfg = server(&["read_*", "list_dir"], &[]);
        assert!(is_tool_allowed("read_file", &cfg));
        assert!(is_tool_allowed("list_dir", &cfg));
        assert!(!is_tool_allowed("write_file", &cfg));
    }

    #[test]
    fn disable_dominates_allow() {
        let cfg = server(&["*"], &["delete_*"]);
        assert!(is_tool_allowed("read_file", &cfg));
        assert!(!is_tool_allowed("delete_file", &cfg));

        // Even an exact allow entry loses to a disable match.
        let cfg = server(&["delete_file"], &["delete_*"]);
        assert!(!is_tool_allowed("delete_file", &cfg));
    }
}
