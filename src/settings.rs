//! Runtime knobs read from `MCPX_*` environment variables.

use std::time::Duration;

/// Tunables for one CLI invocation. Parsed once at startup; invalid values
/// fall back to the defaults rather than aborting.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Global deadline for a single operation (default 30 min).
    pub request_timeout: Duration,
    /// Fan-out worker pool size (default 5).
    pub concurrency: usize,
    /// Maximum connection attempts (default 3).
    pub max_retries: u32,
    /// Base retry delay (default 1 s).
    pub retry_delay: Duration,
    /// Strict `${VAR}` substitution (default true).
    pub strict_env: bool,
    /// Skip the daemon path entirely.
    pub no_daemon: bool,
    /// Daemon idle self-termination (default 300 s).
    pub daemon_idle_timeout: Duration,
    /// Verbose diagnostics on stderr.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30 * 60),
            concurrency: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            strict_env: true,
            no_daemon: false,
            daemon_idle_timeout: Duration::from_secs(300),
            debug: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: env_secs("MCPX_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            concurrency: env_parse::<usize>("MCPX_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            max_retries: env_parse::<u32>("MCPX_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay: env_parse::<u64>("MCPX_RETRY_DELAY")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            strict_env: env_bool("MCPX_STRICT_ENV").unwrap_or(defaults.strict_env),
            no_daemon: env_bool("MCPX_NO_DAEMON").unwrap_or(defaults.no_daemon),
            daemon_idle_timeout: env_secs("MCPX_DAEMON_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.daemon_idle_timeout),
            debug: env_bool("MCPX_DEBUG").unwrap_or(defaults.debug),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(name: &str) -> Option<u64> {
    env_parse::<u64>(name).filter(|n| *n > 0)
}

fn env_bool(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
