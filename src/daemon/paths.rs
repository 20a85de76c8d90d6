//! Daemon on-disk state
//!
//! One descriptor + socket pair per server under a per-uid directory in
//! the OS temp dir. The descriptor records pid, config hash, and start
//! time; the config hash is the sole staleness signal.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ServerConfig;
use crate::credentials::sanitize;

/// Per-user socket directory: `$TMPDIR/mcpx-<uid>`.
pub fn socket_dir() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir().join(format!("mcpx-{}", uid))
}

pub fn socket_path(server: &str) -> PathBuf {
    socket_dir().join(format!("{}.sock", sanitize(server)))
}

pub fn descriptor_path(server: &str) -> PathBuf {
    socket_dir().join(format!("{}.pid", sanitize(server)))
}

/// Stderr of the detached worker goes to a per-server log next to the
/// socket.
pub fn log_path(server: &str) -> PathBuf {
    socket_dir().join(format!("{}.log", sanitize(server)))
}

/// On-disk daemon descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonDescriptor {
    pub pid: u32,
    pub config_hash: String,
    /// Unix seconds.
    pub started_at: u64,
}

impl DaemonDescriptor {
    pub fn read(server: &str) -> Option<Self> {
        let raw = std::fs::read_to_string(descriptor_path(server)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn write(&self, server: &str) -> std::io::Result<()> {
        let dir = socket_dir();
        std::fs::create_dir_all(&dir)?;
        set_mode(&dir, 0o700)?;
        let path = descriptor_path(server);
        let json = serde_json::to_string(self)?;
        write_private(&path, json.as_bytes())
    }
}

/// Remove a server's descriptor, socket, and log files. Best effort.
pub fn remove_files(server: &str) {
    for path in [socket_path(server), descriptor_path(server), log_path(server)] {
        let _ = std::fs::remove_file(path);
    }
}

/// Whether a process with this pid is alive (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Sweep the socket directory: any descriptor whose pid is dead takes its
/// socket and log down with it. Called once at CLI startup.
pub fn sweep() {
    let Ok(entries) = std::fs::read_dir(socket_dir()) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let alive = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<DaemonDescriptor>(&raw).ok())
            .map(|d| pid_alive(d.pid))
            .unwrap_or(false);
        if !alive {
            tracing::debug!("sweeping dead daemon state for '{}'", stem);
            let _ = std::fs::remove_file(socket_dir().join(format!("{}.sock", stem)));
            let _ = std::fs::remove_file(socket_dir().join(format!("{}.log", stem)));
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Stable hash of a server record: SHA-256 over the key-sorted JSON
/// serialisation, truncated to 16 hex characters.
pub fn config_hash(config: &ServerConfig) -> String {
    let value = serde_json::to_value(config).unwrap_or_default();
    let canonical = canonical_json(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Serialise with object keys in sorted order regardless of the map
/// implementation behind `serde_json::Map`.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(unix)]
fn write_private(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Catalogue};
    use std::path::Path;

    fn record(json: &str) -> ServerConfig {
        let doc = format!(r#"{{"mcpServers": {{"x": {}}}}}"#, json);
        Catalogue::parse(&doc, Path::new("t.json"), true)
            .unwrap()
            .get("x")
            .unwrap()
            .clone()
    }

    #[test]
    fn hash_is_stable_across_loads() {
        let a = record(r#"{"command": "srv", "args": ["-a"], "env": {"B": "2", "A": "1"}}"#);
        let b = record(r#"{"command": "srv", "args": ["-a"], "env": {"A": "1", "B": "2"}}"#);
        assert_eq!(config_hash(&a), config_hash(&b));
        assert_eq!(config_hash(&a).len(), 16);
    }

    #[test]
    fn any_field_change_flips_the_hash() {
        let base = record(r#"{"command": "srv", "args": ["-a"]}"#);
        for changed in [
            r#"{"command": "srv2", "args": ["-a"]}"#,
            r#"{"command": "srv", "args": ["-b"]}"#,
            r#"{"command": "srv", "args": ["-a"], "env": {"X": "1"}}"#,
            r#"{"command": "srv", "args": ["-a"], "disabledTools": ["x"]}"#,
        ] {
            assert_ne!(config_hash(&base), config_hash(&record(changed)), "{}", changed);
        }
    }

    #[test]
    fn current_process_is_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(0));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": {"d": [2, 3], "c": null}}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":{"c":null,"d":[2,3]},"b":1}"#);
    }
}
