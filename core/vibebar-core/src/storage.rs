//! Storage configuration and path management.
//!
//! A single value object owns every path decision so components receive an
//! explicit context instead of consulting global state. Production code uses
//! `StorageConfig::default()` (rooted at `~/.vibebar/`); tests inject a temp
//! root via `StorageConfig::with_root()`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the agent socket path.
pub const SOCKET_ENV: &str = "VIBEBAR_AGENT_SOCKET";

/// Environment variable overriding the plugin heartbeat interval, in
/// milliseconds. Plugins read it too; the agent uses it to scale the idle TTL
/// so sessions from a slow-heartbeat plugin are not reaped between beats.
pub const HEARTBEAT_ENV: &str = "VIBEBAR_PLUGIN_HEARTBEAT_MS";

const SOCKET_NAME: &str = "agent.sock";
const DEFAULT_HEARTBEAT_MS: u64 = 15_000;
const DEFAULT_IDLE_TTL_SECS: u64 = 600;

/// Central configuration for all vibebar storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for vibebar data (default: ~/.vibebar)
    root: PathBuf,
    /// Root directory for Claude Code data (default: ~/.claude), read-only.
    claude_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            root: home.join(".vibebar"),
            claude_root: home.join(".claude"),
        }
    }
}

impl StorageConfig {
    /// Creates a config with a custom root directory, for test isolation.
    pub fn with_root(root: PathBuf) -> Self {
        let claude_root = root
            .parent()
            .map(|p| p.join(".claude"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.claude"));
        Self { root, claude_root }
    }

    /// Creates a config with both roots custom, for tests that mock Claude
    /// transcript data too.
    pub fn with_roots(root: PathBuf, claude_root: PathBuf) -> Self {
        Self { root, claude_root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn claude_root(&self) -> &Path {
        &self.claude_root
    }

    /// Directory holding one JSON file per live session.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Directory the wrapper writes its diagnostic log into. The wrapper's
    /// stdout belongs to the proxied tool, so logs can never go there.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Agent socket path, honoring the `VIBEBAR_AGENT_SOCKET` override.
    pub fn socket_path(&self) -> PathBuf {
        match env::var(SOCKET_ENV) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => self.default_socket_path(),
        }
    }

    /// Agent socket path ignoring the environment override.
    pub fn default_socket_path(&self) -> PathBuf {
        self.root.join(SOCKET_NAME)
    }

    /// Claude Code's transcript directory (JSONL session files). Read-only;
    /// this is Claude's data, not ours.
    pub fn claude_projects_dir(&self) -> PathBuf {
        self.claude_root.join("projects")
    }

    /// Encodes a working directory the way Claude Code names its per-project
    /// transcript directories (`/` replaced by `-`).
    pub fn encode_project_path(path: &str) -> String {
        path.replace('/', "-")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

/// Plugin heartbeat interval, honoring the millisecond env override.
pub fn plugin_heartbeat_interval() -> Duration {
    let ms = env::var(HEARTBEAT_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_HEARTBEAT_MS);
    Duration::from_millis(ms)
}

/// TTL after which stale non-transient sessions are purged. Never shorter
/// than four heartbeats so slow plugins do not flap.
pub fn idle_session_ttl() -> chrono::Duration {
    let floor = Duration::from_secs(DEFAULT_IDLE_TTL_SECS);
    let scaled = plugin_heartbeat_interval() * 4;
    let ttl = if scaled > floor { scaled } else { floor };
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(
        DEFAULT_IDLE_TTL_SECS as i64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_is_vibebar() {
        let config = StorageConfig::default();
        assert!(config.root().ends_with(".vibebar"));
        assert!(config.claude_root().ends_with(".claude"));
    }

    #[test]
    fn with_root_sets_custom_paths() {
        let config = StorageConfig::with_root(PathBuf::from("/tmp/vb-test"));
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/vb-test/sessions"));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/vb-test/logs"));
        assert_eq!(
            config.default_socket_path(),
            PathBuf::from("/tmp/vb-test/agent.sock")
        );
    }

    #[test]
    fn encode_project_path_replaces_slashes() {
        assert_eq!(
            StorageConfig::encode_project_path("/Users/dev/code/app"),
            "-Users-dev-code-app"
        );
    }

    #[test]
    fn ensure_dirs_creates_structure() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig::with_root(temp.path().join("vb"));
        config.ensure_dirs().unwrap();
        assert!(config.sessions_dir().is_dir());
        assert!(config.log_dir().is_dir());
    }

    #[test]
    fn idle_ttl_has_a_floor() {
        assert!(idle_session_ttl() >= chrono::Duration::seconds(DEFAULT_IDLE_TTL_SECS as i64));
    }
}
