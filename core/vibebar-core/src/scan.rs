//! Process-table fallback detector.
//!
//! Zero-cooperation channel: enumerates the OS process table in one refresh
//! pass and classifies candidates against per-tool binary signatures. Only
//! processes parented by an interactive shell, a terminal emulator, a
//! multiplexer server, or init survive, which filters out worker processes a
//! runtime forks internally.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use sysinfo::{Process, ProcessRefreshKind, System, UpdateKind};

use vibebar_protocol::{SessionStatus, Snapshot, SnapshotSource, Tool};

/// CPU share above which a session counts as actively working.
pub const CPU_RUNNING_THRESHOLD: f32 = 3.0;

/// Our own binaries, excluded to avoid self-detection.
const OWN_BINARIES: &[&str] = &["vibebar-wrap", "vibebar-agent"];

/// Interpreters that launch tools as `runtime script [args...]`.
const RUNTIME_LAUNCHERS: &[&str] = &["node", "bun", "deno", "python", "python3"];

/// Parent process names that indicate an interactive session.
const SESSION_PARENTS: &[&str] = &[
    "zsh", "bash", "fish", "sh", "dash", "nu", "login", "tmux", "tmux: server", "screen",
    "alacritty", "kitty", "ghostty", "foot", "wezterm", "wezterm-gui", "iTerm2", "Terminal",
    "gnome-terminal-server", "konsole",
];

pub struct ProcessScanner {
    sys: System,
}

impl Default for ProcessScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessScanner {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    /// Enumerates the process table once and returns a snapshot per detected
    /// tool session. CPU deltas need two refreshes, so the first scan after
    /// construction classifies everything idle.
    pub fn scan(&mut self, now: DateTime<Utc>) -> Vec<Snapshot> {
        self.sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cpu()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );

        let mut sessions = Vec::new();
        for (pid, process) in self.sys.processes() {
            let command: Vec<String> = process.cmd().to_vec();
            let Some(tool) = classify_command(process.name(), &command) else {
                continue;
            };
            if !self.has_session_parent(process) {
                continue;
            }

            let cpu = process.cpu_usage();
            let status = if cpu >= CPU_RUNNING_THRESHOLD {
                SessionStatus::Running
            } else {
                SessionStatus::Idle
            };

            sessions.push(Snapshot {
                id: format!("ps-{}", pid.as_u32()),
                tool,
                pid: pid.as_u32(),
                parent_pid: process.parent().map(|ppid| ppid.as_u32()),
                status,
                source: SnapshotSource::ProcessScan,
                started_at: Utc
                    .timestamp_opt(process.start_time() as i64, 0)
                    .single()
                    .unwrap_or(now),
                updated_at: now,
                last_output_at: None,
                last_input_at: None,
                cwd: process
                    .cwd()
                    .map(|path| path.to_string_lossy().to_string()),
                command,
                notes: Some(format!("cpu {:.1}%", cpu)),
            });
        }
        sessions
    }

    fn has_session_parent(&self, process: &Process) -> bool {
        let Some(ppid) = process.parent() else {
            return false;
        };
        if ppid.as_u32() <= 1 {
            return true;
        }
        self.sys
            .process(ppid)
            .map(|parent| is_session_parent(parent.name()))
            .unwrap_or(false)
    }
}

/// Classifies a process against the per-tool signature table: exact binary
/// basename match, or for runtime-launched tools the basename of the leading
/// argument tokens (handles `node cli.js`-style invocations).
pub fn classify_command(name: &str, command: &[String]) -> Option<Tool> {
    let base = basename(name);
    if OWN_BINARIES.contains(&base) {
        return None;
    }

    for tool in Tool::ALL {
        if tool.binary_names().contains(&base) {
            return Some(tool);
        }
    }

    let launcher = command.first().map(|arg| basename(arg)).unwrap_or_default();
    if !RUNTIME_LAUNCHERS.contains(&launcher) && !RUNTIME_LAUNCHERS.contains(&base) {
        return None;
    }

    for token in command.iter().skip(1).take(4) {
        if token.starts_with('-') {
            continue;
        }
        let script = script_stem(token);
        for tool in Tool::ALL {
            if tool.script_names().contains(&basename(token))
                || tool.script_names().contains(&script)
            {
                return Some(tool);
            }
        }
    }
    None
}

pub fn is_session_parent(name: &str) -> bool {
    SESSION_PARENTS.contains(&name)
}

/// Signal-0 liveness probe used by the agent's dead-session sweeper.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs no delivery, only an existence and
    // permission check.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

fn basename(value: &str) -> &str {
    Path::new(value)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(value)
}

fn script_stem(value: &str) -> &str {
    Path::new(value)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(value)
}
