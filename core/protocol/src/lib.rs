//! Shared session and event schema for vibebar.
//!
//! This crate is shared by the wrapper, the agent and the detector library to
//! prevent drift between the on-disk session format and the plugin event
//! protocol. Field names are camelCase on the wire because the session files
//! are read by external consumers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Schema version written into every session envelope.
pub const ENVELOPE_VERSION: u32 = 1;

/// Schema version stamped onto outgoing plugin events.
pub const EVENT_VERSION: u32 = 1;

/// Supported interactive CLI tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Claude,
    Codex,
    Aider,
    Amp,
    OpenCode,
    Droid,
    #[serde(other)]
    Other,
}

impl Tool {
    /// Every concrete tool, in the deterministic order summaries use.
    pub const ALL: [Tool; 6] = [
        Tool::Claude,
        Tool::Codex,
        Tool::Aider,
        Tool::Amp,
        Tool::OpenCode,
        Tool::Droid,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Aider => "aider",
            Self::Amp => "amp",
            Self::OpenCode => "opencode",
            Self::Droid => "droid",
            Self::Other => "other",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "OpenAI Codex",
            Self::Aider => "Aider",
            Self::Amp => "Amp",
            Self::OpenCode => "OpenCode",
            Self::Droid => "Droid",
            Self::Other => "Other",
        }
    }

    pub fn from_id(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tool| tool.id() == value)
    }

    /// Binary basenames that identify this tool in the process table.
    pub fn binary_names(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["claude"],
            Self::Codex => &["codex"],
            Self::Aider => &["aider"],
            Self::Amp => &["amp"],
            Self::OpenCode => &["opencode"],
            Self::Droid => &["droid", "factory-droid"],
            Self::Other => &[],
        }
    }

    /// Script basenames to look for in the argument list when the process is
    /// a runtime launcher (`node cli.js` style invocations).
    pub fn script_names(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["claude", "cli.js"],
            Self::OpenCode => &["opencode"],
            Self::Droid => &["droid"],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Activity classification for one observed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    AwaitingInput,
    Unknown,
}

/// Retired status values accepted on decode. Keep migrations here instead of
/// special-casing them inline at the call sites.
const LEGACY_STATUS_MIGRATIONS: &[(&str, SessionStatus)] = &[("completed", SessionStatus::Idle)];

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingInput => "awaiting_input",
            Self::Unknown => "unknown",
        }
    }

    /// Decodes a wire value, applying the legacy migration table. Values that
    /// neither match a current variant nor a migration decode as `Unknown` so
    /// a single unrecognized status never poisons a whole envelope.
    pub fn decode(raw: &str) -> Self {
        match raw {
            "idle" => Self::Idle,
            "running" => Self::Running,
            "awaiting_input" => Self::AwaitingInput,
            "unknown" => Self::Unknown,
            other => LEGACY_STATUS_MIGRATIONS
                .iter()
                .find(|(legacy, _)| *legacy == other)
                .map(|(_, status)| *status)
                .unwrap_or(Self::Unknown),
        }
    }

    pub fn from_id(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "awaiting_input" => Some(Self::AwaitingInput),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Transient sessions are exempt from TTL cleanup.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingInput)
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SessionStatus::decode(&raw))
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which detection channel produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Wrapper,
    ProcessScan,
    Plugin,
}

/// Origin of a plugin event. Unrecognized values decode as `Unknown` so new
/// plugin integrations can ship before the agent learns their name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    ClaudeHook,
    CodexHook,
    AmpHook,
    OpencodePlugin,
    Wrapper,
    #[serde(other)]
    Unknown,
}

impl EventSource {
    pub fn id(&self) -> &'static str {
        match self {
            Self::ClaudeHook => "claude_hook",
            Self::CodexHook => "codex_hook",
            Self::AmpHook => "amp_hook",
            Self::OpencodePlugin => "opencode_plugin",
            Self::Wrapper => "wrapper",
            Self::Unknown => "unknown",
        }
    }
}

/// One observed session of a tool process.
///
/// `id` is stable for the lifetime of one logical session and encodes the
/// producing channel (`ps-<pid>`, `wrap-<pid>`, `plugin-<source>-<session>`,
/// `opencode-http-<pid>`, ...). `updated_at` never moves backwards while the
/// session is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub tool: Tool,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<u32>,
    pub status: SessionStatus,
    pub source: SnapshotSource,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_input_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Versioned on-disk wrapper around a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub session: Snapshot,
}

impl Envelope {
    pub fn new(session: Snapshot) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            session,
        }
    }

    /// Readers skip envelopes written by a future schema.
    pub fn is_supported(&self) -> bool {
        self.version <= ENVELOPE_VERSION
    }
}

const TERMINAL_MARKERS: &[&str] = &["end", "exit", "stop", "terminate", "close"];
const AWAIT_MARKERS: &[&str] = &["permission", "await", "prompt", "approval"];
const RUNNING_MARKERS: &[&str] = &["run", "start", "tool", "progress"];

/// Structured lifecycle message from a plugin or hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default = "default_event_version")]
    pub version: u32,
    pub source: EventSource,
    pub tool: Tool,
    pub session_id: String,
    pub event_type: String,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub parent_pid: Option<u32>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_event_version() -> u32 {
    EVENT_VERSION
}

impl Event {
    /// Session id used for this channel's snapshots. Namespaced by source so
    /// plugin-origin sessions never collide with wrapper or scan ids.
    pub fn composite_session_id(&self) -> String {
        format!("plugin-{}-{}", self.source.id(), self.session_id)
    }

    /// Terminal events delete the session regardless of any carried status.
    pub fn is_terminal(&self) -> bool {
        let lowered = self.event_type.to_ascii_lowercase();
        TERMINAL_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    /// Resolves the effective status: an explicit value wins, then event-type
    /// substrings, then whatever the previous snapshot reported.
    pub fn resolved_status(&self, previous: Option<SessionStatus>) -> SessionStatus {
        if let Some(status) = self.status {
            return status;
        }
        let lowered = self.event_type.to_ascii_lowercase();
        if AWAIT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return SessionStatus::AwaitingInput;
        }
        if lowered.contains("idle") {
            return SessionStatus::Idle;
        }
        if RUNNING_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            return SessionStatus::Running;
        }
        previous.unwrap_or(SessionStatus::Running)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.trim().is_empty() {
            return Err("sessionId is required".to_string());
        }
        if self.event_type.trim().is_empty() {
            return Err("eventType is required".to_string());
        }
        Ok(())
    }
}
