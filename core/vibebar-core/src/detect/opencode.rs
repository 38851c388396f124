//! OpenCode HTTP status probe.
//!
//! OpenCode serves a local HTTP API; `/session` lists sessions with
//! millisecond `time.updated` stamps. Recent activity on any session means
//! the server is actively working.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use vibebar_protocol::{SessionStatus, Snapshot, SnapshotSource, Tool};

use super::ports;
use super::Detector;

const PROBE_TIMEOUT: Duration = Duration::from_millis(600);

/// Activity newer than this counts as running.
const ACTIVE_WINDOW_MS: i64 = 3_000;

pub struct OpenCodeHttpDetector {
    timeout: Duration,
}

impl Default for OpenCodeHttpDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenCodeHttpDetector {
    pub fn new() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }

    fn probe(&self, candidate: &Snapshot, now: DateTime<Utc>) -> Option<Snapshot> {
        let port = ports::discover_listen_port(candidate.pid, &candidate.command)?;
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .new_agent();
        let url = format!("http://127.0.0.1:{port}/session");
        let mut response = match agent.get(&url).call() {
            Ok(response) => response,
            Err(err) => {
                debug!(pid = candidate.pid, port, error = %err, "OpenCode probe failed");
                return None;
            }
        };
        let body = response.body_mut().read_to_string().ok()?;
        let status = classify_session_list(&body, now);

        let mut snapshot = candidate.clone();
        snapshot.id = format!("opencode-http-{}", candidate.pid);
        snapshot.status = status;
        snapshot.source = SnapshotSource::ProcessScan;
        snapshot.updated_at = now;
        snapshot.notes = Some(format!("http probe :{port}"));
        if status == SessionStatus::Running {
            snapshot.last_output_at = Some(now);
        }
        Some(snapshot)
    }
}

/// Running when any listed session was updated inside the active window,
/// idle otherwise. A reachable server with an unparsable body still proves a
/// live session, just not its activity.
fn classify_session_list(body: &str, now: DateTime<Utc>) -> SessionStatus {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return SessionStatus::Unknown;
    };
    let Some(sessions) = value.as_array() else {
        return SessionStatus::Unknown;
    };
    let newest = sessions
        .iter()
        .filter_map(|session| session.pointer("/time/updated"))
        .filter_map(|updated| updated.as_i64())
        .max();
    match newest {
        Some(updated_ms) => {
            let updated = Utc
                .timestamp_millis_opt(updated_ms)
                .single()
                .unwrap_or(now);
            if (now - updated).num_milliseconds() < ACTIVE_WINDOW_MS {
                SessionStatus::Running
            } else {
                SessionStatus::Idle
            }
        }
        None => SessionStatus::Idle,
    }
}

impl Detector for OpenCodeHttpDetector {
    fn name(&self) -> &'static str {
        "opencode-http"
    }

    fn collect(&self, candidates: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot> {
        candidates
            .iter()
            .filter(|candidate| candidate.tool == Tool::OpenCode)
            .filter_map(|candidate| self.probe(candidate, now))
            .collect()
    }
}
