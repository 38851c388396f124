//! Event ingestion and session upserts.
//!
//! Each connection is read to EOF and split on newlines; every line is one
//! independent event. A malformed line is skipped with a diagnostic, never
//! aborting the connection or the process. The protocol is fire-and-forget:
//! no response is written.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vibebar_core::scan::pid_alive;
use vibebar_core::store::SessionStore;
use vibebar_protocol::{Event, SessionStatus, Snapshot, SnapshotSource};

const READ_TIMEOUT_SECS: u64 = 5;

pub fn handle_connection(mut stream: UnixStream, store: &SessionStore) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut raw = Vec::new();
    if let Err(err) = stream.read_to_end(&mut raw) {
        warn!(error = %err, "Failed to read event stream");
        return;
    }
    let applied = apply_lines(store, &raw);
    debug!(bytes = raw.len(), applied, "Connection drained");
}

/// Applies every parsable event line, returning how many were applied.
pub fn apply_lines(store: &SessionStore, raw: &[u8]) -> usize {
    let mut applied = 0;
    for line in raw.split(|byte| *byte == b'\n') {
        if line.iter().all(|byte| byte.is_ascii_whitespace()) {
            continue;
        }
        let event: Event = match serde_json::from_slice(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Skipping malformed event line");
                continue;
            }
        };
        if let Err(reason) = event.validate() {
            warn!(reason = %reason, "Skipping invalid event");
            continue;
        }
        apply_event(store, &event);
        applied += 1;
    }
    applied
}

/// Applies one event: terminal events delete immediately regardless of any
/// accompanying status; everything else upserts the snapshot keyed by the
/// composite session id.
pub fn apply_event(store: &SessionStore, event: &Event) {
    let session_id = event.composite_session_id();

    if event.is_terminal() {
        debug!(
            session_id = %session_id,
            event_type = %event.event_type,
            "Terminal event, deleting session"
        );
        store.delete(&session_id);
        return;
    }

    let previous = store.load(&session_id);
    let status = event.resolved_status(previous.as_ref().map(|snapshot| snapshot.status));

    let pid = event
        .pid
        .or_else(|| previous.as_ref().map(|snapshot| snapshot.pid))
        .unwrap_or(0);
    // Never let a delayed event move updated_at backwards.
    let updated_at = match previous.as_ref() {
        Some(snapshot) if snapshot.updated_at > event.timestamp => snapshot.updated_at,
        _ => event.timestamp,
    };

    let snapshot = Snapshot {
        id: session_id.clone(),
        tool: event.tool,
        pid,
        parent_pid: event
            .parent_pid
            .or_else(|| previous.as_ref().and_then(|snapshot| snapshot.parent_pid)),
        status,
        source: SnapshotSource::Plugin,
        started_at: previous
            .as_ref()
            .map(|snapshot| snapshot.started_at)
            .unwrap_or(event.timestamp),
        updated_at,
        last_output_at: if status == SessionStatus::Running {
            Some(event.timestamp)
        } else {
            previous.as_ref().and_then(|snapshot| snapshot.last_output_at)
        },
        last_input_at: if status == SessionStatus::AwaitingInput {
            Some(event.timestamp)
        } else {
            previous.as_ref().and_then(|snapshot| snapshot.last_input_at)
        },
        cwd: event
            .cwd
            .clone()
            .or_else(|| previous.as_ref().and_then(|snapshot| snapshot.cwd.clone())),
        command: if event.command.is_empty() {
            previous
                .as_ref()
                .map(|snapshot| snapshot.command.clone())
                .unwrap_or_default()
        } else {
            event.command.clone()
        },
        notes: event
            .notes
            .clone()
            .or_else(|| previous.as_ref().and_then(|snapshot| snapshot.notes.clone())),
    };

    if let Err(err) = store.write(&snapshot) {
        warn!(session_id = %session_id, error = %err, "Failed to persist session");
        return;
    }

    // Plugins may mint a new session id per reconnect; only the freshest row
    // per OS process survives.
    if pid != 0 {
        store.delete_other_sessions(pid, &session_id);
    }
}

/// Periodic sweep: ages out stale non-transient sessions and drops
/// plugin-channel sessions whose process is gone. Returns (stale, dead).
pub fn sweep_sessions(
    store: &SessionStore,
    now: DateTime<Utc>,
    idle_ttl: chrono::Duration,
) -> (usize, usize) {
    let stale = store.cleanup_stale_sessions(now, idle_ttl);
    let mut dead = 0;
    for snapshot in store.load_all() {
        if snapshot.source == SnapshotSource::Plugin
            && snapshot.pid != 0
            && !pid_alive(snapshot.pid)
        {
            debug!(id = %snapshot.id, pid = snapshot.pid, "Dropping session for dead process");
            store.delete(&snapshot.id);
            dead += 1;
        }
    }
    (stale, dead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use vibebar_protocol::{EventSource, Tool, EVENT_VERSION};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = SessionStore::with_dir(temp.path().join("sessions"));
        (temp, store)
    }

    fn event(event_type: &str, secs: u32) -> Event {
        Event {
            version: EVENT_VERSION,
            source: EventSource::ClaudeHook,
            tool: Tool::Claude,
            session_id: "s1".to_string(),
            event_type: event_type.to_string(),
            status: None,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, secs).unwrap(),
            pid: Some(4242),
            parent_pid: None,
            cwd: Some("/repo".to_string()),
            command: vec![],
            notes: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn upsert_creates_session_with_inferred_status() {
        let (_temp, store) = store();
        apply_event(&store, &event("PreToolUse", 0));

        let snapshot = store.load("plugin-claude_hook-s1").unwrap();
        assert_eq!(snapshot.status, SessionStatus::Running);
        assert_eq!(snapshot.source, SnapshotSource::Plugin);
        assert_eq!(snapshot.pid, 4242);
        assert_eq!(snapshot.last_output_at, Some(snapshot.updated_at));
        assert_eq!(snapshot.last_input_at, None);
    }

    #[test]
    fn awaiting_event_records_input_time() {
        let (_temp, store) = store();
        apply_event(&store, &event("PermissionRequest", 0));

        let snapshot = store.load("plugin-claude_hook-s1").unwrap();
        assert_eq!(snapshot.status, SessionStatus::AwaitingInput);
        assert_eq!(snapshot.last_input_at, Some(snapshot.updated_at));
    }

    #[test]
    fn terminal_event_deletes_even_with_explicit_status() {
        let (_temp, store) = store();
        apply_event(&store, &event("PreToolUse", 0));
        assert!(store.load("plugin-claude_hook-s1").is_some());

        let mut terminal = event("SessionEnd", 5);
        terminal.status = Some(SessionStatus::Running);
        apply_event(&store, &terminal);

        assert!(store.load("plugin-claude_hook-s1").is_none());
    }

    #[test]
    fn unmatched_event_type_carries_previous_status_forward() {
        let (_temp, store) = store();
        apply_event(&store, &event("PermissionRequest", 0));
        apply_event(&store, &event("heartbeat", 10));

        let snapshot = store.load("plugin-claude_hook-s1").unwrap();
        assert_eq!(snapshot.status, SessionStatus::AwaitingInput);
    }

    #[test]
    fn started_at_is_preserved_and_updated_at_is_monotonic() {
        let (_temp, store) = store();
        apply_event(&store, &event("tool_start", 10));
        let first = store.load("plugin-claude_hook-s1").unwrap();

        // A delayed event carrying an older timestamp must not rewind.
        apply_event(&store, &event("tool_progress", 5));
        let second = store.load("plugin-claude_hook-s1").unwrap();

        assert_eq!(second.started_at, first.started_at);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[test]
    fn new_session_id_for_same_pid_replaces_old_file() {
        let (_temp, store) = store();
        apply_event(&store, &event("tool_start", 0));

        let mut reconnect = event("tool_start", 5);
        reconnect.session_id = "s2".to_string();
        apply_event(&store, &reconnect);

        assert!(store.load("plugin-claude_hook-s1").is_none());
        assert!(store.load("plugin-claude_hook-s2").is_some());
    }

    #[test]
    fn malformed_lines_are_skipped_but_later_lines_apply() {
        let (_temp, store) = store();
        let good = serde_json::to_string(&event("tool_start", 0)).unwrap();
        let raw = format!("{{broken\n\n{good}\n");

        let applied = apply_lines(&store, raw.as_bytes());

        assert_eq!(applied, 1);
        assert!(store.load("plugin-claude_hook-s1").is_some());
    }

    #[test]
    fn blank_session_id_is_rejected() {
        let (_temp, store) = store();
        let mut invalid = event("tool_start", 0);
        invalid.session_id = " ".to_string();
        let raw = format!("{}\n", serde_json::to_string(&invalid).unwrap());

        assert_eq!(apply_lines(&store, raw.as_bytes()), 0);
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn sweep_drops_dead_pid_plugin_sessions() {
        let (_temp, store) = store();
        let mut dead = event("tool_start", 0);
        dead.pid = Some(3_888_888);
        apply_event(&store, &dead);

        let mut alive = event("tool_start", 0);
        alive.session_id = "s-alive".to_string();
        alive.pid = Some(std::process::id());
        apply_event(&store, &alive);

        let now = Utc.with_ymd_and_hms(2026, 2, 1, 9, 1, 0).unwrap();
        let (_stale, dead_count) = sweep_sessions(&store, now, chrono::Duration::hours(1));

        assert_eq!(dead_count, 1);
        assert!(store.load("plugin-claude_hook-s-alive").is_some());
    }
}
