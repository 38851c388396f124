//! One-shot event delivery to the agent socket.
//!
//! `vibebar-wrap notify <tool> <state> [key=value...]` lets shell hooks and
//! scripts report a status without running a full proxy session. Reserved
//! keys map onto event fields; everything else rides along as metadata.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;

use chrono::Utc;

use vibebar_core::storage::StorageConfig;
use vibebar_protocol::{Event, EventSource, SessionStatus, Tool, EVENT_VERSION};

pub fn send(tool: &str, state: &str, pairs: &[String], config: &StorageConfig) -> Result<(), String> {
    let event = build_event(tool, state, pairs);
    let payload =
        serde_json::to_string(&event).map_err(|err| format!("encode event: {err}"))?;

    let socket_path = config.socket_path();
    let mut stream = UnixStream::connect(&socket_path)
        .map_err(|err| format!("connect {}: {err}", socket_path.display()))?;
    stream
        .write_all(payload.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .and_then(|_| stream.flush())
        .map_err(|err| format!("send event: {err}"))?;
    // Fire-and-forget: no response to read.
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

fn build_event(tool: &str, state: &str, pairs: &[String]) -> Event {
    let mut session_id = format!("cli-{}", std::process::id());
    let mut pid = None;
    let mut cwd = None;
    let mut notes = None;
    let mut metadata = BTreeMap::new();

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            metadata.insert(pair.clone(), String::new());
            continue;
        };
        match key {
            "session" => session_id = value.to_string(),
            "pid" => pid = value.parse::<u32>().ok(),
            "cwd" => cwd = Some(value.to_string()),
            "note" => notes = Some(value.to_string()),
            _ => {
                metadata.insert(key.to_string(), value.to_string());
            }
        }
    }

    Event {
        version: EVENT_VERSION,
        source: EventSource::Wrapper,
        tool: Tool::from_id(tool).unwrap_or(Tool::Other),
        session_id,
        event_type: state.to_string(),
        status: SessionStatus::from_id(state),
        timestamp: Utc::now(),
        pid,
        parent_pid: None,
        cwd,
        command: vec![],
        notes,
        metadata,
    }
}
