//! Codex JSON-RPC status probe.
//!
//! Codex app-server sessions expose a line-delimited JSON-RPC endpoint on a
//! local TCP port. One bounded status request maps the reply onto a session
//! status; an unreachable or silent server yields no session.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use vibebar_protocol::{SessionStatus, Snapshot, SnapshotSource, Tool};

use super::ports;
use super::Detector;

const PROBE_TIMEOUT: Duration = Duration::from_millis(800);

pub struct CodexRpcDetector {
    timeout: Duration,
}

impl Default for CodexRpcDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexRpcDetector {
    pub fn new() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }

    fn probe(&self, candidate: &Snapshot, now: DateTime<Utc>) -> Option<Snapshot> {
        let port = ports::discover_listen_port(candidate.pid, &candidate.command)?;
        let reply = match self.request_status(port) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(pid = candidate.pid, port, error = %err, "Codex RPC probe failed");
                return None;
            }
        };
        let status = classify_reply(&reply);

        let mut snapshot = candidate.clone();
        snapshot.id = format!("codex-rpc-{}", candidate.pid);
        snapshot.status = status;
        snapshot.source = SnapshotSource::ProcessScan;
        snapshot.updated_at = now;
        snapshot.notes = Some(format!("rpc probe :{port}"));
        Some(snapshot)
    }

    fn request_status(&self, port: u16) -> std::io::Result<String> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"status\"}\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        Ok(line)
    }
}

/// Maps the RPC reply onto a status. Anything that parses but carries no
/// recognized state reads as unknown; the session itself is proven live by
/// the reachable server.
fn classify_reply(reply: &str) -> SessionStatus {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(reply) else {
        return SessionStatus::Unknown;
    };
    let state = value
        .pointer("/result/status")
        .or_else(|| value.pointer("/result/state"))
        .and_then(|state| state.as_str())
        .unwrap_or("");
    match state.to_ascii_lowercase().as_str() {
        "busy" | "working" | "running" | "streaming" => SessionStatus::Running,
        "waiting" | "awaiting_approval" | "approval" | "blocked" => SessionStatus::AwaitingInput,
        "idle" | "ready" => SessionStatus::Idle,
        _ => SessionStatus::Unknown,
    }
}

impl Detector for CodexRpcDetector {
    fn name(&self) -> &'static str {
        "codex-rpc"
    }

    fn collect(&self, candidates: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot> {
        candidates
            .iter()
            .filter(|candidate| candidate.tool == Tool::Codex)
            .filter_map(|candidate| self.probe(candidate, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_states_map_to_running() {
        for state in ["busy", "working", "streaming"] {
            let reply = format!(r#"{{"jsonrpc":"2.0","id":1,"result":{{"status":"{state}"}}}}"#);
            assert_eq!(classify_reply(&reply), SessionStatus::Running, "{state}");
        }
    }

    #[test]
    fn approval_states_map_to_awaiting_input() {
        let reply = r#"{"jsonrpc":"2.0","id":1,"result":{"state":"awaiting_approval"}}"#;
        assert_eq!(classify_reply(reply), SessionStatus::AwaitingInput);
    }

    #[test]
    fn ready_maps_to_idle() {
        let reply = r#"{"jsonrpc":"2.0","id":1,"result":{"status":"ready"}}"#;
        assert_eq!(classify_reply(reply), SessionStatus::Idle);
    }

    #[test]
    fn unrecognized_reply_maps_to_unknown() {
        assert_eq!(classify_reply("garbage"), SessionStatus::Unknown);
        assert_eq!(
            classify_reply(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#),
            SessionStatus::Unknown
        );
    }
}
