//! Per-tool high-fidelity detectors.
//!
//! Each detector wraps one tool's richer channel (HTTP status endpoint,
//! transcript log, JSON-RPC server) and produces ordinary snapshots whose id
//! prefix encodes the trust tier used later by the merge engine. Any internal
//! failure yields "no session" from that detector, never an error.

use chrono::{DateTime, Utc};

use vibebar_protocol::Snapshot;

use crate::storage::StorageConfig;

mod claude_log;
mod codex_rpc;
mod opencode;
mod ports;

pub use claude_log::ClaudeLogDetector;
pub use codex_rpc::CodexRpcDetector;
pub use opencode::OpenCodeHttpDetector;

/// Id prefixes owned by the poll-driven channels (scanner included). The
/// refresh engine rewrites and prunes these files; push-channel sessions
/// (`wrap-`, `plugin-`) are owned by their writers.
const POLLED_ID_PREFIXES: &[&str] = &["opencode-http-", "claude-log-", "codex-rpc-", "ps-"];

pub fn is_polled_session(id: &str) -> bool {
    POLLED_ID_PREFIXES.iter().any(|prefix| id.starts_with(prefix))
}

/// A read-only probe over one tool's high-fidelity channel.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Produces snapshots for the candidate processes this detector covers.
    /// Implementations must degrade to an empty vector on any failure.
    fn collect(&self, candidates: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot>;
}

/// The standard detector set, highest-fidelity channels first.
pub fn default_detectors(config: &StorageConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(OpenCodeHttpDetector::new()),
        Box::new(ClaudeLogDetector::new(config)),
        Box::new(CodexRpcDetector::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polled_prefixes_cover_scanner_and_probes() {
        assert!(is_polled_session("ps-42"));
        assert!(is_polled_session("opencode-http-42"));
        assert!(is_polled_session("claude-log-42"));
        assert!(is_polled_session("codex-rpc-42"));
        assert!(!is_polled_session("wrap-42"));
        assert!(!is_polled_session("plugin-claude_hook-abc"));
    }
}
