//! The periodic detection cycle.
//!
//! The presentation layer drives this on a fixed timer (≈1 s). Each pass
//! runs the poll-driven channels, unions their snapshots with the
//! push-channel sessions already on disk (wrapper, plugin), dedups, persists
//! the polled winners, prunes polled files whose process has exited, ages
//! out stale sessions and returns the folded summary.

use chrono::{DateTime, Utc};
use tracing::warn;

use vibebar_protocol::Snapshot;

use crate::aggregate::{summarize, GlobalSummary};
use crate::detect::{self, Detector};
use crate::merge::merge_snapshots;
use crate::scan::ProcessScanner;
use crate::storage::{self, StorageConfig};
use crate::store::SessionStore;

pub struct RefreshEngine {
    store: SessionStore,
    scanner: ProcessScanner,
    detectors: Vec<Box<dyn Detector>>,
    idle_ttl: chrono::Duration,
}

impl RefreshEngine {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            store: SessionStore::new(config),
            scanner: ProcessScanner::new(),
            detectors: detect::default_detectors(config),
            idle_ttl: storage::idle_session_ttl(),
        }
    }

    /// Assembles an engine from explicit parts, for tests and embedders.
    pub fn with_parts(
        store: SessionStore,
        scanner: ProcessScanner,
        detectors: Vec<Box<dyn Detector>>,
        idle_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            scanner,
            detectors,
            idle_ttl,
        }
    }

    pub fn refresh(&mut self, now: DateTime<Utc>) -> GlobalSummary {
        let scanned = self.scanner.scan(now);
        let mut union: Vec<Snapshot> = scanned.clone();
        for detector in &self.detectors {
            union.extend(detector.collect(&scanned, now));
        }

        // Push-channel sessions pass through from disk. Polled files are
        // only trusted when this tick reproduced them; a missing process
        // means the session ended and its file goes too.
        for stored in self.store.load_all() {
            if detect::is_polled_session(&stored.id) {
                if !union.iter().any(|snapshot| snapshot.id == stored.id) {
                    self.store.delete(&stored.id);
                }
                continue;
            }
            union.push(stored);
        }

        let merged = merge_snapshots(union);

        for snapshot in &merged {
            if detect::is_polled_session(&snapshot.id) {
                if let Err(err) = self.store.write(snapshot) {
                    warn!(id = %snapshot.id, error = %err, "Failed to persist polled session");
                }
            }
        }

        self.store.cleanup_stale_sessions(now, self.idle_ttl);

        summarize(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vibebar_protocol::{SessionStatus, SnapshotSource, Tool};

    struct StubDetector {
        sessions: Vec<Snapshot>,
    }

    impl StubDetector {
        fn new(sessions: Vec<Snapshot>) -> Self {
            Self { sessions }
        }
    }

    impl Detector for StubDetector {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn collect(&self, _candidates: &[Snapshot], _now: DateTime<Utc>) -> Vec<Snapshot> {
            self.sessions.clone()
        }
    }

    fn snapshot(id: &str, tool: Tool, pid: u32, status: SessionStatus) -> Snapshot {
        let t = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        Snapshot {
            id: id.to_string(),
            tool,
            pid,
            parent_pid: None,
            status,
            source: SnapshotSource::ProcessScan,
            started_at: t,
            updated_at: t,
            last_output_at: None,
            last_input_at: None,
            cwd: None,
            command: vec![],
            notes: None,
        }
    }

    #[test]
    fn refresh_persists_polled_winners_and_keeps_push_sessions() {
        let temp = tempfile::tempdir().unwrap();
        let store = SessionStore::with_dir(temp.path().join("sessions"));
        let mut wrap = snapshot("wrap-9", Tool::Claude, 9, SessionStatus::Running);
        wrap.source = SnapshotSource::Wrapper;
        store.write(&wrap).unwrap();

        let detector = StubDetector::new(vec![snapshot(
            "opencode-http-5",
            Tool::OpenCode,
            5,
            SessionStatus::Idle,
        )]);
        let mut engine = RefreshEngine::with_parts(
            SessionStore::with_dir(temp.path().join("sessions")),
            ProcessScanner::new(),
            vec![Box::new(detector)],
            chrono::Duration::minutes(10),
        );

        let now = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 5).unwrap();
        let summary = engine.refresh(now);

        let ids: Vec<&str> = summary.sessions.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"wrap-9"));
        assert!(ids.contains(&"opencode-http-5"));
        assert!(store.load("opencode-http-5").is_some());
        assert!(store.load("wrap-9").is_some());
    }

    #[test]
    fn refresh_prunes_polled_files_for_exited_processes() {
        let temp = tempfile::tempdir().unwrap();
        let store = SessionStore::with_dir(temp.path().join("sessions"));
        store
            .write(&snapshot("ps-77", Tool::Codex, 77, SessionStatus::Running))
            .unwrap();

        let mut engine = RefreshEngine::with_parts(
            SessionStore::with_dir(temp.path().join("sessions")),
            ProcessScanner::new(),
            vec![Box::new(StubDetector::new(vec![]))],
            chrono::Duration::minutes(10),
        );

        let now = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 5).unwrap();
        let summary = engine.refresh(now);

        assert!(store.load("ps-77").is_none());
        assert!(!summary
            .sessions
            .iter()
            .any(|session| session.id == "ps-77"));
    }
}
