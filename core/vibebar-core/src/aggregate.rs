//! Per-tool and global summaries over the merged session set.
//!
//! Summaries are derived on every pass and never persisted. Ordering is
//! deterministic: most recent first, ties broken by lowest pid, tools in
//! their declared order.

use serde::Serialize;

use vibebar_protocol::{SessionStatus, Snapshot, Tool};

/// One resolved activity state per tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    Running,
    AwaitingInput,
    Idle,
    Unknown,
    /// No live sessions for this tool.
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub tool: Tool,
    pub running: usize,
    pub awaiting_input: usize,
    pub idle: usize,
    pub unknown: usize,
    pub overall: OverallState,
}

impl ToolSummary {
    pub fn total(&self) -> usize {
        self.running + self.awaiting_input + self.idle + self.unknown
    }

    fn from_counts(tool: Tool, counts: StatusCounts) -> Self {
        let overall = counts.resolve_overall();
        Self {
            tool,
            running: counts.running,
            awaiting_input: counts.awaiting_input,
            idle: counts.idle,
            unknown: counts.unknown,
            overall,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummary {
    /// One entry per supported tool, in `Tool::ALL` order, plus trailing
    /// entries for any unrecognized tools that produced sessions.
    pub tools: Vec<ToolSummary>,
    pub running: usize,
    pub awaiting_input: usize,
    pub idle: usize,
    pub unknown: usize,
    /// The merged live set, most recent first.
    pub sessions: Vec<Snapshot>,
}

impl GlobalSummary {
    pub fn total(&self) -> usize {
        self.running + self.awaiting_input + self.idle + self.unknown
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StatusCounts {
    running: usize,
    awaiting_input: usize,
    idle: usize,
    unknown: usize,
}

impl StatusCounts {
    fn add(&mut self, status: SessionStatus) {
        match status {
            SessionStatus::Running => self.running += 1,
            SessionStatus::AwaitingInput => self.awaiting_input += 1,
            SessionStatus::Idle => self.idle += 1,
            SessionStatus::Unknown => self.unknown += 1,
        }
    }

    fn total(&self) -> usize {
        self.running + self.awaiting_input + self.idle + self.unknown
    }

    /// Fixed priority: running > awaiting_input > idle > unknown, with
    /// stopped reserved for empty buckets.
    fn resolve_overall(&self) -> OverallState {
        if self.total() == 0 {
            OverallState::Stopped
        } else if self.running > 0 {
            OverallState::Running
        } else if self.awaiting_input > 0 {
            OverallState::AwaitingInput
        } else if self.idle > 0 {
            OverallState::Idle
        } else {
            OverallState::Unknown
        }
    }
}

/// Stable sort: `updated_at` descending, ties broken by `pid` ascending.
pub fn sort_sessions(sessions: &mut [Snapshot]) {
    sessions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.pid.cmp(&b.pid))
    });
}

/// Folds the merged live set into per-tool and global summaries.
pub fn summarize(mut sessions: Vec<Snapshot>) -> GlobalSummary {
    sort_sessions(&mut sessions);

    let mut global = StatusCounts::default();
    let mut per_tool: Vec<(Tool, StatusCounts)> = Tool::ALL
        .iter()
        .map(|tool| (*tool, StatusCounts::default()))
        .collect();

    for session in &sessions {
        global.add(session.status);
        match per_tool.iter_mut().find(|(tool, _)| *tool == session.tool) {
            Some((_, counts)) => counts.add(session.status),
            None => {
                let mut counts = StatusCounts::default();
                counts.add(session.status);
                per_tool.push((session.tool, counts));
            }
        }
    }

    GlobalSummary {
        tools: per_tool
            .into_iter()
            .map(|(tool, counts)| ToolSummary::from_counts(tool, counts))
            .collect(),
        running: global.running,
        awaiting_input: global.awaiting_input,
        idle: global.idle,
        unknown: global.unknown,
        sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use vibebar_protocol::SnapshotSource;

    fn snapshot(pid: u32, tool: Tool, status: SessionStatus, updated_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            id: format!("ps-{pid}"),
            tool,
            pid,
            parent_pid: None,
            status,
            source: SnapshotSource::ProcessScan,
            started_at: updated_at,
            updated_at,
            last_output_at: None,
            last_input_at: None,
            cwd: None,
            command: vec![],
            notes: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn sessions_sort_most_recent_then_lowest_pid() {
        let t = t0();
        let mut sessions = vec![
            snapshot(200, Tool::Claude, SessionStatus::Idle, t),
            snapshot(100, Tool::Claude, SessionStatus::Idle, t),
            snapshot(50, Tool::Claude, SessionStatus::Idle, t + chrono::Duration::seconds(5)),
        ];
        sort_sessions(&mut sessions);
        let pids: Vec<u32> = sessions.iter().map(|s| s.pid).collect();
        assert_eq!(pids, vec![50, 100, 200]);
    }

    #[test]
    fn mixed_bucket_resolves_to_running() {
        let t = t0();
        let summary = summarize(vec![
            snapshot(1, Tool::Claude, SessionStatus::Idle, t),
            snapshot(2, Tool::Claude, SessionStatus::Idle, t),
            snapshot(3, Tool::Claude, SessionStatus::Running, t),
        ]);
        let claude = summary
            .tools
            .iter()
            .find(|entry| entry.tool == Tool::Claude)
            .unwrap();
        assert_eq!(claude.idle, 2);
        assert_eq!(claude.running, 1);
        assert_eq!(claude.overall, OverallState::Running);
    }

    #[test]
    fn awaiting_input_outranks_idle() {
        let t = t0();
        let summary = summarize(vec![
            snapshot(1, Tool::Codex, SessionStatus::Idle, t),
            snapshot(2, Tool::Codex, SessionStatus::AwaitingInput, t),
        ]);
        let codex = summary
            .tools
            .iter()
            .find(|entry| entry.tool == Tool::Codex)
            .unwrap();
        assert_eq!(codex.overall, OverallState::AwaitingInput);
    }

    #[test]
    fn tools_without_sessions_read_stopped() {
        let summary = summarize(vec![]);
        assert_eq!(summary.tools.len(), Tool::ALL.len());
        assert!(summary
            .tools
            .iter()
            .all(|entry| entry.overall == OverallState::Stopped));
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn global_counts_union_all_tool_buckets() {
        let t = t0();
        let summary = summarize(vec![
            snapshot(1, Tool::Claude, SessionStatus::Running, t),
            snapshot(2, Tool::Codex, SessionStatus::AwaitingInput, t),
            snapshot(3, Tool::Aider, SessionStatus::Unknown, t),
        ]);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.awaiting_input, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.idle, 0);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn unrecognized_tool_gets_a_trailing_bucket() {
        let t = t0();
        let summary = summarize(vec![snapshot(9, Tool::Other, SessionStatus::Idle, t)]);
        assert_eq!(summary.tools.len(), Tool::ALL.len() + 1);
        let other = summary.tools.last().unwrap();
        assert_eq!(other.tool, Tool::Other);
        assert_eq!(other.overall, OverallState::Idle);
    }
}
