//! Claude Code transcript tailer.
//!
//! Claude Code appends JSONL transcripts under
//! `~/.claude/projects/<encoded cwd>/<session>.jsonl`. The relative recency
//! of user "turn" entries vs assistant "response" entries tells us whether
//! the model still owes a reply: a turn newer than the last response means
//! work in flight.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tracing::debug;
use walkdir::WalkDir;

use vibebar_protocol::{SessionStatus, Snapshot, SnapshotSource, Tool};

use crate::storage::StorageConfig;

use super::Detector;

/// How much of the transcript tail to inspect.
const TAIL_BYTES: u64 = 64 * 1024;

/// A transcript written to within this window counts as running even when
/// the last marker is an assistant response (the response is still
/// streaming).
const WRITE_ACTIVE_WINDOW_SECS: i64 = 2;

pub struct ClaudeLogDetector {
    projects_dir: PathBuf,
}

impl ClaudeLogDetector {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            projects_dir: config.claude_projects_dir(),
        }
    }

    fn probe(&self, candidate: &Snapshot, now: DateTime<Utc>) -> Option<Snapshot> {
        let cwd = candidate.cwd.as_deref()?;
        let project_dir = self
            .projects_dir
            .join(StorageConfig::encode_project_path(cwd));
        let transcript = newest_transcript(&project_dir)?;
        let tail = read_tail(&transcript, TAIL_BYTES)?;
        let markers = scan_markers(&tail);
        let written_at: DateTime<Utc> = fs::metadata(&transcript)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from)?;

        let status = classify_markers(&markers, written_at, now)?;

        let mut snapshot = candidate.clone();
        snapshot.id = format!("claude-log-{}", candidate.pid);
        snapshot.status = status;
        snapshot.source = SnapshotSource::ProcessScan;
        snapshot.updated_at = now;
        snapshot.last_output_at = markers.last_response;
        snapshot.last_input_at = markers.last_turn;
        snapshot.notes = Some(format!(
            "transcript {}",
            transcript
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        ));
        Some(snapshot)
    }
}

impl Detector for ClaudeLogDetector {
    fn name(&self) -> &'static str {
        "claude-log"
    }

    fn collect(&self, candidates: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot> {
        candidates
            .iter()
            .filter(|candidate| candidate.tool == Tool::Claude)
            .filter_map(|candidate| self.probe(candidate, now))
            .collect()
    }
}

#[derive(Debug, Default, PartialEq)]
struct TranscriptMarkers {
    last_turn: Option<DateTime<Utc>>,
    last_response: Option<DateTime<Utc>>,
}

fn newest_transcript(project_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(project_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.path().extension().and_then(|ext| ext.to_str()) == Some("jsonl")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

fn read_tail(path: &Path, max_bytes: u64) -> Option<String> {
    let raw = fs::read(path).ok()?;
    let skip = raw.len().saturating_sub(max_bytes as usize);
    Some(String::from_utf8_lossy(&raw[skip..]).to_string())
}

fn scan_markers(tail: &str) -> TranscriptMarkers {
    let mut markers = TranscriptMarkers::default();
    for line in tail.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(timestamp) = value
            .get("timestamp")
            .and_then(|ts| ts.as_str())
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
        else {
            continue;
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("user") => markers.last_turn = Some(markers.last_turn.map_or(timestamp, |prev| prev.max(timestamp))),
            Some("assistant") => {
                markers.last_response =
                    Some(markers.last_response.map_or(timestamp, |prev| prev.max(timestamp)))
            }
            _ => {}
        }
    }
    markers
}

fn classify_markers(
    markers: &TranscriptMarkers,
    written_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<SessionStatus> {
    match (markers.last_turn, markers.last_response) {
        (None, None) => {
            debug!("Transcript tail carried no turn or response markers");
            None
        }
        (Some(_), None) => Some(SessionStatus::Running),
        (None, Some(_)) | (Some(_), Some(_)) => {
            let turn_newer = match (markers.last_turn, markers.last_response) {
                (Some(turn), Some(response)) => turn > response,
                _ => false,
            };
            if turn_newer {
                Some(SessionStatus::Running)
            } else if (now - written_at).num_seconds() <= WRITE_ACTIVE_WINDOW_SECS {
                Some(SessionStatus::Running)
            } else {
                Some(SessionStatus::Idle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, secs).unwrap()
    }

    fn line(kind: &str, secs: u32) -> String {
        format!(
            r#"{{"type":"{kind}","timestamp":"{}","message":{{}}}}"#,
            ts(secs).to_rfc3339()
        )
    }

    #[test]
    fn scan_finds_latest_turn_and_response() {
        let tail = [
            line("user", 1),
            line("assistant", 2),
            line("user", 10),
            "not json".to_string(),
            line("assistant", 5),
        ]
        .join("\n");
        let markers = scan_markers(&tail);
        assert_eq!(markers.last_turn, Some(ts(10)));
        assert_eq!(markers.last_response, Some(ts(5)));
    }

    #[test]
    fn turn_newer_than_response_means_running() {
        let markers = TranscriptMarkers {
            last_turn: Some(ts(10)),
            last_response: Some(ts(5)),
        };
        assert_eq!(
            classify_markers(&markers, ts(10), ts(50)),
            Some(SessionStatus::Running)
        );
    }

    #[test]
    fn settled_response_means_idle() {
        let markers = TranscriptMarkers {
            last_turn: Some(ts(5)),
            last_response: Some(ts(10)),
        };
        assert_eq!(
            classify_markers(&markers, ts(10), ts(50)),
            Some(SessionStatus::Idle)
        );
    }

    #[test]
    fn freshly_written_transcript_means_running_even_after_response() {
        let markers = TranscriptMarkers {
            last_turn: Some(ts(5)),
            last_response: Some(ts(10)),
        };
        assert_eq!(
            classify_markers(&markers, ts(49), ts(50)),
            Some(SessionStatus::Running)
        );
    }

    #[test]
    fn empty_transcript_yields_no_session() {
        assert_eq!(classify_markers(&TranscriptMarkers::default(), ts(0), ts(1)), None);
    }

    #[test]
    fn newest_transcript_picks_latest_jsonl() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("-repo");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.jsonl"), "{}").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.join("new.jsonl"), "{}").unwrap();
        std::fs::write(dir.join("ignored.txt"), "{}").unwrap();

        let newest = newest_transcript(&dir).unwrap();
        assert_eq!(newest.file_name().unwrap(), "new.jsonl");
    }
}
