//! Crash-tolerant file-per-session persistence.
//!
//! One JSON envelope per session id. Writes go to a temp sibling and are
//! renamed into place so readers never observe a partial file. There is no
//! in-process locking: each id maps to exactly one file and concurrent
//! writers are last-writer-wins at file granularity.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tracing::{debug, warn};

use vibebar_protocol::{Envelope, Snapshot};

use crate::error::{CoreError, Result};
use crate::storage::StorageConfig;

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            dir: config.sessions_dir(),
        }
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session ids may carry arbitrary plugin-minted session tokens; anything
    /// outside a filesystem-safe alphabet becomes `-` in the file stem.
    fn file_stem(id: &str) -> String {
        id.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::file_stem(id)))
    }

    /// Serializes the versioned envelope and atomically replaces the
    /// destination (write-then-rename).
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| CoreError::io("create sessions directory", err))?;

        let path = self.path_for(&snapshot.id);
        let tmp = self.dir.join(format!(
            ".{}.tmp-{}",
            Self::file_stem(&snapshot.id),
            std::process::id()
        ));

        let envelope = Envelope::new(snapshot.clone());
        let payload = serde_json::to_vec_pretty(&envelope)
            .map_err(|err| CoreError::json("serialize session envelope", err))?;

        fs::write(&tmp, payload).map_err(|err| CoreError::io("write session temp file", err))?;
        fs::rename(&tmp, &path).map_err(|err| CoreError::io("rename session file", err))?;
        Ok(())
    }

    /// Loads one session by id. Missing, corrupt, or future-versioned files
    /// all read as absent.
    pub fn load(&self, id: &str) -> Option<Snapshot> {
        Self::read_session_file(&self.path_for(id))
    }

    /// Best-effort removal, tolerant of already-missing files.
    pub fn delete(&self, id: &str) {
        let path = self.path_for(id);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "Failed to delete session file");
            }
        }
    }

    /// Scans the directory and parses every session file. A single corrupt
    /// file never blocks the rest.
    pub fn load_all(&self) -> Vec<Snapshot> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(snapshot) = Self::read_session_file(&path) {
                sessions.push(snapshot);
            }
        }
        sessions
    }

    fn read_session_file(path: &Path) -> Option<Snapshot> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %err, "Unreadable session file");
                }
                return None;
            }
        };

        match serde_json::from_slice::<Envelope>(&raw) {
            Ok(envelope) if envelope.is_supported() => Some(envelope.session),
            Ok(envelope) => {
                warn!(
                    path = %path.display(),
                    version = envelope.version,
                    "Skipping session file with unsupported schema version"
                );
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Skipping unparsable session file");
                None
            }
        }
    }

    /// Deletes any session not in a transient state whose `updated_at` age
    /// exceeds the TTL. Returns the number of sessions removed.
    pub fn cleanup_stale_sessions(&self, now: DateTime<Utc>, idle_ttl: chrono::Duration) -> usize {
        let mut removed = 0;
        for snapshot in self.load_all() {
            if snapshot.status.is_transient() {
                continue;
            }
            if now - snapshot.updated_at > idle_ttl {
                debug!(id = %snapshot.id, "Purging stale session");
                self.delete(&snapshot.id);
                removed += 1;
            }
        }
        removed
    }

    /// Removes duplicate files for the same OS process other than the one
    /// just written. Plugins may mint a new session id per reconnect, and
    /// only the freshest row per pid should survive.
    pub fn delete_other_sessions(&self, pid: u32, keeping: &str) -> usize {
        let mut removed = 0;
        for snapshot in self.load_all() {
            if snapshot.pid == pid && snapshot.id != keeping {
                debug!(id = %snapshot.id, pid, "Removing duplicate session for pid");
                self.delete(&snapshot.id);
                removed += 1;
            }
        }
        removed
    }
}
