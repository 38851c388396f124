//! The transparent proxy event loop.
//!
//! Single thread, one poll-with-timeout multiplexing stdin and the PTY
//! master. Every iteration also recomputes the coarse state, forwards
//! terminal size changes and persists the session snapshot on a throttle.
//! The session file is deleted on every exit path so no orphaned entry
//! survives the proxy.

use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use vibebar_core::storage::StorageConfig;
use vibebar_core::store::SessionStore;
use vibebar_protocol::{SessionStatus, Snapshot, SnapshotSource, Tool};

use crate::prompt::{PromptClassifier, PromptTuning, TermState};
use crate::pty;

const POLL_TIMEOUT_MS: i32 = 200;
const PERSIST_INTERVAL: Duration = Duration::from_millis(500);
const IO_BUF_SIZE: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    #[error("failed to prepare data directory: {0}")]
    Prepare(#[source] io::Error),

    #[error("PTY allocation failed: {0}")]
    Pty(#[source] io::Error),

    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("terminal setup failed: {0}")]
    Termios(#[source] io::Error),

    #[error("proxy I/O failed: {0}")]
    Io(#[source] io::Error),
}

/// Deletes the session file when the proxy leaves scope, on success and on
/// every error path alike.
struct SessionScope<'a> {
    store: &'a SessionStore,
    id: String,
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        self.store.delete(&self.id);
    }
}

pub fn run(tool_arg: &str, args: &[String], config: &StorageConfig) -> Result<i32, WrapError> {
    config.ensure_dirs().map_err(WrapError::Prepare)?;
    pty::ignore_sigpipe();

    let tool = tool_from_arg(tool_arg);
    let (master, slave) = pty::open_pty().map_err(WrapError::Pty)?;
    let mut child = pty::spawn_child(tool_arg, args, slave).map_err(|source| WrapError::Spawn {
        tool: tool_arg.to_string(),
        source,
    })?;

    let stdin_fd = libc::STDIN_FILENO;
    let stdout_fd = libc::STDOUT_FILENO;
    let master_fd = master.as_raw_fd();

    let _raw_mode = if pty::is_tty(stdin_fd) {
        Some(pty::RawModeGuard::enable(stdin_fd).map_err(WrapError::Termios)?)
    } else {
        None
    };

    let store = SessionStore::new(config);
    let session = SessionScope {
        store: &store,
        id: format!("wrap-{}", child.id()),
    };

    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(tool_arg.to_string());
    command.extend(args.iter().cloned());

    let mut recorder =
        SessionRecorder::new(&store, session.id.clone(), tool, child.id(), command);
    recorder.persist(SessionStatus::Running);

    let mut classifier = PromptClassifier::new(tool, PromptTuning::default());
    let mut last_output: Option<Instant> = None;
    let mut stdin_open = true;
    let mut last_size: Option<(u16, u16)> = None;
    let mut buf = [0u8; IO_BUF_SIZE];

    loop {
        forward_resize(stdout_fd, master_fd, &mut last_size);

        let mut fds = [
            libc::pollfd {
                // Negative fds are ignored by poll; stdin stops being
                // watched after its EOF without ending the session.
                fd: if stdin_open { stdin_fd } else { -1 },
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: master_fd,
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        // SAFETY: fds is a valid array of two pollfd entries.
        let rc =
            unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(WrapError::Io(err));
        }

        let now = Instant::now();

        if stdin_open && fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            match pty::read_fd(stdin_fd, &mut buf) {
                Ok(0) => stdin_open = false,
                Ok(n) => {
                    pty::write_all_fd(master_fd, &buf[..n]).map_err(WrapError::Io)?;
                    classifier.note_input(now);
                    recorder.note_input();
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(WrapError::Io(err)),
            }
        }

        let mut master_closed = false;
        if fds[1].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            match pty::read_fd(master_fd, &mut buf) {
                Ok(0) => master_closed = true,
                Ok(n) => {
                    pty::write_all_fd(stdout_fd, &buf[..n]).map_err(WrapError::Io)?;
                    classifier.note_output(&buf[..n]);
                    last_output = Some(now);
                    recorder.note_output();
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                // EIO from the master means the slave side hung up.
                Err(err) if err.raw_os_error() == Some(libc::EIO) => master_closed = true,
                Err(err) => return Err(WrapError::Io(err)),
            }
        }

        if master_closed {
            break;
        }

        classifier.tick(now);
        let status = match classifier.classify(now, last_output) {
            TermState::Running => SessionStatus::Running,
            TermState::Idle => SessionStatus::Idle,
            TermState::AwaitingInput => SessionStatus::AwaitingInput,
        };
        recorder.persist_throttled(status, now);
    }

    let status = child.wait().map_err(WrapError::Io)?;
    let code = pty::exit_code_for(status);
    info!(tool = %tool, code, "Child exited");
    drop(session);
    Ok(code)
}

/// The tool argument may be a bare name or a path; patterns key off the
/// basename.
fn tool_from_arg(tool_arg: &str) -> Tool {
    let base = Path::new(tool_arg)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(tool_arg);
    Tool::from_id(base).unwrap_or(Tool::Other)
}

fn forward_resize(terminal_fd: i32, master_fd: i32, last: &mut Option<(u16, u16)>) {
    let Some(size) = pty::terminal_size(terminal_fd) else {
        return;
    };
    if *last != Some(size) {
        pty::resize_pty(master_fd, size.0, size.1);
        *last = Some(size);
    }
}

/// Owns the wrapper's session snapshot: startup write is unconditional,
/// later writes are throttled, and persistence failure never interrupts
/// proxying.
struct SessionRecorder<'a> {
    store: &'a SessionStore,
    id: String,
    tool: Tool,
    pid: u32,
    command: Vec<String>,
    cwd: Option<String>,
    started_at: DateTime<Utc>,
    last_output_at: Option<DateTime<Utc>>,
    last_input_at: Option<DateTime<Utc>>,
    last_persist: Option<Instant>,
}

impl<'a> SessionRecorder<'a> {
    fn new(
        store: &'a SessionStore,
        id: String,
        tool: Tool,
        pid: u32,
        command: Vec<String>,
    ) -> Self {
        Self {
            store,
            id,
            tool,
            pid,
            command,
            cwd: std::env::current_dir()
                .ok()
                .map(|dir| dir.to_string_lossy().to_string()),
            started_at: Utc::now(),
            last_output_at: None,
            last_input_at: None,
            last_persist: None,
        }
    }

    fn note_output(&mut self) {
        self.last_output_at = Some(Utc::now());
    }

    fn note_input(&mut self) {
        self.last_input_at = Some(Utc::now());
    }

    fn persist(&mut self, status: SessionStatus) {
        let snapshot = Snapshot {
            id: self.id.clone(),
            tool: self.tool,
            pid: self.pid,
            parent_pid: Some(std::process::id()),
            status,
            source: SnapshotSource::Wrapper,
            started_at: self.started_at,
            updated_at: Utc::now(),
            last_output_at: self.last_output_at,
            last_input_at: self.last_input_at,
            cwd: self.cwd.clone(),
            command: self.command.clone(),
            notes: None,
        };
        if let Err(err) = self.store.write(&snapshot) {
            warn!(id = %self.id, error = %err, "Failed to persist wrapper session");
        }
        self.last_persist = Some(Instant::now());
    }

    fn persist_throttled(&mut self, status: SessionStatus, now: Instant) {
        if let Some(at) = self.last_persist {
            if now.duration_since(at) < PERSIST_INTERVAL {
                return;
            }
        }
        self.persist(status);
    }
}
