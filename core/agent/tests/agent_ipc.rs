use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

struct AgentGuard {
    child: Child,
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_agent(home: &Path, socket: &Path) -> AgentGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_vibebar-agent"))
        .arg("--socket-path")
        .arg(socket)
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn vibebar-agent");
    AgentGuard { child }
}

fn sessions_dir(home: &Path) -> PathBuf {
    home.join(".vibebar").join("sessions")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for agent socket at {}", path.display());
}

fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for {}", what);
}

fn send_lines(socket: &Path, lines: &[&str]) {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to agent socket");
    for line in lines {
        stream.write_all(line.as_bytes()).expect("write line");
        stream.write_all(b"\n").expect("write newline");
    }
    stream.flush().ok();
    // Fire-and-forget: closing the stream signals EOF to the agent.
}

fn event_line(session_id: &str, event_type: &str, timestamp: &str) -> String {
    format!(
        r#"{{"source":"claude_hook","tool":"claude","sessionId":"{session_id}","eventType":"{event_type}","timestamp":"{timestamp}","pid":{pid},"cwd":"/repo"}}"#,
        pid = std::process::id(),
    )
}

#[test]
fn events_create_and_delete_session_files() {
    let temp = TempDir::new().expect("temp home");
    let socket = temp.path().join("agent.sock");
    let _agent = spawn_agent(temp.path(), &socket);
    wait_for_socket(&socket, Duration::from_secs(10));

    send_lines(
        &socket,
        &[&event_line("it-1", "tool_started", "2026-02-01T09:00:00Z")],
    );

    let session_file = sessions_dir(temp.path()).join("plugin-claude_hook-it-1.json");
    wait_for("session file to appear", Duration::from_secs(10), || {
        session_file.exists()
    });

    let raw = std::fs::read_to_string(&session_file).expect("read session file");
    let envelope: serde_json::Value = serde_json::from_str(&raw).expect("parse envelope");
    assert_eq!(envelope["version"], 1);
    assert_eq!(envelope["session"]["status"], "running");
    assert_eq!(envelope["session"]["tool"], "claude");

    send_lines(
        &socket,
        &[&event_line("it-1", "SessionEnd", "2026-02-01T09:00:05Z")],
    );
    wait_for("session file to disappear", Duration::from_secs(10), || {
        !session_file.exists()
    });
}

#[test]
fn malformed_lines_do_not_poison_the_connection() {
    let temp = TempDir::new().expect("temp home");
    let socket = temp.path().join("agent.sock");
    let _agent = spawn_agent(temp.path(), &socket);
    wait_for_socket(&socket, Duration::from_secs(10));

    let good = event_line("it-2", "permission_request", "2026-02-01T09:00:00Z");
    send_lines(&socket, &["{definitely not json", "", &good]);

    let session_file = sessions_dir(temp.path()).join("plugin-claude_hook-it-2.json");
    wait_for("session file to appear", Duration::from_secs(10), || {
        session_file.exists()
    });

    let raw = std::fs::read_to_string(&session_file).expect("read session file");
    let envelope: serde_json::Value = serde_json::from_str(&raw).expect("parse envelope");
    assert_eq!(envelope["session"]["status"], "awaiting_input");
}

#[test]
fn print_socket_path_honors_flag() {
    let temp = TempDir::new().expect("temp home");
    let output = Command::new(env!("CARGO_BIN_EXE_vibebar-agent"))
        .arg("--socket-path")
        .arg(temp.path().join("custom.sock"))
        .arg("--print-socket-path")
        .env("HOME", temp.path())
        .output()
        .expect("run vibebar-agent");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().ends_with("custom.sock"));
}
