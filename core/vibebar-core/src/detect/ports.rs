//! Listening-port discovery for local status probes.
//!
//! Tries the process's own command line first (`--port N`, `host:port`
//! arguments), then falls back to an `lsof` query scoped to the pid.

use std::process::Command;

use tracing::debug;

pub(crate) fn discover_listen_port(pid: u32, command: &[String]) -> Option<u16> {
    port_from_args(command).or_else(|| port_from_lsof(pid))
}

fn port_from_args(command: &[String]) -> Option<u16> {
    let mut tokens = command.iter().peekable();
    while let Some(token) = tokens.next() {
        if token == "--port" || token == "-p" {
            if let Some(next) = tokens.peek() {
                if let Ok(port) = next.parse::<u16>() {
                    return Some(port);
                }
            }
            continue;
        }
        if let Some(value) = token.strip_prefix("--port=") {
            if let Ok(port) = value.parse::<u16>() {
                return Some(port);
            }
            continue;
        }
        // host:port forms like 127.0.0.1:4096 or localhost:4096
        if let Some((host, port)) = token.rsplit_once(':') {
            if matches!(host, "127.0.0.1" | "localhost" | "0.0.0.0") {
                if let Ok(port) = port.parse::<u16>() {
                    return Some(port);
                }
            }
        }
    }
    None
}

/// `lsof -a -p <pid> -iTCP -sTCP:LISTEN -P -n -Fn` prints one `n`-prefixed
/// name field per listening socket, e.g. `n127.0.0.1:4096` or `n*:4096`.
fn port_from_lsof(pid: u32) -> Option<u16> {
    let output = Command::new("lsof")
        .args([
            "-a",
            "-p",
            &pid.to_string(),
            "-iTCP",
            "-sTCP:LISTEN",
            "-P",
            "-n",
            "-Fn",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(pid, "lsof returned no listening sockets");
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_lsof_ports(&stdout).into_iter().min()
}

fn parse_lsof_ports(stdout: &str) -> Vec<u16> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter_map(|name| name.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse::<u16>().ok())
        .collect()
}
