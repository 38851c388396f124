//! vibebar-agent entrypoint.
//!
//! A small, long-lived service that ingests structured lifecycle events from
//! tool plugins over a local Unix socket and normalizes them into session
//! files. Connections are handled fully and synchronously, one at a time;
//! event payloads are small and infrequent.

use std::env;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::Parser;
use fs_err as fs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vibebar_core::storage::{self, StorageConfig};
use vibebar_core::store::SessionStore;

mod server;

const SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "vibebar-agent")]
#[command(about = "Plugin event agent for vibebar session tracking")]
#[command(version)]
struct Cli {
    /// Socket path to bind (defaults to VIBEBAR_AGENT_SOCKET, then
    /// ~/.vibebar/agent.sock)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Log at debug verbosity
    #[arg(long)]
    verbose: bool,

    /// Print the resolved socket path and exit
    #[arg(long)]
    print_socket_path: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = StorageConfig::default();
    let socket_path = cli
        .socket_path
        .clone()
        .unwrap_or_else(|| config.socket_path());

    if cli.print_socket_path {
        println!("{}", socket_path.display());
        return;
    }

    init_logging(cli.verbose);

    if let Err(err) = config.ensure_dirs() {
        error!(error = %err, "Failed to prepare vibebar data directory");
        std::process::exit(1);
    }

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare agent socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match std::os::unix::net::UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind agent socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        heartbeat_ms = storage::plugin_heartbeat_interval().as_millis(),
        "vibebar agent started"
    );

    let store = SessionStore::new(&config);
    spawn_session_sweeper(SessionStore::new(&config));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => server::handle_connection(stream, &store),
            Err(err) => {
                warn!(error = %err, "Failed to accept agent connection");
            }
        }
    }
}

fn spawn_session_sweeper(store: SessionStore) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS));
        let (stale, dead) =
            server::sweep_sessions(&store, chrono::Utc::now(), storage::idle_session_ttl());
        if stale > 0 || dead > 0 {
            info!(stale, dead, "Swept sessions");
        }
    });
}

fn init_logging(verbose: bool) {
    let debug_enabled = verbose
        || env::var("VIBEBAR_DEBUG_LOG")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}
