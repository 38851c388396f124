//! vibebar-wrap: transparent terminal interception wrapper.
//!
//! `vibebar-wrap <tool> [--] [args...]` proxies an interactive tool through
//! a pseudo-terminal while inferring its activity state from the byte
//! stream. `vibebar-wrap notify <tool> <state> [key=value...]` sends a
//! one-shot event to the agent instead.
//!
//! Exit codes: the proxied child's translated code on success, 1 on internal
//! failure, 2 on usage errors, 3 when notify delivery fails.

use clap::{Parser, Subcommand};

use vibebar_core::storage::StorageConfig;

mod logging;
mod notify;
mod prompt;
mod proxy;
mod pty;

#[derive(Parser)]
#[command(name = "vibebar-wrap")]
#[command(about = "Transparent PTY wrapper with session state detection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a one-shot status event to the agent
    Notify {
        /// Tool the event is about (claude, codex, ...)
        tool: String,

        /// Reported state (running, idle, awaiting_input, ...)
        state: String,

        /// Additional fields; session=, pid=, cwd= and note= are reserved
        #[arg(value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },

    /// Any other invocation proxies the named tool
    #[command(external_subcommand)]
    Run(Vec<String>),
}

fn main() {
    let cli = Cli::parse();
    let config = StorageConfig::default();
    let _log_guard = logging::init(&config);

    match cli.command {
        Commands::Notify { tool, state, pairs } => {
            if let Err(err) = notify::send(&tool, &state, &pairs, &config) {
                tracing::error!(error = %err, "Notify delivery failed");
                eprintln!("vibebar-wrap: notify failed: {err}");
                std::process::exit(3);
            }
        }
        Commands::Run(mut invocation) => {
            let tool = invocation.remove(0);
            if invocation.first().map(String::as_str) == Some("--") {
                invocation.remove(0);
            }
            match proxy::run(&tool, &invocation, &config) {
                Ok(code) => std::process::exit(code),
                Err(err) => {
                    tracing::error!(error = %err, tool = %tool, "Wrapper failed");
                    eprintln!("vibebar-wrap: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}
