//! File-backed diagnostics for the wrapper.
//!
//! The wrapper's stdout and stderr belong to the proxied tool, so tracing
//! output goes to a rolling file under the data directory instead. The
//! returned guard must stay alive for the non-blocking writer to flush.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vibebar_core::storage::StorageConfig;

pub fn init(config: &StorageConfig) -> Option<WorkerGuard> {
    let log_dir = config.log_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, "wrapper.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let initialized = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();
    initialized.then_some(guard)
}
