//! C11 — process-wide tracing initialization (§2 ambient stack).
//!
//! A `tracing_subscriber::fmt()` + `EnvFilter` setup, with an optional
//! rolling file appender so the server can log to disk in addition to
//! stderr.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

const DEFAULT_FILTER: &str = "relay=info,tower_http=info";

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG` if set, otherwise falls back to [`DEFAULT_FILTER`].
/// When `log_dir` is provided, logs are additionally written to a daily
/// rolling file there; the returned [`WorkerGuard`] must be held for the
/// lifetime of the process or buffered log lines may be lost on exit.
pub fn init(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "dental-relay.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking.and(std::io::stderr))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
            None
        }
    }
}
