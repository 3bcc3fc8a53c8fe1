//! `tracing` setup: stderr by default, switching to a non-blocking file
//! appender when `--log-file` is given. Same `registry()` + `EnvFilter` +
//! `fmt` layering the teacher's `main.rs` uses, adapted from a daily-rolling
//! file appender to a single optional log file (this is a softphone, not a
//! long-lived server).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. The returned `WorkerGuard` must be kept
/// alive for the life of the process — dropping it flushes and detaches
/// the non-blocking writer.
pub fn init(log_file: Option<&std::path::Path>) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("voicelink.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()))
        .init();

    guard
}
