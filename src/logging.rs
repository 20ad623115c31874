use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialise logging. Debug mode defaults to `debug` and honours
/// `RUST_LOG`; otherwise the level is pinned to `info`.
///
/// When `file` is given, events are also appended to that file through a
/// non-blocking writer whose guard lives for the rest of the process.
/// Calling this more than once is harmless: later calls are ignored.
pub fn init(debug: bool, file: Option<PathBuf>) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let file_layer = file.and_then(|path| {
        let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let name = path.file_name()?.to_os_string();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            eprintln!("log directory {} unavailable: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if FILE_GUARD.set(guard).is_err() {
            return None;
        }
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}
