use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

// Hold the non-blocking writer guard to keep the background logging
// thread alive for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initializes tracing with an env-filter and stdout output, bridging
/// the `log` macros used throughout the workspace. Safe to call once per
/// process; later calls are ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = LogTracer::init();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Like [`init`], but additionally appends logs to a daily-rotated file
/// under `dir`.
pub fn init_with_file(default_level: &str, dir: &str, prefix: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);

    let _ = LogTracer::init();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
}
