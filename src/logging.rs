//! Tracing subscriber setup
//!
//! Human-readable logs always go to stderr so that stdout stays reserved for
//! analysis output. When a log file is configured, a second non-blocking
//! writer mirrors every event into it (JSON lines by default).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Environment variable holding a tracing filter directive
pub const LOG_ENV: &str = "GRAVITON_PROBE_LOG";

/// Initialize the global subscriber.
///
/// The returned guard must be kept alive for the duration of the program,
/// otherwise buffered file output is lost.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_new(&config.level))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (writer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = writer
        .clone()
        .filter(|_| config.json)
        .map(|w| fmt::layer().json().with_writer(w));
    let plain_layer = writer
        .filter(|_| !config.json)
        .map(|w| fmt::layer().with_ansi(false).with_writer(w));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(json_layer)
        .with(plain_layer)
        .try_init()?;

    Ok(guard)
}
