//! Process-wide tracing setup.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::errors::{ImagingError, ImagingResult};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "griffon=info";

const LOG_FILE_PREFIX: &str = "griffon.log";

/// Install the global subscriber.
///
/// Logs go to stderr and, when `log_dir` is given, to a daily-rolling file in
/// that directory. Keep the returned guard alive until exit so buffered file
/// output is flushed.
pub fn init_logging(filter: Option<&str>, log_dir: Option<&Path>) -> ImagingResult<Option<WorkerGuard>> {
    let env_filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER)))
            .map_err(|e| ImagingError::Config(format!("invalid log filter: {}", e)))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter()?);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ImagingError::Internal(format!("logging already initialized: {}", e)))?;

    Ok(guard)
}
