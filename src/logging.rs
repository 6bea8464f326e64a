use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer flushing; drop it on shutdown.
pub struct LogGuard {
    _worker: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub filter: String,
    /// Daily rolling file output next to stdout when set.
    pub file_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl LogOptions {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            file_dir: None,
            file_prefix: "scheduler.log".to_string(),
        }
    }

    /// File output is enabled by `ENABLE_FILE_LOGS=true|1` and written to
    /// `SCHEDULER_LOG_DIR` (default `./logs`).
    pub fn from_env(filter: impl Into<String>) -> Self {
        let mut options = Self::new(filter);
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if enabled {
            let dir = std::env::var("SCHEDULER_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
            options.file_dir = Some(PathBuf::from(dir));
        }
        options
    }
}

/// Installs the global subscriber. Only the first call wins; later calls
/// return `None` and leave the installed subscriber alone.
pub fn init_tracing(options: &LogOptions) -> Option<LogGuard> {
    let env_filter =
        EnvFilter::try_new(&options.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guard = None;
    let file_layer = options.file_dir.as_ref().and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("log directory {} unusable: {err}", dir.display());
            return None;
        }
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, &options.file_prefix);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard = Some(LogGuard { _worker: worker });
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        guard
    } else {
        None
    }
}
