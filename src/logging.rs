use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for this crate (default: INFO), overridden by `RUST_LOG`
    pub level: Level,
    /// Directory for log files. `None` disables logging, since the terminal
    /// itself is never a log target while the chat owns it.
    pub log_dir: Option<PathBuf>,
    pub log_file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_dir: default_log_dir(),
            log_file_name: "thinker-chat.log".to_string(),
        }
    }
}

pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("thinker-chat").join("logs"))
}

/// Keeps the file writer thread alive; logs written after this is dropped are lost.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(config: LoggingConfig) -> LogGuard {
    let Some(log_dir) = config.log_dir else {
        return LogGuard { _file_guard: None };
    };

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
        return LogGuard { _file_guard: None };
    }

    let level_filter = match config.level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("thinker_chat={}", level_filter)));

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, config.log_file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(non_blocking);

    // try_init: a subscriber may already be installed (tests)
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init();

    LogGuard {
        _file_guard: Some(guard),
    }
}
