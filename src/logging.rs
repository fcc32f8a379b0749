use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EngineConfig;

const LOG_FILE_PREFIX: &str = "practice-engine.log";
const FALLBACK_FILTER: &str = "info";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Where and how much the engine logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    /// Daily rolling file output; console only when unset.
    pub file_dir: Option<PathBuf>,
}

impl From<&EngineConfig> for LogSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            filter: config.log_level.clone(),
            file_dir: config.log_dir.clone(),
        }
    }
}

/// Parses a filter directive, falling back to `info` on bad input.
pub fn env_filter(directive: &str) -> (EnvFilter, bool) {
    match EnvFilter::try_new(directive) {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(FALLBACK_FILTER), false),
    }
}

/// Installs the global subscriber. Console output goes to stderr so stdout
/// stays free for the runner's JSON lines. Later calls are no-ops.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let (filter, filter_ok) = env_filter(&settings.filter);
    let console = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let file = settings.file_dir.as_ref().and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            Some(tracing_appender::non_blocking(appender))
        }
        Err(err) => {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            None
        }
    });

    let guard = match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file_layer)
                .try_init();
            Some(FileLogGuard { _guard: guard })
        }
        None => {
            let _ = tracing_subscriber::registry().with(filter).with(console).try_init();
            None
        }
    };

    if !filter_ok {
        tracing::warn!(filter = %settings.filter, "invalid log filter, using info");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_falls_back() {
        assert!(env_filter("math_practice_engine=debug,info").1);
        assert!(!env_filter("math_practice_engine=loud").1);
    }

    #[test]
    fn test_settings_follow_config() {
        let config = EngineConfig {
            log_level: "debug".to_string(),
            log_dir: Some(PathBuf::from("/var/log/practice")),
            ..Default::default()
        };
        let settings = LogSettings::from(&config);
        assert_eq!(settings.filter, "debug");
        assert_eq!(settings.file_dir, Some(PathBuf::from("/var/log/practice")));
    }

    #[test]
    fn test_file_output_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("logs");
        let settings = LogSettings {
            filter: "info".to_string(),
            file_dir: Some(target.clone()),
        };
        let guard = init_tracing(&settings);
        assert!(guard.is_some());
        assert!(target.is_dir());
    }
}
