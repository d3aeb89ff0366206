//! Логирование на `tracing`: фильтр из конфигурации (или `RUST_LOG`),
//! консольный и файловый слои.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

use std::path::PathBuf;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Invalid logging config: {0}")]
    InvalidConfig(String),
    #[error("Cannot create log directory {}: {source}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Инициализация логирования с конфигурацией.
///
/// Ставит глобальный subscriber; повторный вызов вернёт
/// [`LoggingError::AlreadyInitialized`].
pub fn init_logging(config: LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers = Vec::new();

    if config.console.enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file.enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("FLIGHT_GIT_COMMIT"),
        built = env!("FLIGHT_BUILD_TIME"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console_enabled = config.console.enabled,
        file_enabled = config.file.enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}

#[cfg(test)]
mod tests {
    /// Тест проверяет, что сборочный скрипт проставил метаданные сборки.
    #[test]
    fn test_build_metadata() {
        let commit = env!("FLIGHT_GIT_COMMIT");
        assert!(!commit.is_empty());
        assert!(!commit.contains(char::is_whitespace));

        let built = env!("FLIGHT_BUILD_TIME");
        assert!(chrono_like_rfc3339(built), "{built}");
    }

    fn chrono_like_rfc3339(s: &str) -> bool {
        s.len() >= 20 && s.as_bytes()[4] == b'-' && s.as_bytes()[10] == b'T'
    }
}
