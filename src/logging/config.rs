use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

use super::LoggingError;

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Префикс имени файла; к нему добавляется дата.
    pub file_name: String,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень по умолчанию: trace, debug, info, warn, error.
    pub level: String,
    /// Уровни для отдельных целей, например `flight::client = "trace"`.
    pub targets: BTreeMap<String, String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    /// Директива для `EnvFilter`: уровень по умолчанию и уровни целей.
    pub fn build_filter_directive(&self) -> String {
        let mut directive = self.level.clone();
        for (target, level) in &self.targets {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(level);
        }
        directive
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let levels = std::iter::once(&self.level).chain(self.targets.values());
        for level in levels {
            if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                return Err(LoggingError::InvalidLevel(level.clone()));
            }
        }
        if self.file.enabled && self.file.file_name.is_empty() {
            return Err(LoggingError::InvalidConfig(
                "file logging needs a file name".to_string(),
            ));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.log_dir).map_err(|source| LoggingError::LogDir {
                path: self.log_dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            file_name: "flight.log".to_string(),
        }
    }
}
