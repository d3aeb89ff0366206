use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Фильтр событий. `RUST_LOG` важнее конфигурации; некорректная директива
/// из конфигурации откатывается на `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    let directive = config.build_filter_directive();
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter directive '{directive}': {e}; falling back to 'info'");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    fn config(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.into(),
            ..LoggingConfig::default()
        }
    }

    /// Тест проверяет, что подробный уровень для одной цели поднимает
    /// верхнюю границу всего фильтра.
    #[test]
    #[serial]
    fn test_target_level_raises_hint() {
        env::remove_var("RUST_LOG");
        assert_eq!(
            build_filter_from_config(&config("warn")).max_level_hint(),
            Some(LevelFilter::WARN)
        );

        let mut verbose = config("warn");
        verbose
            .targets
            .insert("flight::client".into(), "trace".into());
        assert_eq!(
            build_filter_from_config(&verbose).max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }

    /// Тест проверяет, что `RUST_LOG` перекрывает конфигурацию.
    #[test]
    #[serial]
    fn test_env_overrides_config() {
        env::set_var("RUST_LOG", "debug");
        let filter = build_filter_from_config(&config("error"));
        env::remove_var("RUST_LOG");

        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    /// Тест проверяет откат на `info` при некорректной директиве.
    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        let mut config = config("error");
        config.targets.insert("flight".into(), "loud".into());
        let filter = build_filter_from_config(&config);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }
}
