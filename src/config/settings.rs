use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use flight_error::{FlightResult, ResultExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::{
    client::{Chunk, DecodeOptions, ModuleLoading, ModuleMap},
    logging::LoggingConfig,
    server::{EncodeOptions, DEFAULT_LONG_STRING_THRESHOLD},
    stream::{create_from_reader_with_capacity, ReadDriver, DEFAULT_READ_BUFFER_SIZE},
};

/// Настройки обеих сторон потока.
///
/// Источники по возрастанию приоритета: значения по умолчанию, файл (если
/// задан) и переменные окружения `FLIGHT_*`. Вложенные ключи разделяются
/// `__`, например `FLIGHT_LOGGING__LEVEL=debug`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Строки длиннее этого числа байт выносятся в отдельную строку `T`.
    pub long_string_threshold: usize,
    /// Размер буфера чтения драйвера.
    pub read_buffer_size: usize,
    /// Nonce для инструкций загрузки модулей.
    pub nonce: Option<String>,
    pub module_prefix: String,
    pub cross_origin: Option<String>,
    /// JSON-файл с картой модулей потребителя.
    pub module_map_path: Option<PathBuf>,
    pub strict_module_map: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// То же, что [`load`](Self::load), но сначала читает файл (toml, yaml,
    /// json по расширению). Окружение важнее файла.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("long_string_threshold", DEFAULT_LONG_STRING_THRESHOLD as i64)?
            .set_default("read_buffer_size", DEFAULT_READ_BUFFER_SIZE as i64)?
            .set_default("module_prefix", "")?
            .set_default("strict_module_map", false)
    }

    fn environment() -> Environment {
        Environment::with_prefix("FLIGHT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            long_string_threshold: self.long_string_threshold,
        }
    }

    /// Параметры декодирования; карта модулей читается с диска, если задан
    /// путь.
    pub fn decode_options(&self) -> FlightResult<DecodeOptions> {
        let module_map = match &self.module_map_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading module map {}", path.display()))?;
                Some(ModuleMap::from_json(&json).context("parsing module map")?)
            }
            None => None,
        };

        Ok(DecodeOptions {
            module_map,
            module_loading: Some(ModuleLoading {
                prefix: self.module_prefix.clone(),
                cross_origin: self.cross_origin.clone(),
            }),
            nonce: self.nonce.clone(),
            loader: None,
            strict_module_map: self.strict_module_map,
        })
    }

    /// Сессия над `reader` с параметрами декодирования и буфером чтения из
    /// настроек.
    pub fn reader<R>(
        &self,
        reader: R,
    ) -> FlightResult<(Chunk, ReadDriver<R>)>
    where
        R: AsyncRead + Unpin,
    {
        Ok(create_from_reader_with_capacity(
            reader,
            self.decode_options()?,
            self.read_buffer_size,
        ))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            long_string_threshold: DEFAULT_LONG_STRING_THRESHOLD,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            nonce: None,
            module_prefix: String::new(),
            cross_origin: None,
            module_map_path: None,
            strict_module_map: false,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;

    const VARS: [&str; 5] = [
        "FLIGHT_LONG_STRING_THRESHOLD",
        "FLIGHT_READ_BUFFER_SIZE",
        "FLIGHT_NONCE",
        "FLIGHT_MODULE_PREFIX",
        "FLIGHT_LOGGING__LEVEL",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    /// Тест проверяет значения по умолчанию без окружения.
    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(settings.encode_options(), EncodeOptions::default());
    }

    /// Тест проверяет переопределение через `FLIGHT_*`, включая вложенные
    /// ключи логирования.
    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("FLIGHT_LONG_STRING_THRESHOLD", "64");
        env::set_var("FLIGHT_NONCE", "r4nd0m");
        env::set_var("FLIGHT_MODULE_PREFIX", "/static");
        env::set_var("FLIGHT_LOGGING__LEVEL", "debug");

        let settings = Settings::load();
        clear_env();
        let settings = settings.unwrap();

        assert_eq!(settings.long_string_threshold, 64);
        assert_eq!(settings.nonce.as_deref(), Some("r4nd0m"));
        assert_eq!(settings.logging.level, "debug");

        let options = settings.decode_options().unwrap();
        assert_eq!(options.nonce.as_deref(), Some("r4nd0m"));
        assert_eq!(options.module_loading.unwrap().prefix, "/static");
        assert!(options.module_map.is_none());
    }

    /// Тест проверяет чтение файла настроек и карты модулей с диска.
    #[test]
    #[serial]
    fn test_load_from_file_with_module_map() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();

        let map_path = dir.path().join("module-map.json");
        std::fs::write(
            &map_path,
            r#"{"client/a.js": {"*": {"id": "ssr/a.js", "chunks": [], "name": "*"}}}"#,
        )
        .unwrap();

        let settings_path = dir.path().join("flight.toml");
        let mut file = std::fs::File::create(&settings_path).unwrap();
        writeln!(file, "strict_module_map = true").unwrap();
        writeln!(file, "module_map_path = {:?}", map_path.display().to_string()).unwrap();
        drop(file);

        let settings = Settings::load_from(&settings_path).unwrap();
        assert!(settings.strict_module_map);
        let options = settings.decode_options().unwrap();
        assert!(options.strict_module_map);
        assert!(options.module_map.is_some());
    }

    /// Тест проверяет, что `FLIGHT_READ_BUFFER_SIZE` доходит до драйвера
    /// чтения, а поток по-прежнему собирается.
    #[tokio::test]
    #[serial]
    async fn test_read_buffer_size_reaches_driver() {
        clear_env();
        env::set_var("FLIGHT_READ_BUFFER_SIZE", "3");
        let settings = Settings::load();
        clear_env();
        let settings = settings.unwrap();
        assert_eq!(settings.read_buffer_size, 3);

        let (client, mut server) = tokio::io::duplex(64);
        let (root, driver) = settings.reader(client).unwrap();
        assert_eq!(driver.buffer_size(), 3);

        tokio::io::AsyncWriteExt::write_all(&mut server, b"0:J[1,\"two\"]\n")
            .await
            .unwrap();
        drop(server);
        driver.run().await.unwrap();
        assert_eq!(
            root.value(),
            Some(crate::Value::Array(vec![
                crate::Value::Int(1),
                crate::Value::from("two"),
            ]))
        );
    }

    #[test]
    #[serial]
    fn test_missing_module_map_file() {
        clear_env();
        let settings = Settings {
            module_map_path: Some(PathBuf::from("/nonexistent/module-map.json")),
            ..Settings::default()
        };
        assert!(settings.decode_options().is_err());
    }
}
