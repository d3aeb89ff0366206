use std::io::{self, Stdout};

use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой по конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    formatter::build_layer(config.console.format, &config.console, writer)
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::LogFormat;

    /// Тест проверяет, что слой любого формата регистрируется и логирует без
    /// паники.
    #[test]
    fn test_layer_with_each_format() {
        for format in [LogFormat::Compact, LogFormat::Pretty, LogFormat::Json] {
            let mut config = LoggingConfig::default();
            config.console.format = format;
            config.console.with_ansi = false;

            let subscriber = Registry::default().with(layer_with_config::<Registry>(&config));
            tracing::subscriber::with_default(subscriber, || {
                info!(?format, "console layer smoke test");
            });
        }
    }
}
