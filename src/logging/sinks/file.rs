use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{ConsoleConfig, LoggingConfig},
    formatter,
};

/// Файловый слой с ежедневной ротацией. Запись идёт через фоновый поток,
/// guard нужно держать до конца работы.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = rolling::daily(&config.log_dir, &config.file.file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let options = ConsoleConfig {
        with_ansi: false,
        ..config.console.clone()
    };
    let layer = formatter::build_layer(config.file.format, &options, writer);
    (layer, guard)
}
