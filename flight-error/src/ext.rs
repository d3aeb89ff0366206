use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок протокола (object-safe).
///
/// Все ошибки Flight проходят через этот трейт, чтобы кодек, энкодер и
/// декодер одинаково отдавали:
/// - статус-код,
/// - безопасное сообщение для потребителя потока,
/// - признак фатальности для сессии декодирования,
/// - теги для систем наблюдаемости.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Протокольный статус.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`](std::any::Any), чтобы можно было
    /// выполнить downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно отдать потребителю (например, записать в
    /// строку ошибки `E`). Внутренние ошибки не раскрывают деталей.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Ломает ли ошибка всю сессию декодирования, а не одно поддерево.
    fn is_fatal(&self) -> bool {
        self.status_code().is_fatal()
    }

    /// Набор тегов для метрик: пары ключ–значение.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Имя типа ошибки без пути модуля.
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, fmt};

    use super::*;

    #[derive(Debug)]
    struct PlainError(&'static str);

    impl fmt::Display for PlainError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "plain: {}", self.0)
        }
    }

    impl Error for PlainError {}

    impl ErrorExt for PlainError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct FramingError;

    impl fmt::Display for FramingError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "row without separator")
        }
    }

    impl Error for FramingError {}

    impl ErrorExt for FramingError {
        fn status_code(&self) -> StatusCode {
            StatusCode::InvalidFrame
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что статус по умолчанию — `Internal` и что
    /// сообщение для потребителя не раскрывает деталей.
    #[test]
    fn test_default_status_hides_details() {
        let e = PlainError("secret path");
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.client_message(), "Internal error");
        assert!(!e.is_fatal());
    }

    /// Тест проверяет, что ошибки фрейминга фатальны и отдают `Display`.
    #[test]
    fn test_framing_error_is_fatal() {
        let e = FramingError;
        assert!(e.is_fatal());
        assert_eq!(e.client_message(), "row without separator");
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_as_any_downcast() {
        let e = PlainError("x");
        let down = e.as_any().downcast_ref::<PlainError>();
        assert_eq!(down.map(|d| d.0), Some("x"));
    }

    /// Тест проверяет теги метрик и короткое имя типа.
    #[test]
    fn test_metrics_tags_and_type_name() {
        let e = FramingError;
        let tags = e.metrics_tags();
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "error_type" && v == "FramingError"));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && *v == StatusCode::InvalidFrame.to_string()));
    }
}
