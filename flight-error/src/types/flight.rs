use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибка декодирования потока Flight.
///
/// Ошибки фрейминга (`MalformedRow`, `UnknownTag`, `SizeLimit`, а также
/// `BinaryLengthMismatch` после конца потока) фатальны для всей сессии.
/// Остальные действуют только на один чанк и его зависимых.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightDecodeError {
    /// Нарушен фрейминг строки
    #[error("Malformed row at byte {position}: {reason}")]
    MalformedRow { position: usize, reason: String },
    /// Неизвестный тег строки
    #[error("Unknown row tag 0x{tag:02x} in row {id}")]
    UnknownTag { tag: u8, id: u32 },
    /// Объявленная длина больше, чем успело прийти до конца потока
    #[error("Row {id} declares {declared} bytes but only {available} arrived")]
    BinaryLengthMismatch {
        id: u32,
        declared: usize,
        available: usize,
    },
    /// Превышен лимит размера
    #[error("Size limit exceeded for {data_type}: {current} > {max}")]
    SizeLimit {
        data_type: String,
        current: usize,
        max: usize,
    },
    /// Ссылка в модели не может быть разрешена в значение
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    /// Представление не помещается в буфер или не выровнено
    #[error("Invalid binary view: {reason}")]
    InvalidBinaryView { reason: String },
    /// Транспорт закрылся раньше, чем чанк разрешился
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Ошибка кодирования графа значений в строки.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightEncodeError {
    /// Ссылка на код отсутствует в манифесте
    #[error("Could not find client reference '{key}' in the client manifest")]
    UnknownClientReference { key: String },
    /// Запрос прерван до того, как значение разрешилось
    #[error("Request aborted: {reason}")]
    Aborted { reason: String },
}

/// Ошибка, пришедшая из потока строкой `E`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub message: String,
    pub digest: Option<String>,
}

/// Для ссылки на код нет ни точной, ни wildcard-записи в карте модулей.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not find the module \"{module_id}\" (export \"{export_name}\") in the module map")]
pub struct TranslationMiss {
    pub module_id: String,
    pub export_name: String,
}

impl UpstreamError {
    pub fn new(
        message: impl Into<String>,
        digest: Option<String>,
    ) -> Self {
        Self {
            message: message.into(),
            digest,
        }
    }
}

impl ErrorExt for FlightDecodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRow { .. } => StatusCode::InvalidFrame,
            Self::UnknownTag { .. } => StatusCode::UnknownTag,
            Self::BinaryLengthMismatch { .. } => StatusCode::UnexpectedEof,
            Self::SizeLimit { .. } => StatusCode::SizeLimit,
            Self::InvalidReference { .. } | Self::InvalidBinaryView { .. } => {
                StatusCode::InvalidValue
            }
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::MalformedRow { .. } | Self::UnknownTag { .. } => {
                "Invalid protocol data".to_string()
            }
            Self::BinaryLengthMismatch { .. } => "Incomplete data received".to_string(),
            Self::SizeLimit { data_type, .. } => format!("{data_type} size limit exceeded"),
            Self::InvalidReference { .. } | Self::InvalidBinaryView { .. } => self.to_string(),
            Self::ConnectionClosed => "Connection closed".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "flight_decode".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::UnknownTag { tag, .. } => tags.push(("row_tag", format!("0x{tag:02x}"))),
            Self::SizeLimit { data_type, .. } => tags.push(("data_type", data_type.clone())),
            _ => {}
        }

        tags
    }
}

impl ErrorExt for FlightEncodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownClientReference { .. } => StatusCode::ReferenceNotFound,
            Self::Aborted { .. } => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "flight_encode".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        if let Self::UnknownClientReference { key } = self {
            tags.push(("reference", key.clone()));
        }

        tags
    }
}

impl ErrorExt for UpstreamError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UpstreamError
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for TranslationMiss {
    fn status_code(&self) -> StatusCode {
        StatusCode::TranslationMiss
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "translation_miss".to_string()),
            ("status_code", self.status_code().to_string()),
            ("module_id", self.module_id.clone()),
        ]
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
