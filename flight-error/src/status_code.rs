use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок Flight.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки значений (область действия — один чанк)
/// - 6xxx: Транспорт / IO
/// - 8xxx: Фрейминг потока (фатальны для сессии)
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1002,
    Internal = 1003,

    // === 2xxx: Ошибки значений ===
    NotFound = 2000,
    InvalidValue = 2001,
    UpstreamError = 2002,
    ReferenceNotFound = 2003,
    TranslationMiss = 2004,
    EncodingError = 2005,

    // === 6xxx: Транспорт/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    UnexpectedEof = 6002,

    // === 8xxx: Фрейминг ===
    InvalidFrame = 8000,
    UnknownTag = 8001,
    InvalidUtf8 = 8002,
    InvalidInteger = 8003,
    SizeLimit = 8004,
    ParseError = 8005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка уровня значения: затрагивает только зависящие чанки.
    pub fn is_value_error(&self) -> bool {
        (2000..=2999).contains(&self.code())
    }

    /// Ошибка фрейминга (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Ломает ли ошибка всю сессию декодирования.
    ///
    /// Обрыв потока посреди строки (`UnexpectedEof`) тоже фатален: к этому
    /// моменту поток закончился.
    pub fn is_fatal(&self) -> bool {
        self.is_protocol_error() || matches!(self, Self::UnexpectedEof | Self::Io)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::UpstreamError => LogLevel::Debug,
            Self::InvalidValue | Self::ReferenceNotFound => LogLevel::Info,
            Self::TranslationMiss | Self::ConnectionClosed => LogLevel::Warn,
            Self::Internal | Self::Unexpected => LogLevel::Error,
            _ if self.is_protocol_error() => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет разделение фатальных и локальных ошибок.
    #[test]
    fn test_fatal_vs_value_errors() {
        assert!(StatusCode::InvalidFrame.is_fatal());
        assert!(StatusCode::UnknownTag.is_fatal());
        assert!(StatusCode::UnexpectedEof.is_fatal());
        assert!(!StatusCode::UpstreamError.is_fatal());
        assert!(!StatusCode::TranslationMiss.is_fatal());
        assert!(StatusCode::TranslationMiss.is_value_error());
        assert!(!StatusCode::ConnectionClosed.is_value_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::UnknownTag.code();
        assert_eq!(n, 8001);
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::UnknownTag);
        assert!(StatusCode::from_u32(99999).is_none());
        assert!(StatusCode::is_success(0));
    }

    /// Тест проверяет уровни логирования.
    #[test]
    fn test_log_levels() {
        assert_eq!(StatusCode::InvalidFrame.log_level(), LogLevel::Error);
        assert_eq!(StatusCode::TranslationMiss.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::UpstreamError.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_display_contains_code() {
        assert!(StatusCode::SizeLimit.to_string().contains("8004"));
    }
}
