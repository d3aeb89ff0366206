use std::{fmt, panic::Location, sync::Arc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{ErrorExt, LogLevel, StatusCode, UpstreamError};

/// Ошибка протокола с цепочкой контекста.
///
/// Дешёво клонируется: одну и ту же причину получает каждый слушатель
/// упавшего чанка и каждый зависящий от него чанк. Контекст, добавленный к
/// копии, не виден остальным копиям.
#[derive(Clone)]
pub struct StackError {
    origin: Arc<dyn ErrorExt>,
    trail: Arc<Vec<ErrorContext>>,
}

/// Одно звено контекста и место, где оно было добавлено.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl fmt::Display for ErrorContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.message,
            self.location.file(),
            self.location.line()
        )
    }
}

/// Тело строки `E`: сообщение для потребителя и необязательный digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ErrorPayload {
    #[cfg_attr(feature = "serde", serde(default))]
    pub message: String,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub digest: Option<String>,
}

impl StackError {
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            origin: Arc::new(err),
            trail: Arc::default(),
        }
    }

    /// Добавляет звено контекста с местом вызова.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.trail).push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.origin.status_code()
    }

    pub fn client_message(&self) -> String {
        self.origin.client_message()
    }

    /// Исходная ошибка без контекста.
    pub fn root(&self) -> &dyn ErrorExt {
        self.origin.as_ref()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.trail
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.origin.metrics_tags()
    }

    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.origin.as_any().downcast_ref::<T>()
    }

    /// Копии одной и той же причины, разосланной нескольким чанкам.
    pub fn same_origin(
        &self,
        other: &StackError,
    ) -> bool {
        Arc::ptr_eq(&self.origin, &other.origin)
    }

    /// Что уходит в строку `E`. Digest переносится только от ошибок
    /// производителя, внутренние подробности наружу не попадают.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            message: self.client_message(),
            digest: self
                .downcast_ref::<UpstreamError>()
                .and_then(|e| e.digest.clone()),
        }
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// Ломает ли ошибка всю сессию декодирования.
    pub fn is_fatal(&self) -> bool {
        self.origin.is_fatal()
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug
            .field("origin", &self.origin.to_string())
            .field("status_code", &self.status_code());
        if !self.trail.is_empty() {
            let trail: Vec<String> = self.trail.iter().map(ToString::to_string).collect();
            debug.field("trail", &trail);
        }
        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Внешний контекст первым: "feeding session: decoding row 3: ..."
        for ctx in self.trail.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.origin)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.origin.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<ErrorPayload> for StackError {
    fn from(payload: ErrorPayload) -> Self {
        StackError::new(UpstreamError::new(payload.message, payload.digest))
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}
