pub mod flight;

pub use flight::*;

use std::{any::Any, io};

use thiserror::Error;

use crate::{ErrorExt, StackError, StatusCode};

/// Ошибка без собственного типа: код статуса и сообщение.
///
/// Её порождают `bail!`/`ensure!` и конверсии из ошибок стандартной
/// библиотеки и `serde_json`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Код статуса для ошибки ввода-вывода транспорта.
fn io_status(kind: io::ErrorKind) -> StatusCode {
    use io::ErrorKind::*;

    match kind {
        NotFound => StatusCode::NotFound,
        ConnectionReset | ConnectionAborted | BrokenPipe => StatusCode::ConnectionClosed,
        UnexpectedEof => StatusCode::UnexpectedEof,
        _ => StatusCode::Io,
    }
}

impl From<io::Error> for StackError {
    fn from(err: io::Error) -> Self {
        StackError::new(GenericError::new(io_status(err.kind()), err.to_string()))
    }
}

impl From<std::str::Utf8Error> for StackError {
    fn from(err: std::str::Utf8Error) -> Self {
        StackError::new(GenericError::new(
            StatusCode::InvalidUtf8,
            format!("row payload is not UTF-8: {err}"),
        ))
    }
}

impl From<serde_json::Error> for StackError {
    fn from(err: serde_json::Error) -> Self {
        StackError::new(GenericError::new(
            StatusCode::ParseError,
            format!("JSON model error: {err}"),
        ))
    }
}
