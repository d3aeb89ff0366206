/// Немедленно возвращает ошибку из текущей функции.
///
/// Формы:
/// - `bail!(err)` — готовый тип ошибки;
/// - `bail!(code, "msg")` — `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)` — форматированное сообщение.
///
/// ```ignore
/// use flight_error::{bail, StatusCode};
///
/// fn parse_id(digits: &str) -> flight_error::FlightResult<u32> {
///     if digits.is_empty() {
///         bail!(StatusCode::InvalidFrame, "Row id is empty");
///     }
///     match digits.parse() {
///         Ok(id) => Ok(id),
///         Err(_) => bail!(StatusCode::InvalidInteger, "Bad row id: {}", digits),
///     }
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает `bail!`, если условие ложно.
///
/// ```ignore
/// use flight_error::{ensure, StatusCode};
///
/// fn check_width(len: usize, width: usize) -> flight_error::FlightResult<()> {
///     ensure!(len % width == 0, StatusCode::InvalidValue, "Length {} not aligned", len);
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// Добавляет контекст к `Result`, превращая ошибку в `StackError`.
#[macro_export]
macro_rules! context {
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => Ok(val),
            Err(e) => Err($crate::StackError::from(e).context($msg)),
        }
    };
    ($result:expr, $fmt:expr, $($arg:tt)*) => {
        match $result {
            Ok(val) => Ok(val),
            Err(e) => Err($crate::StackError::from(e).context(format!($fmt, $($arg)*))),
        }
    };
}

/// Трейт-расширение для `Result`, добавляющее контекстирование.
pub trait ResultExt<T> {
    /// Если `self` — `Err`, оборачивает ошибку в `StackError` и добавляет
    /// контекст.
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// Ленивый контекст (строка строится только в случае ошибки).
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.into().context(ctx))
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
