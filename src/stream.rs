//! Адаптеры к `tokio::io`: запись запроса в `AsyncWrite` и чтение потока
//! из `AsyncRead`.
//!
//! Чтение устроено как пара «ручка + драйвер»: [`create_from_reader`] сразу
//! отдаёт корневой чанк, а [`ReadDriver::run`] нужно запустить (обычно через
//! `tokio::spawn`), чтобы байты пошли в сессию.

use bytes::BytesMut;
use flight_error::{FlightResult, ResultExt, StackError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    client::{Chunk, DecodeOptions, DecodeSession},
    server::FlightRequest,
};

/// Размер буфера чтения по умолчанию.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Драйвер чтения: подаёт байты из `reader` в сессию до конца потока.
pub struct ReadDriver<R> {
    reader: R,
    session: DecodeSession,
    buffer_size: usize,
}

/// Создаёт сессию над `reader` и возвращает корневой чанк и драйвер.
pub fn create_from_reader<R>(
    reader: R,
    options: DecodeOptions,
) -> (Chunk, ReadDriver<R>)
where
    R: AsyncRead + Unpin,
{
    create_from_reader_with_capacity(reader, options, DEFAULT_READ_BUFFER_SIZE)
}

pub fn create_from_reader_with_capacity<R>(
    reader: R,
    options: DecodeOptions,
    buffer_size: usize,
) -> (Chunk, ReadDriver<R>)
where
    R: AsyncRead + Unpin,
{
    let mut session = DecodeSession::new(options);
    let root = session.root();
    let driver = ReadDriver {
        reader,
        session,
        buffer_size: buffer_size.max(1),
    };
    (root, driver)
}

impl<R> ReadDriver<R>
where
    R: AsyncRead + Unpin,
{
    /// Сессия под драйвером, например чтобы взять чанк по id до запуска.
    pub fn session(&mut self) -> &mut DecodeSession {
        &mut self.session
    }

    /// Сколько байт драйвер читает за один вызов.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Читает поток до EOF и закрывает сессию. Ошибка чтения ломает
    /// сессию так же, как фатальная ошибка протокола.
    pub async fn run(mut self) -> FlightResult<DecodeSession> {
        let mut buf = BytesMut::with_capacity(self.buffer_size);
        let mut total = 0usize;

        loop {
            buf.clear();
            buf.reserve(self.buffer_size);
            let n = match self.reader.read_buf(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    let err = StackError::from(err).context("reading flight stream");
                    self.session.abort(err.clone());
                    return Err(err);
                }
            };
            if n == 0 {
                debug!(bytes = total, "flight stream ended");
                self.session.close()?;
                return Ok(self.session);
            }
            total += n;
            trace!(n, "read chunk");
            self.session.feed(&buf[..n])?;
        }
    }
}

/// Пишет все строки запроса в `writer` и закрывает его.
///
/// Если запись падает, запрос прерывается. Возвращает число записанных байт.
pub async fn render_to_writer<W>(
    request: FlightRequest,
    mut writer: W,
) -> FlightResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let (handle, mut rows) = request.into_parts();
    let mut written = 0usize;

    while let Some(row) = rows.next().await {
        if let Err(err) = writer.write_all(&row).await {
            handle.abort(err.to_string());
            return Err(StackError::from(err).context("writing flight rows"));
        }
        written += row.len();
    }

    writer.flush().await.context("flushing flight rows")?;
    writer.shutdown().await.context("closing flight writer")?;
    debug!(bytes = written, "flight stream written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flight_error::StatusCode;

    use super::*;
    use crate::{
        protocol::{Thenable, Value},
        server::{render, ClientManifest, EncodeOptions},
    };

    /// Тест проверяет передачу через duplex с маленьким буфером: строки
    /// режутся на куски, но собираются целиком.
    #[tokio::test]
    async fn test_duplex_roundtrip_with_small_reads() {
        let (client, server) = tokio::io::duplex(7);
        let later = Thenable::new();
        let request = render(
            Value::object([
                ("text", Value::from("x".repeat(64))),
                ("later", later.clone().into()),
            ]),
            Arc::new(ClientManifest::new()),
            EncodeOptions {
                long_string_threshold: 32,
            },
        );

        let writer = tokio::spawn(render_to_writer(request, server));
        let (root, driver) = create_from_reader_with_capacity(client, DecodeOptions::default(), 3);
        let reader = tokio::spawn(driver.run());

        let value = root.await.unwrap();
        assert_eq!(value.get("text"), Some(&Value::from("x".repeat(64))));
        let promise = value.get("later").and_then(Value::as_promise).unwrap().clone();
        assert!(!promise.is_settled());

        later.resolve(Value::Int(5));
        assert_eq!(promise.await.unwrap(), Value::Int(5));

        writer.await.unwrap().unwrap();
        let session = reader.await.unwrap().unwrap();
        assert_eq!(session.pending_count(), 0);
    }

    /// Тест проверяет, что обрыв потока посреди строки отклоняет корень.
    #[tokio::test]
    async fn test_truncated_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        let (root, driver) = create_from_reader(client, DecodeOptions::default());
        let reader = tokio::spawn(driver.run());

        server.write_all(b"0:T10,abc").await.unwrap();
        drop(server);

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UnexpectedEof);
        assert!(root.await.unwrap_err().same_origin(&err));
    }
}
