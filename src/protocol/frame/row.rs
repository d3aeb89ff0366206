//! Строковый кодек потока Flight.
//!
//! Текстовые строки имеют вид `<id>:<tag><payload>\n`, строки с префиксом
//! длины (`T` и все бинарные теги) — `<id>:<tag><len>,<bytes>` без
//! терминатора. `id` и `len` записываются десятичными числами, `len`
//! считается в байтах.

use bytes::{BufMut, Bytes, BytesMut};
use flight_error::{FlightDecodeError, FlightResult, StackError};
use memchr::memchr;

use super::{
    binary::ElementKind,
    tags::{
        ID_SEPARATOR, LENGTH_SEPARATOR, ROW_SEPARATOR, TAG_BLOCKED, TAG_ERROR, TAG_IMPORT,
        TAG_MODEL, TAG_PENDING, TAG_TEXT,
    },
};

// --- Константы для безопасности ---
pub const MAX_ROW_LENGTH: usize = 512 * 1024 * 1024; // 512 MB
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024; // 64 MB
const MAX_ID_DIGITS: usize = 10; // u32::MAX
const MAX_LENGTH_DIGITS: usize = 20;

/// Идентификатор строки (и чанка на стороне клиента).
pub type RowId = u32;

/// Тег строки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowTag {
    Model,
    Error,
    Import,
    Pending,
    Blocked,
    Text,
    Binary(ElementKind),
}

/// Тело строки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPayload {
    Empty,
    Text(String),
    Bytes(Bytes),
}

/// Одна строка потока.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub tag: RowTag,
    pub payload: RowPayload,
}

enum Header {
    Incomplete,
    Line {
        id: RowId,
        tag: RowTag,
        body_start: usize,
    },
    Prefixed,
}

#[derive(Debug)]
enum RowDecodeState {
    Header,
    Body { id: RowId, tag: RowTag, len: usize },
}

/// Инкрементальный декодер строк.
///
/// Байты можно подавать кусками произвольной длины, в том числе разрезая
/// строку посреди UTF-8 символа: строка выдаётся только целиком.
#[derive(Debug)]
pub struct RowDecoder {
    buffer: BytesMut,
    state: RowDecodeState,
    consumed: usize,
    line_scan: usize,
}

impl RowTag {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Model => TAG_MODEL,
            Self::Error => TAG_ERROR,
            Self::Import => TAG_IMPORT,
            Self::Pending => TAG_PENDING,
            Self::Blocked => TAG_BLOCKED,
            Self::Text => TAG_TEXT,
            Self::Binary(kind) => kind.tag(),
        }
    }

    /// Строка несёт длину в заголовке и не имеет терминатора.
    pub fn is_length_prefixed(self) -> bool {
        matches!(self, Self::Text | Self::Binary(_))
    }

    fn is_empty_bodied(self) -> bool {
        matches!(self, Self::Pending | Self::Blocked)
    }
}

impl TryFrom<u8> for RowTag {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            TAG_MODEL => Ok(Self::Model),
            TAG_ERROR => Ok(Self::Error),
            TAG_IMPORT => Ok(Self::Import),
            TAG_PENDING => Ok(Self::Pending),
            TAG_BLOCKED => Ok(Self::Blocked),
            TAG_TEXT => Ok(Self::Text),
            other => ElementKind::from_tag(other).map(Self::Binary).ok_or(other),
        }
    }
}

impl RowPayload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Empty => &[],
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl Row {
    pub fn new(
        id: RowId,
        tag: RowTag,
        payload: RowPayload,
    ) -> Self {
        Self { id, tag, payload }
    }

    pub fn encode(&self) -> Bytes {
        encode_row(self.id, self.tag, self.payload.as_bytes())
    }
}

/// Сериализует одну строку.
///
/// Тело текстовой строки не должно содержать `\n`: JSON-модель всегда
/// экранирует перевод строки, а длинный текст уходит строкой `T`.
pub fn encode_row(
    id: RowId,
    tag: RowTag,
    payload: &[u8],
) -> Bytes {
    let id = id.to_string();
    let mut out = BytesMut::with_capacity(id.len() + payload.len() + 24);
    out.put_slice(id.as_bytes());
    out.put_u8(ID_SEPARATOR);
    out.put_u8(tag.as_byte());

    if tag.is_length_prefixed() {
        out.put_slice(payload.len().to_string().as_bytes());
        out.put_u8(LENGTH_SEPARATOR);
        out.put_slice(payload);
    } else {
        debug_assert!(
            memchr(ROW_SEPARATOR, payload).is_none(),
            "text row body must not contain a newline"
        );
        out.put_slice(payload);
        out.put_u8(ROW_SEPARATOR);
    }

    out.freeze()
}

impl RowDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: RowDecodeState::Header,
            consumed: 0,
            line_scan: 0,
        }
    }

    /// Добавляет очередной кусок байт.
    pub fn push(
        &mut self,
        data: &[u8],
    ) {
        self.buffer.extend_from_slice(data);
    }

    /// Байты, полученные, но ещё не сложившиеся в строку.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Кол-во байт, уже выданных в виде строк.
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Возвращает следующую полную строку, `None` — если байт не хватает.
    ///
    /// # Errors
    /// Любая ошибка фрейминга фатальна: после неё декодер не пригоден.
    pub fn next_row(&mut self) -> FlightResult<Option<Row>> {
        loop {
            match self.state {
                RowDecodeState::Header => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    match self.parse_header()? {
                        Header::Incomplete => return Ok(None),
                        Header::Line { id, tag, body_start } => {
                            return self.take_line(id, tag, body_start);
                        }
                        Header::Prefixed => continue,
                    }
                }
                RowDecodeState::Body { id, tag, len } => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(len).freeze();
                    self.consumed += len;
                    self.state = RowDecodeState::Header;

                    let payload = match tag {
                        RowTag::Text => {
                            let text = std::str::from_utf8(&body).map_err(|err| {
                                self.malformed_at(
                                    self.consumed - len,
                                    format!("text row {id} is not valid UTF-8: {err}"),
                                )
                            })?;
                            RowPayload::Text(text.to_owned())
                        }
                        _ => RowPayload::Bytes(body),
                    };
                    return Ok(Some(Row::new(id, tag, payload)));
                }
            }
        }
    }

    /// Сообщает о конце потока.
    ///
    /// Оставшиеся в буфере байты означают обрезанную строку.
    pub fn finish(&mut self) -> FlightResult<()> {
        match self.state {
            RowDecodeState::Body { id, len, .. } => Err(FlightDecodeError::BinaryLengthMismatch {
                id,
                declared: len,
                available: self.buffer.len(),
            }
            .into()),
            RowDecodeState::Header if !self.buffer.is_empty() => {
                Err(FlightDecodeError::MalformedRow {
                    position: self.consumed,
                    reason: format!(
                        "stream ended inside a row ({} bytes left)",
                        self.buffer.len()
                    ),
                }
                .into())
            }
            RowDecodeState::Header => Ok(()),
        }
    }

    /// Разбирает заголовок в начале буфера. Для строк с длиной снимает
    /// заголовок с буфера и переводит декодер в состояние `Body`.
    fn parse_header(&mut self) -> FlightResult<Header> {
        let Some(colon) = memchr(ID_SEPARATOR, &self.buffer) else {
            if self.buffer.len() > MAX_ID_DIGITS {
                return Err(self.malformed(0, "row id is too long or missing ':'"));
            }
            self.check_digits(&self.buffer[..], 0)?;
            return Ok(Header::Incomplete);
        };
        let id = self.parse_id(colon)?;

        let Some(&tag_byte) = self.buffer.get(colon + 1) else {
            return Ok(Header::Incomplete);
        };
        let tag = RowTag::try_from(tag_byte)
            .map_err(|tag| StackError::from(FlightDecodeError::UnknownTag { tag, id }))?;

        if !tag.is_length_prefixed() {
            return Ok(Header::Line {
                id,
                tag,
                body_start: colon + 2,
            });
        }

        let len_start = colon + 2;
        let Some(comma) = memchr(LENGTH_SEPARATOR, &self.buffer[len_start..]) else {
            let digits = &self.buffer[len_start..];
            if digits.len() > MAX_LENGTH_DIGITS {
                return Err(self.malformed(len_start, "row length is too long or missing ','"));
            }
            self.check_digits(digits, len_start)?;
            return Ok(Header::Incomplete);
        };
        let len = self.parse_length(len_start, len_start + comma)?;
        if len > MAX_ROW_LENGTH {
            return Err(FlightDecodeError::SizeLimit {
                data_type: "row".to_string(),
                current: len,
                max: MAX_ROW_LENGTH,
            }
            .into());
        }

        let header_len = len_start + comma + 1;
        let _ = self.buffer.split_to(header_len);
        self.consumed += header_len;
        self.state = RowDecodeState::Body { id, tag, len };
        Ok(Header::Prefixed)
    }

    /// Выдаёт текстовую строку, если `\n` уже пришёл.
    fn take_line(
        &mut self,
        id: RowId,
        tag: RowTag,
        body_start: usize,
    ) -> FlightResult<Option<Row>> {
        let scan_from = self.line_scan.max(body_start);
        let Some(found) = memchr(ROW_SEPARATOR, &self.buffer[scan_from..]) else {
            if self.buffer.len() > MAX_LINE_LENGTH {
                return Err(FlightDecodeError::SizeLimit {
                    data_type: "line".to_string(),
                    current: self.buffer.len(),
                    max: MAX_LINE_LENGTH,
                }
                .into());
            }
            self.line_scan = self.buffer.len();
            return Ok(None);
        };
        let newline = scan_from + found;
        self.line_scan = 0;

        if tag.is_empty_bodied() && newline != body_start {
            return Err(self.malformed(body_start, "pending and blocked rows carry no body"));
        }

        let line = self.buffer.split_to(newline + 1);
        self.consumed += newline + 1;
        let body = &line[body_start..newline];

        let payload = if tag.is_empty_bodied() {
            RowPayload::Empty
        } else {
            let text = std::str::from_utf8(body).map_err(|err| {
                self.malformed_at(
                    self.consumed - line.len() + body_start,
                    format!("row {id} is not valid UTF-8: {err}"),
                )
            })?;
            RowPayload::Text(text.to_owned())
        };

        Ok(Some(Row::new(id, tag, payload)))
    }

    fn parse_id(
        &self,
        colon: usize,
    ) -> FlightResult<RowId> {
        let digits = &self.buffer[..colon];
        if digits.is_empty() {
            return Err(self.malformed(0, "row id is empty"));
        }
        self.check_digits(digits, 0)?;
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<RowId>().ok())
            .ok_or_else(|| self.malformed(0, "row id does not fit in u32"))
    }

    fn parse_length(
        &self,
        start: usize,
        end: usize,
    ) -> FlightResult<usize> {
        let digits = &self.buffer[start..end];
        if digits.is_empty() {
            return Err(self.malformed(start, "row length is empty"));
        }
        self.check_digits(digits, start)?;
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| self.malformed(start, "row length overflows"))
    }

    fn check_digits(
        &self,
        digits: &[u8],
        offset: usize,
    ) -> FlightResult<()> {
        match digits.iter().position(|b| !b.is_ascii_digit()) {
            Some(i) => Err(self.malformed(
                offset + i,
                format!("unexpected byte 0x{:02x}, expected a digit", digits[i]),
            )),
            None => Ok(()),
        }
    }

    fn malformed(
        &self,
        offset: usize,
        reason: impl Into<String>,
    ) -> StackError {
        self.malformed_at(self.consumed + offset, reason)
    }

    fn malformed_at(
        &self,
        position: usize,
        reason: impl Into<String>,
    ) -> StackError {
        FlightDecodeError::MalformedRow {
            position,
            reason: reason.into(),
        }
        .into()
    }
}

impl Default for RowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
