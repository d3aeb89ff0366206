//! Определение тегов строк потока Flight.
//!
//! Каждая строка помечается одним ASCII-байтом сразу после `<id>:`.
//! Используется в модулях `row` и `binary`.

/// Значение (текстовая JSON-модель)
pub const TAG_MODEL: u8 = b'J';
/// Ошибка
pub const TAG_ERROR: u8 = b'E';
/// Метаданные ссылки на код (resolved-module)
pub const TAG_IMPORT: u8 = b'I';
/// Значение ещё не готово
pub const TAG_PENDING: u8 = b'P';
/// Значение заблокировано на зависимостях
pub const TAG_BLOCKED: u8 = b'B';
/// Длинная строка: сырые UTF-8 байты с префиксом длины
pub const TAG_TEXT: u8 = b'T';

/// Сырой буфер (ArrayBuffer)
pub const TAG_ARRAY_BUFFER: u8 = b'A';
/// Int8Array
pub const TAG_INT8: u8 = b'O';
/// Uint8Array
pub const TAG_UINT8: u8 = b'o';
/// Uint8ClampedArray
pub const TAG_UINT8_CLAMPED: u8 = b'U';
/// Int16Array
pub const TAG_INT16: u8 = b'S';
/// Uint16Array
pub const TAG_UINT16: u8 = b's';
/// Int32Array
pub const TAG_INT32: u8 = b'L';
/// Uint32Array
pub const TAG_UINT32: u8 = b'l';
/// Float32Array
pub const TAG_FLOAT32: u8 = b'G';
/// Float64Array
pub const TAG_FLOAT64: u8 = b'g';
/// BigInt64Array
pub const TAG_BIGINT64: u8 = b'M';
/// BigUint64Array
pub const TAG_BIGUINT64: u8 = b'm';
/// DataView
pub const TAG_DATA_VIEW: u8 = b'V';

/// Разделитель идентификатора и тега.
pub const ID_SEPARATOR: u8 = b':';
/// Разделитель префикса длины и тела.
pub const LENGTH_SEPARATOR: u8 = b',';
/// Терминатор текстовой строки.
pub const ROW_SEPARATOR: u8 = b'\n';
