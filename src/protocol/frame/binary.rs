//! Бинарный кодек типизированных массивов.
//!
//! Представление (`BinaryView`) — это тип элемента плюс окно
//! `byte_offset..byte_offset + byte_length` над разделяемым буфером
//! [`Bytes`]. Несколько представлений разных типов могут смотреть в один и
//! тот же буфер: кодек никогда не считает буфер собственностью одного
//! представления и не копирует его.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use flight_error::{ensure, FlightResult, StatusCode};

use super::tags::{
    TAG_ARRAY_BUFFER, TAG_BIGINT64, TAG_BIGUINT64, TAG_DATA_VIEW, TAG_FLOAT32, TAG_FLOAT64,
    TAG_INT16, TAG_INT32, TAG_INT8, TAG_UINT16, TAG_UINT32, TAG_UINT8, TAG_UINT8_CLAMPED,
};

/// Тип элемента бинарного представления.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    ArrayBuffer,
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
    DataView,
}

/// Типизированное представление над разделяемым буфером.
#[derive(Clone)]
pub struct BinaryView {
    kind: ElementKind,
    buffer: Bytes,
    byte_offset: usize,
    byte_length: usize,
}

impl ElementKind {
    /// Все поддерживаемые типы.
    pub const ALL: [ElementKind; 13] = [
        ElementKind::ArrayBuffer,
        ElementKind::Int8,
        ElementKind::Uint8,
        ElementKind::Uint8Clamped,
        ElementKind::Int16,
        ElementKind::Uint16,
        ElementKind::Int32,
        ElementKind::Uint32,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::BigInt64,
        ElementKind::BigUint64,
        ElementKind::DataView,
    ];

    /// Тег строки и ссылки для этого типа.
    pub const fn tag(self) -> u8 {
        match self {
            Self::ArrayBuffer => TAG_ARRAY_BUFFER,
            Self::Int8 => TAG_INT8,
            Self::Uint8 => TAG_UINT8,
            Self::Uint8Clamped => TAG_UINT8_CLAMPED,
            Self::Int16 => TAG_INT16,
            Self::Uint16 => TAG_UINT16,
            Self::Int32 => TAG_INT32,
            Self::Uint32 => TAG_UINT32,
            Self::Float32 => TAG_FLOAT32,
            Self::Float64 => TAG_FLOAT64,
            Self::BigInt64 => TAG_BIGINT64,
            Self::BigUint64 => TAG_BIGUINT64,
            Self::DataView => TAG_DATA_VIEW,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Размер одного элемента в байтах.
    pub const fn width(self) -> usize {
        match self {
            Self::ArrayBuffer | Self::DataView | Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ArrayBuffer => "ArrayBuffer",
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
            Self::DataView => "DataView",
        }
    }
}

impl BinaryView {
    /// Создаёт представление с явными смещением и длиной (в байтах).
    ///
    /// # Errors
    /// `InvalidValue`, если окно выходит за буфер или не выровнено по
    /// размеру элемента.
    pub fn new(
        kind: ElementKind,
        buffer: Bytes,
        byte_offset: usize,
        byte_length: usize,
    ) -> FlightResult<Self> {
        let width = kind.width();
        ensure!(
            kind != ElementKind::ArrayBuffer || (byte_offset == 0 && byte_length == buffer.len()),
            StatusCode::InvalidValue,
            "ArrayBuffer must cover its whole buffer"
        );
        ensure!(
            byte_offset % width == 0,
            StatusCode::InvalidValue,
            "Start offset of {} should be a multiple of {}",
            kind.name(),
            width
        );
        ensure!(
            byte_length % width == 0,
            StatusCode::InvalidValue,
            "Byte length of {} should be a multiple of {}",
            kind.name(),
            width
        );
        ensure!(
            byte_offset
                .checked_add(byte_length)
                .is_some_and(|end| end <= buffer.len()),
            StatusCode::InvalidValue,
            "{} window {}+{} is outside of a {}-byte buffer",
            kind.name(),
            byte_offset,
            byte_length,
            buffer.len()
        );

        Ok(Self {
            kind,
            buffer,
            byte_offset,
            byte_length,
        })
    }

    /// Представление от `byte_offset` до конца буфера, как
    /// `new Int16Array(buffer, offset)`.
    pub fn with_offset(
        kind: ElementKind,
        buffer: Bytes,
        byte_offset: usize,
    ) -> FlightResult<Self> {
        let byte_length = buffer.len().saturating_sub(byte_offset);
        Self::new(kind, buffer, byte_offset, byte_length)
    }

    /// Весь буфер как `ArrayBuffer`.
    pub fn array_buffer(buffer: Bytes) -> Self {
        let byte_length = buffer.len();
        Self {
            kind: ElementKind::ArrayBuffer,
            buffer,
            byte_offset: 0,
            byte_length,
        }
    }

    /// Другое представление над тем же буфером.
    pub fn reinterpret(
        &self,
        kind: ElementKind,
        byte_offset: usize,
        byte_length: usize,
    ) -> FlightResult<Self> {
        Self::new(kind, self.buffer.clone(), byte_offset, byte_length)
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Весь разделяемый буфер, а не только окно представления.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Кол-во элементов.
    pub fn len(&self) -> usize {
        self.byte_length / self.kind.width()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    /// Байты окна (без копирования).
    pub fn bytes(&self) -> Bytes {
        self.buffer
            .slice(self.byte_offset..self.byte_offset + self.byte_length)
    }

    /// Смотрят ли два представления в одну и ту же память.
    pub fn shares_buffer(
        &self,
        other: &BinaryView,
    ) -> bool {
        self.buffer.as_ptr() == other.buffer.as_ptr() && self.buffer.len() == other.buffer.len()
    }

    fn window(&self) -> &[u8] {
        &self.buffer[self.byte_offset..self.byte_offset + self.byte_length]
    }

    pub fn to_u8_vec(&self) -> Vec<u8> {
        self.window().to_vec()
    }

    pub fn to_i8_vec(&self) -> Vec<i8> {
        self.window().iter().map(|&b| b as i8).collect()
    }

    pub fn to_i16_vec(&self) -> Vec<i16> {
        let mut out = vec![0; self.byte_length / 2];
        LittleEndian::read_i16_into(&self.window()[..out.len() * 2], &mut out);
        out
    }

    pub fn to_u16_vec(&self) -> Vec<u16> {
        let mut out = vec![0; self.byte_length / 2];
        LittleEndian::read_u16_into(&self.window()[..out.len() * 2], &mut out);
        out
    }

    pub fn to_i32_vec(&self) -> Vec<i32> {
        let mut out = vec![0; self.byte_length / 4];
        LittleEndian::read_i32_into(&self.window()[..out.len() * 4], &mut out);
        out
    }

    pub fn to_u32_vec(&self) -> Vec<u32> {
        let mut out = vec![0; self.byte_length / 4];
        LittleEndian::read_u32_into(&self.window()[..out.len() * 4], &mut out);
        out
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.byte_length / 4];
        LittleEndian::read_f32_into(&self.window()[..out.len() * 4], &mut out);
        out
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.byte_length / 8];
        LittleEndian::read_f64_into(&self.window()[..out.len() * 8], &mut out);
        out
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        let mut out = vec![0; self.byte_length / 8];
        LittleEndian::read_i64_into(&self.window()[..out.len() * 8], &mut out);
        out
    }

    pub fn to_u64_vec(&self) -> Vec<u64> {
        let mut out = vec![0; self.byte_length / 8];
        LittleEndian::read_u64_into(&self.window()[..out.len() * 8], &mut out);
        out
    }
}

/// Раскладывает представление на тип, окно и весь буфер.
///
/// Буфер отдаётся целиком (клон `Bytes` без копирования), чтобы энкодер мог
/// отправить его одной строкой на все представления.
pub fn encode_binary(view: &BinaryView) -> (ElementKind, usize, usize, Bytes) {
    (
        view.kind,
        view.byte_offset,
        view.byte_length,
        view.buffer.clone(),
    )
}

/// Строит представление над всеми байтами бинарной строки.
pub fn decode_binary(
    kind: ElementKind,
    bytes: Bytes,
) -> FlightResult<BinaryView> {
    let byte_length = bytes.len();
    BinaryView::new(kind, bytes, 0, byte_length)
}

impl PartialEq for BinaryView {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.kind == other.kind
            && self.byte_offset == other.byte_offset
            && self.byte_length == other.byte_length
            && self.buffer == other.buffer
    }
}

impl fmt::Debug for BinaryView {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(self.kind.name())
            .field("byte_offset", &self.byte_offset)
            .field("byte_length", &self.byte_length)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn sample_buffer() -> Bytes {
        Bytes::from_static(&[
            123, 4, 10, 5, 100, 255, 244, 45, 56, 67, 43, 124, 67, 89, 100, 20,
        ])
    }

    /// Тест проверяет, что теги однозначно отображаются на типы.
    #[test]
    fn test_tag_roundtrip_for_all_kinds() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ElementKind::from_tag(b'J'), None);
    }

    /// Тест проверяет представления со смещением, как в JS-конструкторах.
    #[test]
    fn test_views_with_offset() {
        let buffer = sample_buffer();

        let int16 = BinaryView::with_offset(ElementKind::Int16, buffer.clone(), 2).unwrap();
        assert_eq!(int16.byte_offset(), 2);
        assert_eq!(int16.byte_length(), 14);
        assert_eq!(int16.len(), 7);
        assert_eq!(int16.to_i16_vec()[0], i16::from_le_bytes([10, 5]));

        let data_view = BinaryView::with_offset(ElementKind::DataView, buffer.clone(), 3).unwrap();
        assert_eq!(data_view.byte_length(), 13);

        let float64 = BinaryView::with_offset(ElementKind::Float64, buffer, 0).unwrap();
        assert_eq!(float64.len(), 2);
    }

    /// Тест проверяет, что невыровненные и выходящие за буфер окна
    /// отклоняются.
    #[rstest]
    #[case::misaligned_offset(ElementKind::Int32, 2, 12)]
    #[case::misaligned_length(ElementKind::Int16, 0, 3)]
    #[case::out_of_range(ElementKind::Uint8, 10, 10)]
    #[case::partial_array_buffer(ElementKind::ArrayBuffer, 1, 15)]
    #[case::overflow(ElementKind::Float64, 8, usize::MAX - 7)]
    fn test_rejects_bad_windows(
        #[case] kind: ElementKind,
        #[case] byte_offset: usize,
        #[case] byte_length: usize,
    ) {
        let err = BinaryView::new(kind, sample_buffer(), byte_offset, byte_length).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidValue);
    }

    /// Тест проверяет, что разные представления делят один буфер без копий.
    #[test]
    fn test_views_share_buffer() {
        let base = BinaryView::array_buffer(sample_buffer());
        let int32 = base.reinterpret(ElementKind::Int32, 4, 12).unwrap();
        let uint32 = base.reinterpret(ElementKind::Uint32, 4, 12).unwrap();

        assert!(int32.shares_buffer(&uint32));
        assert!(int32.shares_buffer(&base));
        assert_ne!(int32, uint32);
        assert_eq!(int32.bytes(), uint32.bytes());
    }

    /// Тест проверяет чтение элементов всех ширин в little-endian.
    #[test]
    fn test_element_readers() {
        let buffer = sample_buffer();
        let view = |kind| BinaryView::with_offset(kind, buffer.clone(), 0).unwrap();

        assert_eq!(view(ElementKind::Int8).to_i8_vec()[5], -1);
        assert_eq!(view(ElementKind::Uint8).to_u8_vec()[5], 255);
        assert_eq!(
            view(ElementKind::Uint16).to_u16_vec()[0],
            u16::from_le_bytes([123, 4])
        );
        assert_eq!(
            view(ElementKind::Int32).to_i32_vec()[1],
            i32::from_le_bytes([100, 255, 244, 45])
        );
        assert_eq!(
            view(ElementKind::Uint32).to_u32_vec()[3],
            u32::from_le_bytes([67, 89, 100, 20])
        );
        assert_eq!(
            view(ElementKind::Float32).to_f32_vec()[2],
            f32::from_le_bytes([56, 67, 43, 124])
        );
        assert_eq!(
            view(ElementKind::BigInt64).to_i64_vec()[0],
            i64::from_le_bytes([123, 4, 10, 5, 100, 255, 244, 45])
        );
        assert_eq!(
            view(ElementKind::BigUint64).to_u64_vec()[1],
            u64::from_le_bytes([56, 67, 43, 124, 67, 89, 100, 20])
        );
        assert_eq!(view(ElementKind::Float64).to_f64_vec().len(), 2);
    }

    /// Тест проверяет, что decode_binary строит окно на все байты строки, а
    /// encode_binary отдаёт весь буфер и исходное окно.
    #[test]
    fn test_encode_decode_binary() {
        let view = BinaryView::with_offset(ElementKind::Uint16, sample_buffer(), 2).unwrap();
        let (kind, offset, length, buffer) = encode_binary(&view);
        assert_eq!((kind, offset, length), (ElementKind::Uint16, 2, 14));
        assert_eq!(buffer.len(), 16);

        let decoded = decode_binary(ElementKind::Uint16, buffer.slice(2..)).unwrap();
        assert_eq!(decoded.to_u16_vec(), view.to_u16_vec());

        assert!(decode_binary(ElementKind::Float64, Bytes::from_static(&[1, 2, 3])).is_err());
    }
}
