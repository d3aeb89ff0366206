//! Property-based tests для кодека Flight.
//!
//! Генерируют случайные графы значений и проверяют, что кодирование и
//! разбор сходятся при любом разбиении потока на куски.

use std::sync::Arc;

use flight::{
    protocol::{encode_row, RowPayload, RowTag},
    render, ClientManifest, DecodeOptions, DecodeSession, ElementKind, EncodeOptions, RowDecoder,
    Value,
};
use proptest::prelude::*;

use generators::*;

/// Базовая настройка proptest - количество итераций
const PROPTEST_CASES: u32 = 256;

fn encode(
    value: Value,
    threshold: usize,
) -> Vec<u8> {
    let mut request = render(
        value,
        Arc::new(ClientManifest::new()),
        EncodeOptions {
            long_string_threshold: threshold,
        },
    );
    request.rows().drain_ready().concat()
}

fn decode_in_chunks(
    wire: &[u8],
    sizes: &[usize],
) -> Option<Value> {
    let mut session = DecodeSession::new(DecodeOptions::default());
    let root = session.root();
    let mut rest = wire;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let n = sizes.next().copied().unwrap_or(rest.len()).min(rest.len());
        let (head, tail) = rest.split_at(n);
        session.feed(head).unwrap();
        rest = tail;
    }
    session.close().unwrap();
    root.value()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: PROPTEST_CASES,
        ..ProptestConfig::default()
    })]

    /// Любой граф собирается обратно равным исходному.
    #[test]
    fn prop_value_roundtrip(value in value_strategy(), threshold in 16usize..2048) {
        let wire = encode(value.clone(), threshold);
        prop_assert_eq!(decode_in_chunks(&wire, &[wire.len().max(1)]), Some(value));
    }

    /// Разбиение потока на куски не влияет на результат.
    #[test]
    fn prop_chunking_is_transparent(
        value in value_strategy(),
        sizes in proptest::collection::vec(1usize..32, 1..8),
    ) {
        let wire = encode(value.clone(), 64);
        prop_assert_eq!(decode_in_chunks(&wire, &sizes), Some(value));
    }

    /// Каждая строка читается ровно так, как записана, даже с переводами
    /// строк внутри длинных полезных нагрузок.
    #[test]
    fn prop_row_decoder(
        rows in proptest::collection::vec(
            (any::<u32>(), 0..ElementKind::ALL.len(), proptest::collection::vec(any::<u8>(), 0..48)),
            1..12,
        ),
        split in 1usize..16,
    ) {
        let mut wire = Vec::new();
        for (id, kind, payload) in &rows {
            wire.extend_from_slice(&encode_row(*id, RowTag::Binary(ElementKind::ALL[*kind]), payload));
        }

        let mut decoder = RowDecoder::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(split) {
            decoder.push(piece);
            while let Some(row) = decoder.next_row().unwrap() {
                decoded.push(row);
            }
        }
        decoder.finish().unwrap();

        prop_assert_eq!(decoded.len(), rows.len());
        for (row, (id, kind, payload)) in decoded.iter().zip(&rows) {
            prop_assert_eq!(row.id, *id);
            prop_assert_eq!(row.tag, RowTag::Binary(ElementKind::ALL[*kind]));
            prop_assert_eq!(&row.payload, &RowPayload::Bytes(payload.clone().into()));
        }
    }
}
