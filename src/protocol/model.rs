//! Текстовая модель: JSON, в котором строки с префиксом `$` несут ссылки и
//! значения, не выразимые в JSON.
//!
//! | строка                    | значение                                  |
//! |---------------------------|-------------------------------------------|
//! | `$$…`                     | обычная строка, начинающаяся с `$`        |
//! | `$undefined`              | `undefined`                               |
//! | `$NaN`, `$Infinity`, `$-Infinity`, `$-0` | особые числа               |
//! | `$n<digits>`              | BigInt                                    |
//! | `$<id>`                   | значение строки `id` (блокирующая ссылка) |
//! | `$@<id>`                  | promise над строкой `id`                  |
//! | `$Q<id>`, `$W<id>`        | Map / Set из массива в строке `id`        |
//! | `$<kind><id>:<off>:<len>` | бинарное окно над буфером из строки `id`  |

use std::fmt;

use flight_error::{FlightDecodeError, FlightResult, StackError};

use super::frame::{ElementKind, RowId};

/// Разобранная `$`-строка модели.
#[derive(Debug, Clone, PartialEq)]
pub enum Escape {
    /// Строка, которая в модели начиналась с `$$`.
    Literal(String),
    Undefined,
    /// Только NaN, ±Infinity и -0 (см. [`Escape::for_float`]).
    Float(f64),
    BigInt(i128),
    Reference(RowId),
    Promise(RowId),
    Map(RowId),
    Set(RowId),
    Binary {
        kind: ElementKind,
        buffer: RowId,
        byte_offset: usize,
        byte_length: usize,
    },
}

impl Escape {
    /// Строка, от которой зависит материализация значения. Promise-ссылки не
    /// блокируют.
    pub fn blocking_dependency(&self) -> Option<RowId> {
        match self {
            Escape::Reference(id) | Escape::Map(id) | Escape::Set(id) => Some(*id),
            Escape::Binary { buffer, .. } => Some(*buffer),
            _ => None,
        }
    }

    /// Особое число, либо `None` для обычного конечного числа.
    pub fn for_float(n: f64) -> Option<Escape> {
        if n.is_finite() && !(n == 0.0 && n.is_sign_negative()) {
            None
        } else {
            Some(Escape::Float(n))
        }
    }
}

impl fmt::Display for Escape {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Escape::Literal(s) => write!(f, "${s}"),
            Escape::Undefined => write!(f, "$undefined"),
            Escape::Float(n) if n.is_nan() => write!(f, "$NaN"),
            Escape::Float(n) if n.is_infinite() && *n > 0.0 => write!(f, "$Infinity"),
            Escape::Float(n) if n.is_infinite() => write!(f, "$-Infinity"),
            Escape::Float(_) => write!(f, "$-0"),
            Escape::BigInt(n) => write!(f, "$n{n}"),
            Escape::Reference(id) => write!(f, "${id}"),
            Escape::Promise(id) => write!(f, "$@{id}"),
            Escape::Map(id) => write!(f, "$Q{id}"),
            Escape::Set(id) => write!(f, "$W{id}"),
            Escape::Binary {
                kind,
                buffer,
                byte_offset,
                byte_length,
            } => write!(
                f,
                "${}{buffer}:{byte_offset}:{byte_length}",
                char::from(kind.tag())
            ),
        }
    }
}

/// Экранирует обычную строку для записи в модель.
pub fn escape_string(s: &str) -> String {
    if s.starts_with('$') {
        format!("${s}")
    } else {
        s.to_string()
    }
}

/// Разбирает строку модели. `Ok(None)` — обычная строка без экранирования.
///
/// # Errors
/// `InvalidReference`, если строка начинается с `$`, но не является ни одной
/// из известных форм.
pub fn parse_escape(s: &str) -> FlightResult<Option<Escape>> {
    let Some(rest) = s.strip_prefix('$') else {
        return Ok(None);
    };

    let escape = match rest {
        _ if rest.starts_with('$') => Escape::Literal(rest.to_string()),
        "undefined" => Escape::Undefined,
        "NaN" => Escape::Float(f64::NAN),
        "Infinity" => Escape::Float(f64::INFINITY),
        "-Infinity" => Escape::Float(f64::NEG_INFINITY),
        "-0" => Escape::Float(-0.0),
        _ => {
            let mut chars = rest.chars();
            match chars.next() {
                Some('n') => Escape::BigInt(
                    chars
                        .as_str()
                        .parse()
                        .map_err(|_| invalid(s, "BigInt digits expected"))?,
                ),
                Some('@') => Escape::Promise(parse_id(s, chars.as_str())?),
                Some('Q') => Escape::Map(parse_id(s, chars.as_str())?),
                Some('W') => Escape::Set(parse_id(s, chars.as_str())?),
                Some(c) if c.is_ascii_digit() => Escape::Reference(parse_id(s, rest)?),
                Some(c) => {
                    let kind = u8::try_from(c)
                        .ok()
                        .and_then(ElementKind::from_tag)
                        .ok_or_else(|| invalid(s, "unknown reference kind"))?;
                    parse_binary(s, kind, chars.as_str())?
                }
                None => return Err(invalid(s, "empty reference")),
            }
        }
    };

    Ok(Some(escape))
}

fn parse_binary(
    s: &str,
    kind: ElementKind,
    rest: &str,
) -> FlightResult<Escape> {
    let mut parts = rest.split(':');
    let (Some(buffer), Some(offset), Some(length), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid(s, "expected <id>:<offset>:<length>"));
    };

    Ok(Escape::Binary {
        kind,
        buffer: parse_id(s, buffer)?,
        byte_offset: offset
            .parse()
            .map_err(|_| invalid(s, "bad byte offset"))?,
        byte_length: length
            .parse()
            .map_err(|_| invalid(s, "bad byte length"))?,
    })
}

fn parse_id(
    s: &str,
    digits: &str,
) -> FlightResult<RowId> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(s, "row id expected"));
    }
    digits
        .parse()
        .map_err(|_| invalid(s, "row id does not fit in u32"))
}

fn invalid(
    reference: &str,
    reason: &str,
) -> StackError {
    FlightDecodeError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Ссылки модели на другие строки.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModelReferences {
    /// Без этих строк значение не материализовать.
    pub blocking: Vec<RowId>,
    /// Promise-ссылки (`$@<id>`), они не блокируют.
    pub promises: Vec<RowId>,
}

/// Собирает ссылки модели в порядке обхода, без повторов.
pub fn collect_references(model: &serde_json::Value) -> FlightResult<ModelReferences> {
    let mut refs = ModelReferences::default();
    walk(model, &mut refs)?;
    Ok(refs)
}

fn walk(
    model: &serde_json::Value,
    refs: &mut ModelReferences,
) -> FlightResult<()> {
    match model {
        serde_json::Value::String(s) => match parse_escape(s)? {
            Some(Escape::Promise(id)) => push_unique(&mut refs.promises, id),
            Some(escape) => {
                if let Some(id) = escape.blocking_dependency() {
                    push_unique(&mut refs.blocking, id);
                }
            }
            None => {}
        },
        serde_json::Value::Array(items) => {
            for item in items {
                walk(item, refs)?;
            }
        }
        serde_json::Value::Object(fields) => {
            for item in fields.values() {
                walk(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn push_unique(
    ids: &mut Vec<RowId>,
    id: RowId,
) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
