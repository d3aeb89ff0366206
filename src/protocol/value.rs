//! Граф значений, который передаётся по потоку Flight.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use super::{frame::BinaryView, thenable::Thenable};

/// Узел графа значений.
///
/// Обратные ссылки (`"$<id>"`) существуют только на уровне провода:
/// декодер подставляет вместо них сами значения.
#[derive(Clone)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    /// NaN, ±Infinity и -0 сохраняются.
    Float(f64),
    BigInt(i128),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Упорядоченные пары ключ/значение.
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Binary(BinaryView),
    /// Асинхронное значение.
    Promise(Thenable),
    /// Ссылка на код на стороне производителя.
    ClientReference(ClientReference),
    /// Разрешённая на стороне потребителя ссылка на код.
    Module(ModuleReference),
}

/// Ссылка на экспорт модуля, который должен предоставить получатель.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientReference {
    pub module_id: String,
    pub export_name: String,
}

/// Метаданные загрузки модуля: так они выглядят в строке `I` и в карте
/// модулей.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReference {
    pub id: String,
    #[serde(default)]
    pub chunks: Vec<String>,
    pub name: String,
    #[serde(rename = "async", default)]
    pub is_async: bool,
}

impl ClientReference {
    pub fn new(
        module_id: impl Into<String>,
        export_name: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            export_name: export_name.into(),
        }
    }

    /// Ключ в манифесте: `<module_id>#<export_name>`.
    pub fn key(&self) -> String {
        format!("{}#{}", self.module_id, self.export_name)
    }
}

impl ModuleReference {
    pub fn new(
        id: impl Into<String>,
        chunks: Vec<String>,
        name: impl Into<String>,
        is_async: bool,
    ) -> Self {
        Self {
            id: id.into(),
            chunks,
            name: name.into(),
            is_async,
        }
    }
}

impl Value {
    /// Объект из пар ключ/значение.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::BigInt(_) => "bigint",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Binary(_) => "binary",
            Value::Promise(_) => "promise",
            Value::ClientReference(_) => "client-reference",
            Value::Module(_) => "module",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryView> {
        match self {
            Value::Binary(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Thenable> {
        match self {
            Value::Promise(thenable) => Some(thenable),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&ModuleReference> {
        match self {
            Value::Module(module) => Some(module),
            _ => None,
        }
    }

    /// Поле объекта.
    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(key),
            _ => None,
        }
    }
}

/// Сравнение по SameValue: `NaN` равен `NaN`, а `0.0` не равен `-0.0`.
impl PartialEq for Value {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::ClientReference(a), Value::ClientReference(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::BigInt(n) => write!(f, "{n}n"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(fields) => f.debug_map().entries(fields).finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Set(items) => f.debug_set().entries(items).finish(),
            Value::Binary(view) => write!(f, "{view:?}"),
            Value::Promise(thenable) => write!(f, "{thenable:?}"),
            Value::ClientReference(r) => write!(f, "ClientReference({})", r.key()),
            Value::Module(m) => write!(f, "Module({}#{})", m.id, m.name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BinaryView> for Value {
    fn from(view: BinaryView) -> Self {
        Value::Binary(view)
    }
}

impl From<Thenable> for Value {
    fn from(thenable: Thenable) -> Self {
        Value::Promise(thenable)
    }
}

impl From<ClientReference> for Value {
    fn from(reference: ClientReference) -> Self {
        Value::ClientReference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет семантику SameValue для чисел с плавающей точкой.
    #[test]
    fn test_float_same_value() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_ne!(Value::Float(1.0), Value::Int(1));
    }

    #[test]
    fn test_object_helpers() {
        let value = Value::object([("a", Value::from(1)), ("b", Value::from("x"))]);
        assert_eq!(value.get("a"), Some(&Value::Int(1)));
        assert_eq!(value.get("b").and_then(Value::as_str), Some("x"));
        assert_eq!(value.get("c"), None);
        assert_eq!(value.type_name(), "object");
    }

    /// Тест проверяет ключ ссылки на код и формат метаданных модуля.
    #[test]
    fn test_reference_key_and_metadata_json() {
        let reference = ClientReference::new("path/to/chunk.js", "Component");
        assert_eq!(reference.key(), "path/to/chunk.js#Component");

        let module = ModuleReference::new(
            "path/to/chunk.js",
            vec!["/path/to/chunk.js".into()],
            "Component",
            true,
        );
        let json = serde_json::to_value(&module).unwrap();
        assert_eq!(json["async"], serde_json::Value::Bool(true));

        let parsed: ModuleReference =
            serde_json::from_str(r#"{"id":"x","name":"*"}"#).unwrap();
        assert!(parsed.chunks.is_empty());
        assert!(!parsed.is_async);
    }
}
