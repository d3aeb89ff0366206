//! Перевод ссылок на код в модули потребителя и инструкции загрузки.
//!
//! Карта модулей устроена как `owner → (export | "*") → metadata`. Точная
//! запись важнее wildcard-записи. Wildcard сохраняет исходное имя экспорта.

use flight_error::{FlightResult, TranslationMiss};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::ModuleReference;

/// Ключ wildcard-записи.
pub const WILDCARD: &str = "*";

/// Карта модулей потребителя.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleMap {
    owners: FxHashMap<String, FxHashMap<String, ModuleReference>>,
}

/// Результат поиска в карте.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Exact(&'a ModuleReference),
    Wildcard(&'a ModuleReference),
    /// Для владельца нет ни одной записи.
    NoOwner,
    /// Владелец есть, но нет ни точной, ни wildcard-записи.
    Miss,
}

/// Как грузить чанки модулей: префикс пути и `crossorigin`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLoading {
    #[serde(default)]
    pub prefix: String,
    #[serde(default, rename = "crossOrigin")]
    pub cross_origin: Option<String>,
}

/// Инструкция загрузки одного скрипта.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLoad {
    pub src: String,
    pub nonce: Option<String>,
    pub cross_origin: Option<String>,
}

/// Загрузчик кода. Получает инструкции по мере прихода строк `I`.
pub trait ModuleLoader: Send + Sync {
    fn preload(
        &self,
        script: ScriptLoad,
    );
}

/// Загрузчик, который только запоминает инструкции (без повторов по `src`).
#[derive(Debug, Default)]
pub struct CollectingLoader {
    scripts: Mutex<Vec<ScriptLoad>>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> FlightResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Добавляет запись; `export` может быть [`WILDCARD`].
    pub fn insert(
        &mut self,
        owner: impl Into<String>,
        export: impl Into<String>,
        metadata: ModuleReference,
    ) -> &mut Self {
        self.owners
            .entry(owner.into())
            .or_default()
            .insert(export.into(), metadata);
        self
    }

    pub fn lookup(
        &self,
        owner: &str,
        export: &str,
    ) -> Lookup<'_> {
        let Some(exports) = self.owners.get(owner) else {
            return Lookup::NoOwner;
        };
        if let Some(exact) = exports.get(export) {
            Lookup::Exact(exact)
        } else if let Some(wildcard) = exports.get(WILDCARD) {
            Lookup::Wildcard(wildcard)
        } else {
            Lookup::Miss
        }
    }
}

/// Переводит метаданные из потока в модуль потребителя.
///
/// Без карты метаданные возвращаются как есть. Владелец без записей тоже
/// даёт исходные метаданные, кроме строгого режима.
pub fn translate(
    reference: &ModuleReference,
    module_map: Option<&ModuleMap>,
    strict: bool,
) -> Result<ModuleReference, TranslationMiss> {
    let Some(map) = module_map else {
        return Ok(reference.clone());
    };

    match map.lookup(&reference.id, &reference.name) {
        Lookup::Exact(entry) => Ok(entry.clone()),
        Lookup::Wildcard(entry) => Ok(ModuleReference {
            name: reference.name.clone(),
            ..entry.clone()
        }),
        Lookup::NoOwner if !strict => Ok(reference.clone()),
        Lookup::NoOwner | Lookup::Miss => Err(TranslationMiss {
            module_id: reference.id.clone(),
            export_name: reference.name.clone(),
        }),
    }
}

/// Инструкции загрузки для чанков исходных метаданных.
pub fn load_instructions(
    reference: &ModuleReference,
    loading: Option<&ModuleLoading>,
    nonce: Option<&str>,
) -> Vec<ScriptLoad> {
    let prefix = loading.map_or("", |l| l.prefix.as_str());
    let cross_origin = loading.and_then(|l| l.cross_origin.clone());

    reference
        .chunks
        .iter()
        .map(|chunk| ScriptLoad {
            src: format!("{prefix}{chunk}"),
            nonce: nonce.map(str::to_string),
            cross_origin: cross_origin.clone(),
        })
        .collect()
}

impl ModuleLoading {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cross_origin: None,
        }
    }
}

impl ScriptLoad {
    /// HTML-тег `<script>` для этой инструкции.
    pub fn to_html(&self) -> String {
        let mut html = format!(r#"<script src="{}" async="""#, escape_attr(&self.src));
        if let Some(nonce) = &self.nonce {
            html.push_str(&format!(r#" nonce="{}""#, escape_attr(nonce)));
        }
        if let Some(cross_origin) = &self.cross_origin {
            html.push_str(&format!(r#" crossorigin="{}""#, escape_attr(cross_origin)));
        }
        html.push_str("></script>");
        html
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

impl CollectingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripts(&self) -> Vec<ScriptLoad> {
        self.scripts.lock().clone()
    }

    /// Все собранные теги подряд.
    pub fn to_html(&self) -> String {
        self.scripts.lock().iter().map(ScriptLoad::to_html).collect()
    }
}

impl ModuleLoader for CollectingLoader {
    fn preload(
        &self,
        script: ScriptLoad,
    ) {
        let mut scripts = self.scripts.lock();
        if !scripts.iter().any(|s| s.src == script.src) {
            scripts.push(script);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> ModuleReference {
        ModuleReference::new(
            "path/to/chunk.js",
            vec!["/path/to/chunk.js".into()],
            "Component",
            false,
        )
    }

    fn ssr_entry(name: &str) -> ModuleReference {
        ModuleReference::new("ssr/chunk.js", vec!["/ssr/chunk.js".into()], name, false)
    }

    /// Тест проверяет, что wildcard-запись сохраняет исходное имя экспорта.
    #[test]
    fn test_wildcard_keeps_original_name() {
        let mut map = ModuleMap::new();
        map.insert("path/to/chunk.js", WILDCARD, ssr_entry("*"));

        let module = translate(&original(), Some(&map), false).unwrap();
        assert_eq!(module.id, "ssr/chunk.js");
        assert_eq!(module.name, "Component");
    }

    /// Тест проверяет, что точная запись важнее wildcard и задаёт имя.
    #[test]
    fn test_exact_entry_wins() {
        let mut map = ModuleMap::new();
        map.insert("path/to/chunk.js", WILDCARD, ssr_entry("*"))
            .insert("path/to/chunk.js", "Component", ssr_entry("SsrComponent"));

        let module = translate(&original(), Some(&map), false).unwrap();
        assert_eq!(module.name, "SsrComponent");
    }

    /// Тест проверяет промахи и отсутствие владельца.
    #[test]
    fn test_misses() {
        let mut map = ModuleMap::new();
        map.insert("path/to/chunk.js", "Other", ssr_entry("Other"));
        let miss = translate(&original(), Some(&map), false).unwrap_err();
        assert_eq!(miss.module_id, "path/to/chunk.js");
        assert_eq!(miss.export_name, "Component");

        let empty = ModuleMap::new();
        assert_eq!(translate(&original(), Some(&empty), false), Ok(original()));
        assert!(translate(&original(), Some(&empty), true).is_err());
        assert_eq!(translate(&original(), None, true), Ok(original()));
    }

    /// Тест проверяет разбор карты модулей из JSON.
    #[test]
    fn test_module_map_from_json() {
        let map = ModuleMap::from_json(
            r#"{"path/to/chunk.js": {"*": {"id": "ssr/chunk.js", "chunks": [], "name": "*"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            map.lookup("path/to/chunk.js", "Anything"),
            Lookup::Wildcard(_)
        ));
        assert_eq!(map.lookup("nope", "x"), Lookup::NoOwner);
    }

    /// Тест проверяет инструкции загрузки: префикс, nonce и HTML.
    #[test]
    fn test_load_instructions_and_html() {
        let loading = ModuleLoading::new("/prefix");
        let scripts = load_instructions(&original(), Some(&loading), None);
        assert_eq!(scripts.len(), 1);
        assert_eq!(
            scripts[0].to_html(),
            r#"<script src="/prefix/path/to/chunk.js" async=""></script>"#
        );

        let scripts = load_instructions(&original(), Some(&loading), Some("r4nd0m"));
        assert_eq!(
            scripts[0].to_html(),
            r#"<script src="/prefix/path/to/chunk.js" async="" nonce="r4nd0m"></script>"#
        );

        let scripts = load_instructions(&original(), None, None);
        assert_eq!(scripts[0].src, "/path/to/chunk.js");
    }

    /// Тест проверяет, что собирающий загрузчик не дублирует скрипты.
    #[test]
    fn test_collecting_loader_dedupes() {
        let loader = CollectingLoader::new();
        for script in load_instructions(&original(), None, Some("n")) {
            loader.preload(script.clone());
            loader.preload(script);
        }
        assert_eq!(loader.scripts().len(), 1);
        assert!(loader.to_html().contains(r#"nonce="n""#));
    }

    #[test]
    fn test_attribute_escaping() {
        let script = ScriptLoad {
            src: r#"/a"b.js"#.into(),
            nonce: None,
            cross_origin: Some("use-credentials".into()),
        };
        assert_eq!(
            script.to_html(),
            r#"<script src="/a&quot;b.js" async="" crossorigin="use-credentials"></script>"#
        );
    }
}
