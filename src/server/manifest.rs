//! Разрешение ссылок на код в метаданные загрузки.

use flight_error::{FlightEncodeError, FlightResult};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::{ClientReference, ModuleReference};

/// Метаданные, которые производитель отправляет строкой `I`.
pub type ClientReferenceMetadata = ModuleReference;

/// Превращает ссылку на код в метаданные для получателя.
pub trait ReferenceResolver: Send + Sync {
    /// # Errors
    /// `ReferenceNotFound`, если ссылка неизвестна.
    fn resolve(
        &self,
        reference: &ClientReference,
    ) -> FlightResult<ClientReferenceMetadata>;
}

/// Манифест клиентских модулей.
///
/// Ключ — либо `<module_id>#<export>` (точная запись), либо `<module_id>`
/// (запись на весь модуль, экспорт берётся из ссылки).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientManifest {
    entries: FxHashMap<String, ClientReferenceMetadata>,
}

impl ClientManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> FlightResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        metadata: ClientReferenceMetadata,
    ) -> &mut Self {
        self.entries.insert(key.into(), metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReferenceResolver for ClientManifest {
    fn resolve(
        &self,
        reference: &ClientReference,
    ) -> FlightResult<ClientReferenceMetadata> {
        let key = reference.key();
        if let Some(exact) = self.entries.get(&key) {
            return Ok(exact.clone());
        }
        match self.entries.get(&reference.module_id) {
            Some(module) => Ok(ClientReferenceMetadata {
                name: reference.export_name.clone(),
                ..module.clone()
            }),
            None => Err(FlightEncodeError::UnknownClientReference { key }.into()),
        }
    }
}

impl<F> ReferenceResolver for F
where
    F: Fn(&ClientReference) -> FlightResult<ClientReferenceMetadata> + Send + Sync,
{
    fn resolve(
        &self,
        reference: &ClientReference,
    ) -> FlightResult<ClientReferenceMetadata> {
        self(reference)
    }
}

#[cfg(test)]
mod tests {
    use flight_error::StatusCode;

    use super::*;

    fn manifest() -> ClientManifest {
        ClientManifest::from_json(
            r#"{
                "app/button.js": {"id": "app/button.js", "chunks": ["/app/button.js"], "name": "*"},
                "app/button.js#Fancy": {"id": "app/fancy.js", "chunks": ["/app/fancy.js"], "name": "FancyButton", "async": true}
            }"#,
        )
        .unwrap()
    }

    /// Тест проверяет, что точная запись важнее записи на модуль.
    #[test]
    fn test_exact_entry_wins() {
        let meta = manifest()
            .resolve(&ClientReference::new("app/button.js", "Fancy"))
            .unwrap();
        assert_eq!(meta.id, "app/fancy.js");
        assert_eq!(meta.name, "FancyButton");
        assert!(meta.is_async);
    }

    /// Тест проверяет запись на модуль: экспорт берётся из ссылки.
    #[test]
    fn test_module_entry_uses_export_name() {
        let meta = manifest()
            .resolve(&ClientReference::new("app/button.js", "Button"))
            .unwrap();
        assert_eq!(meta.id, "app/button.js");
        assert_eq!(meta.name, "Button");
        assert_eq!(meta.chunks, vec!["/app/button.js".to_string()]);
    }

    #[test]
    fn test_unknown_reference() {
        let err = manifest()
            .resolve(&ClientReference::new("app/missing.js", "X"))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ReferenceNotFound);
        assert!(err.to_string().contains("app/missing.js#X"));
    }

    /// Тест проверяет, что замыкание может служить резолвером.
    #[test]
    fn test_closure_resolver() {
        let resolver = |r: &ClientReference| -> FlightResult<ClientReferenceMetadata> {
            Ok(ClientReferenceMetadata::new(
                r.module_id.clone(),
                vec![],
                r.export_name.clone(),
                false,
            ))
        };
        let meta = resolver
            .resolve(&ClientReference::new("a.js", "A"))
            .unwrap();
        assert_eq!(meta.name, "A");
    }
}
