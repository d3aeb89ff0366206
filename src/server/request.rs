//! Энкодер: превращает граф значений в поток строк.
//!
//! Корень получает строку 0. Зависимости (длинные строки, буферы, ссылки на
//! код, Map/Set, разрешённые promise) записываются раньше строки владельца.
//! Неразрешённый promise сразу получает строку `P`, а когда он
//! разрешается, для того же id пишется `J` или `E`. Поток закрывается,
//! когда не осталось ни одного ожидающего значения.

use std::{collections::BTreeSet, sync::Arc};

use bytes::Bytes;
use flight_error::{FlightEncodeError, FlightResult, GenericError, StackError, StatusCode};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map as JsonMap, Number, Value as Json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use super::manifest::ReferenceResolver;
use crate::protocol::{
    encode_binary, encode_row, escape_string, ClientReference, ElementKind, Escape, RowId,
    RowTag, Settled, Thenable, Value,
};

/// Порог по умолчанию (в байтах UTF-8), начиная с которого строка уходит
/// отдельной строкой `T`.
pub const DEFAULT_LONG_STRING_THRESHOLD: usize = 1024;

/// Параметры кодирования.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub long_string_threshold: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            long_string_threshold: DEFAULT_LONG_STRING_THRESHOLD,
        }
    }
}

struct RequestCore {
    options: EncodeOptions,
    resolver: Arc<dyn ReferenceResolver>,
    sink: Option<UnboundedSender<Bytes>>,
    next_id: RowId,
    long_strings: FxHashMap<String, RowId>,
    // Ключ — адрес и длина буфера; сам `Bytes` держим, чтобы адрес не
    // переиспользовался, пока идёт запрос.
    buffers: FxHashMap<(usize, usize), (RowId, Bytes)>,
    references: FxHashMap<ClientReference, RowId>,
    pending: BTreeSet<RowId>,
    subscriptions: Vec<(RowId, Thenable)>,
}

/// Разделяемая ручка запроса: прерывание и состояние.
#[derive(Clone)]
pub struct RequestHandle {
    core: Arc<Mutex<RequestCore>>,
}

/// Асинхронный источник закодированных строк.
#[derive(Debug)]
pub struct RowStream {
    rx: UnboundedReceiver<Bytes>,
}

/// Запущенный запрос: ручка и поток строк.
pub struct FlightRequest {
    handle: RequestHandle,
    rows: RowStream,
}

/// Кодирует `root` в поток строк.
///
/// Всё, что известно синхронно, записывается до возврата; ожидающие
/// promise дописываются по мере разрешения из того потока, где они
/// разрешились.
pub fn render(
    root: Value,
    resolver: Arc<dyn ReferenceResolver>,
    options: EncodeOptions,
) -> FlightRequest {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RequestHandle {
        core: Arc::new(Mutex::new(RequestCore {
            options,
            resolver,
            sink: Some(tx),
            next_id: 0,
            long_strings: FxHashMap::default(),
            buffers: FxHashMap::default(),
            references: FxHashMap::default(),
            pending: BTreeSet::new(),
            subscriptions: Vec::new(),
        })),
    };

    {
        let mut core = handle.core.lock();
        let root_id = core.alloc_id();
        core.emit_value(root_id, &root);
    }
    handle.subscribe_pending();

    FlightRequest {
        handle,
        rows: RowStream { rx },
    }
}

impl RequestCore {
    fn alloc_id(&mut self) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn emit(
        &mut self,
        id: RowId,
        tag: RowTag,
        payload: &[u8],
    ) {
        let Some(sink) = &self.sink else {
            trace!(id, ?tag, "row dropped, request is closed");
            return;
        };
        trace!(id, ?tag, len = payload.len(), "emit row");
        if sink.send(encode_row(id, tag, payload)).is_err() {
            debug!("row stream receiver dropped, closing request");
            self.sink = None;
        }
    }

    fn emit_value(
        &mut self,
        id: RowId,
        value: &Value,
    ) {
        match self.model(value) {
            Ok(model) => self.emit(id, RowTag::Model, model.to_string().as_bytes()),
            Err(err) => {
                warn!(id, error = %err, "value could not be encoded");
                self.emit_error(id, &err);
            }
        }
    }

    fn emit_error(
        &mut self,
        id: RowId,
        err: &StackError,
    ) {
        match serde_json::to_vec(&err.to_payload()) {
            Ok(body) => self.emit(id, RowTag::Error, &body),
            Err(json_err) => warn!(id, error = %json_err, "error row could not be encoded"),
        }
    }

    fn emit_settled(
        &mut self,
        id: RowId,
        outcome: &Settled,
    ) {
        match outcome {
            Ok(value) => self.emit_value(id, value),
            Err(reason) => self.emit_error(id, reason),
        }
    }

    /// Строит JSON-модель значения, выделяя строки для зависимостей.
    fn model(
        &mut self,
        value: &Value,
    ) -> FlightResult<Json> {
        let model = match value {
            Value::Null => Json::Null,
            Value::Undefined => escaped(Escape::Undefined),
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(n) => match Escape::for_float(*n) {
                Some(escape) => escaped(escape),
                None => Number::from_f64(*n).map(Json::Number).ok_or_else(|| {
                    StackError::new(GenericError::new(
                        StatusCode::EncodingError,
                        format!("float {n} has no JSON form"),
                    ))
                })?,
            },
            Value::BigInt(n) => escaped(Escape::BigInt(*n)),
            Value::Str(s) if s.len() >= self.options.long_string_threshold => {
                escaped(Escape::Reference(self.outline_text(s)))
            }
            Value::Str(s) => Json::String(escape_string(s)),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.model(item))
                    .collect::<FlightResult<_>>()?,
            ),
            Value::Object(fields) => {
                let mut map = JsonMap::new();
                for (key, item) in fields {
                    map.insert(key.clone(), self.model(item)?);
                }
                Json::Object(map)
            }
            Value::Map(entries) => {
                let id = self.alloc_id();
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    pairs.push(Json::Array(vec![self.model(key)?, self.model(item)?]));
                }
                self.emit(id, RowTag::Model, Json::Array(pairs).to_string().as_bytes());
                escaped(Escape::Map(id))
            }
            Value::Set(items) => {
                let id = self.alloc_id();
                let members = items
                    .iter()
                    .map(|item| self.model(item))
                    .collect::<FlightResult<Vec<_>>>()?;
                self.emit(id, RowTag::Model, Json::Array(members).to_string().as_bytes());
                escaped(Escape::Set(id))
            }
            Value::Binary(view) => {
                let (kind, byte_offset, byte_length, buffer) = encode_binary(view);
                escaped(Escape::Binary {
                    kind,
                    buffer: self.outline_buffer(buffer),
                    byte_offset,
                    byte_length,
                })
            }
            Value::Promise(thenable) => escaped(Escape::Promise(self.outline_promise(thenable))),
            Value::ClientReference(reference) => {
                escaped(Escape::Reference(self.outline_reference(reference)?))
            }
            Value::Module(module) => {
                let id = self.alloc_id();
                self.emit(id, RowTag::Import, serde_json::to_string(module)?.as_bytes());
                escaped(Escape::Reference(id))
            }
        };
        Ok(model)
    }

    fn outline_text(
        &mut self,
        text: &str,
    ) -> RowId {
        if let Some(&id) = self.long_strings.get(text) {
            return id;
        }
        let id = self.alloc_id();
        self.emit(id, RowTag::Text, text.as_bytes());
        self.long_strings.insert(text.to_string(), id);
        id
    }

    fn outline_buffer(
        &mut self,
        buffer: Bytes,
    ) -> RowId {
        let key = (buffer.as_ptr() as usize, buffer.len());
        if let Some((id, _)) = self.buffers.get(&key) {
            return *id;
        }
        let id = self.alloc_id();
        self.emit(id, RowTag::Binary(ElementKind::ArrayBuffer), &buffer);
        self.buffers.insert(key, (id, buffer));
        id
    }

    fn outline_reference(
        &mut self,
        reference: &ClientReference,
    ) -> FlightResult<RowId> {
        if let Some(&id) = self.references.get(reference) {
            return Ok(id);
        }
        let metadata = self.resolver.resolve(reference)?;
        let id = self.alloc_id();
        self.emit(id, RowTag::Import, serde_json::to_string(&metadata)?.as_bytes());
        self.references.insert(reference.clone(), id);
        Ok(id)
    }

    fn outline_promise(
        &mut self,
        thenable: &Thenable,
    ) -> RowId {
        let id = self.alloc_id();
        match thenable.outcome() {
            Some(outcome) => self.emit_settled(id, &outcome),
            None => {
                self.emit(id, RowTag::Pending, b"");
                self.pending.insert(id);
                // Подписка — после освобождения блокировки.
                self.subscriptions.push((id, thenable.clone()));
            }
        }
        id
    }

    fn finish_if_idle(&mut self) {
        if self.pending.is_empty() && self.sink.take().is_some() {
            debug!(rows = self.next_id, "request complete");
        }
    }
}

fn escaped(escape: Escape) -> Json {
    Json::String(escape.to_string())
}

impl RequestHandle {
    fn subscribe_pending(&self) {
        loop {
            let subscriptions = std::mem::take(&mut self.core.lock().subscriptions);
            if subscriptions.is_empty() {
                break;
            }
            for (id, thenable) in subscriptions {
                let handle = self.clone();
                thenable.on_settle(move |outcome| handle.settle(id, outcome));
            }
        }
        self.core.lock().finish_if_idle();
    }

    fn settle(
        &self,
        id: RowId,
        outcome: &Settled,
    ) {
        {
            let mut core = self.core.lock();
            if !core.pending.remove(&id) {
                trace!(id, "settled after abort, ignored");
                return;
            }
            debug!(id, ok = outcome.is_ok(), "async value settled");
            core.emit_settled(id, outcome);
        }
        self.subscribe_pending();
    }

    /// Прерывает запрос: каждое ожидающее значение получает строку `E`, и
    /// поток закрывается.
    pub fn abort(
        &self,
        reason: impl Into<String>,
    ) {
        let mut core = self.core.lock();
        if core.sink.is_none() {
            return;
        }
        let reason = StackError::new(FlightEncodeError::Aborted {
            reason: reason.into(),
        });
        let pending = std::mem::take(&mut core.pending);
        warn!(pending = pending.len(), %reason, "request aborted");
        for id in pending {
            core.emit_error(id, &reason);
        }
        core.subscriptions.clear();
        core.sink = None;
    }

    /// Кол-во ещё не разрешённых асинхронных значений.
    pub fn pending_count(&self) -> usize {
        self.core.lock().pending.len()
    }

    /// Поток строк закрыт (всё записано или запрос прерван).
    pub fn is_complete(&self) -> bool {
        self.core.lock().sink.is_none()
    }
}

impl RowStream {
    /// Следующая строка; `None`, когда запрос завершён и все строки
    /// прочитаны.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Строка, если она уже готова.
    pub fn try_next(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Все уже готовые строки.
    pub fn drain_ready(&mut self) -> Vec<Bytes> {
        let mut rows = Vec::new();
        while let Some(row) = self.try_next() {
            rows.push(row);
        }
        rows
    }

    /// Читает поток до конца и склеивает строки.
    pub async fn read_to_end(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await {
            out.extend_from_slice(&row);
        }
        out
    }
}

impl FlightRequest {
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    pub fn abort(
        &self,
        reason: impl Into<String>,
    ) {
        self.handle.abort(reason);
    }

    pub fn rows(&mut self) -> &mut RowStream {
        &mut self.rows
    }

    pub fn into_stream(self) -> RowStream {
        self.rows
    }

    pub fn into_parts(self) -> (RequestHandle, RowStream) {
        (self.handle, self.rows)
    }
}
