//! Сессия декодирования: таблица чанков.
//!
//! Строки разбираются по мере прихода байт. Модель (`J`) со ссылками на ещё
//! не разрешённые строки блокируется: чанк запоминает число недостающих
//! зависимостей, а каждая зависимость — список ждущих её владельцев. Когда
//! последняя зависимость разрешается, значение собирается целиком и только
//! после этого чанк разрешается; это каскадом поднимается вверх по
//! владельцам. Ошибка распространяется по тем же спискам, не задевая
//! соседние ветви.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Arc,
};

use flight_error::{ErrorPayload, FlightDecodeError, FlightResult, StackError};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::{debug, error, trace, warn};

use super::{
    chunk::{Chunk, ChunkStatus},
    module_map::{load_instructions, translate, ModuleLoader, ModuleLoading, ModuleMap},
};
use crate::protocol::{
    collect_references, decode_binary, parse_escape, BinaryView, Escape, ModuleReference, Row,
    RowDecoder, RowId, RowPayload, RowTag, Settled, Value,
};

/// Параметры сессии декодирования.
#[derive(Clone, Default)]
pub struct DecodeOptions {
    pub module_map: Option<ModuleMap>,
    pub module_loading: Option<ModuleLoading>,
    /// Добавляется к каждой инструкции загрузки.
    pub nonce: Option<String>,
    pub loader: Option<Arc<dyn ModuleLoader>>,
    /// Владелец без записей в карте — промах, а не исходные метаданные.
    pub strict_module_map: bool,
}

struct Blocked {
    model: Json,
    waiting: usize,
}

struct ChunkEntry {
    chunk: Chunk,
    blocked: Option<Blocked>,
}

/// Таблица чанков одного потока.
pub struct DecodeSession {
    options: DecodeOptions,
    decoder: RowDecoder,
    chunks: FxHashMap<RowId, ChunkEntry>,
    // id зависимости → владельцы, которые её ждут
    dependents: FxHashMap<RowId, Vec<RowId>>,
    fatal: Option<StackError>,
    closed: bool,
}

impl DecodeSession {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            decoder: RowDecoder::new(),
            chunks: FxHashMap::default(),
            dependents: FxHashMap::default(),
            fatal: None,
            closed: false,
        }
    }

    /// Корневой чанк (строка 0).
    pub fn root(&mut self) -> Chunk {
        self.chunk(0)
    }

    /// Чанк по id; создаётся в состоянии `Pending`, если строк для него ещё
    /// не было.
    pub fn chunk(
        &mut self,
        id: RowId,
    ) -> Chunk {
        self.ensure_chunk(id).clone()
    }

    /// Кол-во чанков, ещё ждущих своих строк или зависимостей.
    pub fn pending_count(&self) -> usize {
        self.chunks
            .values()
            .filter(|entry| entry.chunk.is_pending())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Фатальная ошибка, сломавшая сессию.
    pub fn fatal_error(&self) -> Option<&StackError> {
        self.fatal.as_ref()
    }

    /// Подаёт очередной кусок байт и обрабатывает все полные строки.
    ///
    /// # Errors
    /// Только фатальные ошибки. После неё все ожидающие чанки отклонены той
    /// же причиной, а следующие вызовы возвращают её же.
    pub fn feed(
        &mut self,
        data: &[u8],
    ) -> FlightResult<()> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if self.closed {
            return Err(FlightDecodeError::ConnectionClosed.into());
        }

        self.decoder.push(data);
        loop {
            match self.decoder.next_row() {
                Ok(Some(row)) => {
                    if let Err(err) = self.process_row(row) {
                        return Err(self.fail(err));
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Конец потока. Незавершённая строка фатальна; остальные ожидающие
    /// чанки получают `ConnectionClosed`.
    pub fn close(&mut self) -> FlightResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if let Err(err) = self.decoder.finish() {
            return Err(self.fail(err));
        }

        let reason = StackError::new(FlightDecodeError::ConnectionClosed);
        let pending = self.reject_pending(&reason);
        debug!(pending, "session closed");
        Ok(())
    }

    /// Ломает сессию внешней причиной, например ошибкой чтения транспорта.
    pub fn abort(
        &mut self,
        reason: StackError,
    ) {
        if self.fatal.is_none() && !self.closed {
            self.fail(reason);
        }
        self.closed = true;
    }

    fn fail(
        &mut self,
        err: StackError,
    ) -> StackError {
        error!(error = %err, position = self.decoder.position(), "fatal flight decode error");
        self.fatal = Some(err.clone());
        self.reject_pending(&err);
        err
    }

    fn reject_pending(
        &mut self,
        reason: &StackError,
    ) -> usize {
        self.dependents.clear();
        let pending: Vec<Chunk> = self
            .chunks
            .values_mut()
            .filter(|entry| entry.chunk.is_pending())
            .map(|entry| {
                entry.blocked = None;
                entry.chunk.clone()
            })
            .collect();
        // Слушатели вызываются вне обхода таблицы.
        for chunk in &pending {
            chunk.settle(Err(reason.clone()));
        }
        pending.len()
    }

    fn ensure_chunk(
        &mut self,
        id: RowId,
    ) -> &Chunk {
        let fatal = self.fatal.clone();
        let closed = self.closed;
        &self
            .chunks
            .entry(id)
            .or_insert_with(|| {
                let chunk = match fatal {
                    Some(reason) => Chunk::rejected(id, reason),
                    None if closed => {
                        Chunk::rejected(id, FlightDecodeError::ConnectionClosed.into())
                    }
                    None => Chunk::new(id),
                };
                ChunkEntry {
                    chunk,
                    blocked: None,
                }
            })
            .chunk
    }

    /// Обрабатывает одну строку. Ошибка на выходе всегда фатальна;
    /// ошибки значений оседают в чанках.
    fn process_row(
        &mut self,
        row: Row,
    ) -> FlightResult<()> {
        let Row { id, tag, payload } = row;
        trace!(id, ?tag, "row");

        if let Some(entry) = self.chunks.get(&id) {
            if !entry.chunk.is_pending() || entry.blocked.is_some() {
                warn!(id, ?tag, "row for an already settled chunk ignored");
                return Ok(());
            }
        }

        match (tag, payload) {
            (RowTag::Model, RowPayload::Text(text)) => {
                let model: Json = serde_json::from_str(&text)
                    .map_err(|err| self.malformed(format!("row {id}: invalid model JSON: {err}")))?;
                self.resolve_model(id, model);
            }
            (RowTag::Error, RowPayload::Text(text)) => {
                let payload: ErrorPayload = serde_json::from_str(&text)
                    .map_err(|err| self.malformed(format!("row {id}: invalid error JSON: {err}")))?;
                self.settle(id, Err(payload.into()));
            }
            (RowTag::Import, RowPayload::Text(text)) => {
                let metadata: ModuleReference = serde_json::from_str(&text).map_err(|err| {
                    self.malformed(format!("row {id}: invalid module metadata: {err}"))
                })?;
                self.resolve_import(id, metadata);
            }
            (RowTag::Pending | RowTag::Blocked, _) => {
                self.ensure_chunk(id);
            }
            (RowTag::Text, RowPayload::Text(text)) => {
                self.settle(id, Ok(Value::Str(text)));
            }
            (RowTag::Binary(kind), RowPayload::Bytes(bytes)) => {
                let outcome = decode_binary(kind, bytes).map(Value::Binary).map_err(|err| {
                    StackError::new(FlightDecodeError::InvalidBinaryView {
                        reason: err.to_string(),
                    })
                });
                self.settle(id, outcome);
            }
            (tag, payload) => {
                return Err(self.malformed(format!(
                    "row {id}: tag {tag:?} with unexpected payload {payload:?}"
                )));
            }
        }
        Ok(())
    }

    fn resolve_model(
        &mut self,
        id: RowId,
        model: Json,
    ) {
        self.ensure_chunk(id);
        let refs = match collect_references(&model) {
            Ok(refs) => refs,
            Err(err) => return self.settle(id, Err(err)),
        };
        if refs.blocking.contains(&id) {
            let reason = FlightDecodeError::InvalidReference {
                reference: format!("${id}"),
                reason: "row references itself".to_string(),
            };
            return self.settle(id, Err(reason.into()));
        }

        for promise in refs.promises {
            self.ensure_chunk(promise);
        }

        let mut waiting = Vec::new();
        for dep in refs.blocking {
            let chunk = self.ensure_chunk(dep).clone();
            match chunk.status() {
                ChunkStatus::Resolved => {}
                ChunkStatus::Errored => {
                    if let Some(reason) = chunk.reason() {
                        return self.settle(id, Err(reason));
                    }
                }
                ChunkStatus::Pending => waiting.push(dep),
            }
        }

        if waiting.is_empty() {
            let outcome = self.materialize(&model);
            return self.settle(id, outcome);
        }

        debug!(id, waiting = waiting.len(), "chunk blocked on dependencies");
        for dep in &waiting {
            self.dependents.entry(*dep).or_default().push(id);
        }
        if let Some(entry) = self.chunks.get_mut(&id) {
            entry.blocked = Some(Blocked {
                model,
                waiting: waiting.len(),
            });
        }
    }

    fn resolve_import(
        &mut self,
        id: RowId,
        metadata: ModuleReference,
    ) {
        if let Some(loader) = &self.options.loader {
            for script in load_instructions(
                &metadata,
                self.options.module_loading.as_ref(),
                self.options.nonce.as_deref(),
            ) {
                trace!(id, src = %script.src, "preload");
                loader.preload(script);
            }
        }

        let outcome = translate(
            &metadata,
            self.options.module_map.as_ref(),
            self.options.strict_module_map,
        )
        .map(Value::Module)
        .map_err(|miss| {
            warn!(id, module = %miss.module_id, export = %miss.export_name, "module map miss");
            StackError::new(miss)
        });
        self.settle(id, outcome);
    }

    /// Разрешает чанк и каскадом — всех владельцев, которых он блокировал.
    fn settle(
        &mut self,
        id: RowId,
        outcome: Settled,
    ) {
        let mut queue = VecDeque::from([(id, outcome)]);

        while let Some((id, outcome)) = queue.pop_front() {
            let chunk = self.ensure_chunk(id).clone();
            if !chunk.is_pending() {
                continue;
            }
            if let Some(entry) = self.chunks.get_mut(&id) {
                entry.blocked = None;
            }

            let waiters = self.dependents.remove(&id).unwrap_or_default();
            let failure = outcome.as_ref().err().cloned();
            debug!(id, ok = failure.is_none(), "chunk settled");
            chunk.settle(outcome);

            match failure {
                None => {
                    for owner in waiters {
                        if let Some(model) = self.release(owner) {
                            let owner_outcome = self.materialize(&model);
                            queue.push_back((owner, owner_outcome));
                        }
                    }
                }
                Some(reason) => {
                    for owner in waiters {
                        queue.push_back((owner, Err(reason.clone())));
                    }
                }
            }
        }
    }

    /// Снимает с владельца одну зависимость. Возвращает модель, когда
    /// зависимостей не осталось.
    fn release(
        &mut self,
        owner: RowId,
    ) -> Option<Json> {
        let entry = self.chunks.get_mut(&owner)?;
        let blocked = entry.blocked.as_mut()?;
        blocked.waiting -= 1;
        if blocked.waiting > 0 {
            return None;
        }
        entry.blocked.take().map(|b| b.model)
    }

    /// Собирает значение из модели. Все блокирующие ссылки уже разрешены.
    fn materialize(
        &self,
        model: &Json,
    ) -> Settled {
        let value = match model {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => match parse_escape(s)? {
                None => Value::Str(s.clone()),
                Some(escape) => self.materialize_escape(escape)?,
            },
            Json::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.materialize(item))
                    .collect::<FlightResult<_>>()?,
            ),
            Json::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, item)| self.materialize(item).map(|value| (key.clone(), value)))
                    .collect::<FlightResult<BTreeMap<_, _>>>()?,
            ),
        };
        Ok(value)
    }

    fn materialize_escape(
        &self,
        escape: Escape,
    ) -> Settled {
        let value = match escape {
            Escape::Literal(s) => Value::Str(s),
            Escape::Undefined => Value::Undefined,
            Escape::Float(n) => Value::Float(n),
            Escape::BigInt(n) => Value::BigInt(n),
            Escape::Reference(id) => self.resolved(id)?,
            Escape::Promise(id) => match self.chunks.get(&id) {
                Some(entry) => Value::Promise(entry.chunk.thenable().clone()),
                None => return Err(invalid(&escape, "promise chunk is missing")),
            },
            Escape::Map(id) => {
                let Value::Array(entries) = self.resolved(id)? else {
                    return Err(invalid(&escape, "Map entries must be an array"));
                };
                let mut pairs = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry {
                        Value::Array(pair) if pair.len() == 2 => {
                            let mut pair = pair.into_iter();
                            if let (Some(key), Some(value)) = (pair.next(), pair.next()) {
                                pairs.push((key, value));
                            }
                        }
                        _ => return Err(invalid(&escape, "Map entry must be a [key, value] pair")),
                    }
                }
                Value::Map(pairs)
            }
            Escape::Set(id) => match self.resolved(id)? {
                Value::Array(members) => Value::Set(members),
                _ => return Err(invalid(&escape, "Set members must be an array")),
            },
            Escape::Binary {
                kind,
                buffer,
                byte_offset,
                byte_length,
            } => {
                let Value::Binary(source) = self.resolved(buffer)? else {
                    return Err(invalid(&escape, "binary reference must point to a binary row"));
                };
                let view = BinaryView::new(kind, source.bytes(), byte_offset, byte_length)
                    .map_err(|err| {
                        StackError::new(FlightDecodeError::InvalidBinaryView {
                            reason: err.to_string(),
                        })
                    })?;
                Value::Binary(view)
            }
        };
        Ok(value)
    }

    fn resolved(
        &self,
        id: RowId,
    ) -> Settled {
        self.chunks
            .get(&id)
            .and_then(|entry| entry.chunk.value())
            .ok_or_else(|| {
                FlightDecodeError::InvalidReference {
                    reference: format!("${id}"),
                    reason: "referenced row is not resolved".to_string(),
                }
                .into()
            })
    }

    fn malformed(
        &self,
        reason: String,
    ) -> StackError {
        FlightDecodeError::MalformedRow {
            position: self.decoder.position(),
            reason,
        }
        .into()
    }
}

fn invalid(
    escape: &Escape,
    reason: &str,
) -> StackError {
    FlightDecodeError::InvalidReference {
        reference: escape.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl fmt::Debug for DecodeOptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("module_map", &self.module_map)
            .field("module_loading", &self.module_loading)
            .field("nonce", &self.nonce)
            .field("loader", &self.loader.is_some())
            .field("strict_module_map", &self.strict_module_map)
            .finish()
    }
}

impl fmt::Debug for DecodeSession {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DecodeSession")
            .field("chunks", &self.chunks.len())
            .field("pending", &self.pending_count())
            .field("buffered", &self.decoder.buffered())
            .field("closed", &self.closed)
            .field("fatal", &self.fatal)
            .finish()
    }
}
