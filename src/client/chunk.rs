//! Чанк — значение одной строки на стороне потребителя.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use flight_error::StackError;

use crate::protocol::{RowId, Settled, Thenable, ThenableStatus, Value};

/// Состояние чанка.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Resolved,
    Errored,
}

/// Разделяемая ручка чанка.
///
/// Можно ждать как future из любой задачи; после разрешения `value()` и
/// `reason()` синхронны и больше не меняются.
#[derive(Clone, PartialEq)]
pub struct Chunk {
    id: RowId,
    thenable: Thenable,
}

impl Chunk {
    pub(crate) fn new(id: RowId) -> Self {
        Self {
            id,
            thenable: Thenable::new(),
        }
    }

    pub(crate) fn rejected(
        id: RowId,
        reason: StackError,
    ) -> Self {
        Self {
            id,
            thenable: Thenable::rejected(reason),
        }
    }

    pub(crate) fn settle(
        &self,
        outcome: Settled,
    ) -> bool {
        match outcome {
            Ok(value) => self.thenable.resolve(value),
            Err(reason) => self.thenable.reject(reason),
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn status(&self) -> ChunkStatus {
        match self.thenable.status() {
            ThenableStatus::Pending => ChunkStatus::Pending,
            ThenableStatus::Fulfilled => ChunkStatus::Resolved,
            ThenableStatus::Rejected => ChunkStatus::Errored,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == ChunkStatus::Pending
    }

    pub fn value(&self) -> Option<Value> {
        self.thenable.value()
    }

    pub fn reason(&self) -> Option<StackError> {
        self.thenable.reason()
    }

    /// Слушатель вызывается ровно один раз, когда значение собрано целиком.
    pub fn on_settle<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce(&Settled) + Send + 'static,
    {
        self.thenable.on_settle(listener);
    }

    /// Ячейка под чанком; она же лежит в `Value::Promise`.
    pub fn thenable(&self) -> &Thenable {
        &self.thenable
    }
}

impl Future for Chunk {
    type Output = Settled;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.thenable).poll(cx)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}
