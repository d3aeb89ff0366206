//! Thenable: разделяемая ячейка, которая разрешается не более одного раза.
//!
//! На ней построены асинхронные значения (`Value::Promise`) и чанки
//! декодера. Слушатели вызываются ровно один раз, в порядке регистрации, и
//! всегда вне блокировки: список снимается под мьютексом, а вызывается
//! после его освобождения, поэтому слушатель может свободно обращаться к
//! той же ячейке.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use flight_error::StackError;
use parking_lot::Mutex;

use super::value::Value;

/// Итог разрешения.
pub type Settled = Result<Value, StackError>;

type Listener = Box<dyn FnOnce(&Settled) + Send>;

/// Состояние ячейки.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThenableStatus {
    Pending,
    Fulfilled,
    Rejected,
}

enum State {
    Pending {
        listeners: Vec<Listener>,
        wakers: Vec<Waker>,
    },
    Settled(Settled),
}

/// Settle-once future с упорядоченными слушателями.
#[derive(Clone)]
pub struct Thenable {
    inner: Arc<Mutex<State>>,
}

impl Thenable {
    /// Новая неразрешённая ячейка.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Pending {
                listeners: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Settled(Ok(value)))),
        }
    }

    pub fn rejected(reason: StackError) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Settled(Err(reason)))),
        }
    }

    /// Разрешает значением. Возвращает `false`, если ячейка уже разрешена.
    pub fn resolve(
        &self,
        value: Value,
    ) -> bool {
        self.settle(Ok(value))
    }

    /// Отклоняет с причиной. Возвращает `false`, если ячейка уже разрешена.
    pub fn reject(
        &self,
        reason: StackError,
    ) -> bool {
        self.settle(Err(reason))
    }

    fn settle(
        &self,
        outcome: Settled,
    ) -> bool {
        let (listeners, wakers) = {
            let mut state = self.inner.lock();
            let State::Pending { listeners, wakers } = &mut *state else {
                return false;
            };
            let taken = (std::mem::take(listeners), std::mem::take(wakers));
            *state = State::Settled(outcome.clone());
            taken
        };

        for listener in listeners {
            listener(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Регистрирует слушателя. Если ячейка уже разрешена, он вызывается
    /// сразу, в текущем потоке.
    pub fn on_settle<F>(
        &self,
        listener: F,
    ) where
        F: FnOnce(&Settled) + Send + 'static,
    {
        let outcome = {
            let mut state = self.inner.lock();
            match &mut *state {
                State::Pending { listeners, .. } => {
                    listeners.push(Box::new(listener));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        listener(&outcome);
    }

    pub fn status(&self) -> ThenableStatus {
        match &*self.inner.lock() {
            State::Pending { .. } => ThenableStatus::Pending,
            State::Settled(Ok(_)) => ThenableStatus::Fulfilled,
            State::Settled(Err(_)) => ThenableStatus::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status() != ThenableStatus::Pending
    }

    /// Снимок итога, `None` пока ячейка не разрешена.
    pub fn outcome(&self) -> Option<Settled> {
        match &*self.inner.lock() {
            State::Pending { .. } => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn value(&self) -> Option<Value> {
        self.outcome().and_then(Result::ok)
    }

    pub fn reason(&self) -> Option<StackError> {
        self.outcome().and_then(Result::err)
    }

    /// Указывают ли две ручки на одну ячейку.
    pub fn ptr_eq(
        &self,
        other: &Thenable,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Thenable {
    fn default() -> Self {
        Self::new()
    }
}

impl Future for Thenable {
    type Output = Settled;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let mut state = self.inner.lock();
        match &mut *state {
            State::Settled(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Одна и та же ячейка или обе разрешены одинаково.
impl PartialEq for Thenable {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.outcome(), other.outcome()) {
            (Some(Ok(a)), Some(Ok(b))) => a == b,
            (Some(Err(a)), Some(Err(b))) => {
                a.same_origin(&b)
                    || (a.status_code() == b.status_code() && a.to_string() == b.to_string())
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Thenable {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.outcome() {
            None => write!(f, "Thenable(<pending>)"),
            Some(Ok(value)) => write!(f, "Thenable({value:?})"),
            Some(Err(reason)) => write!(f, "Thenable(<rejected: {reason}>)"),
        }
    }
}
