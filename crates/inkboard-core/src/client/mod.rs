//! Protocol client.
//!
//! A sans-IO request/response and notification layer. Outbound frames are
//! queued and drained with [`RawClient::take_outgoing`]; inbound frames are
//! fed to [`RawClient::handle_message`]. The transport in between is someone
//! else's concern.
//!
//! Frames are JSON objects tagged by `protocol`:
//!
//! - `Method` / `Iterate` (outbound): `name`, `id`, plus the call's arguments
//! - `Response`: `id`, `value`
//! - `Response-Part`: `id`, `part`, `complete`, `items`
//! - `Notify-C`: `name`, plus the notification's fields
//!
//! Method calls are queued when they are made, not when their future is first
//! polled, and are never retracted. No timeout is imposed on outstanding
//! calls; a response that arrives for an id nobody is waiting on is logged and
//! dropped.

mod iterate;

pub use iterate::IterateStream;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::{mpsc, oneshot};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use iterate::IterateReceiver;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to encode {name} call: {reason}")]
    Encode { name: &'static str, reason: String },
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("call was dropped before a response arrived")]
    Cancelled,
}

/// A request/response call.
pub trait Method: Serialize {
    const NAME: &'static str;
    type Response: DeserializeOwned;
}

/// A call whose response arrives as numbered parts.
pub trait Iterate: Serialize {
    const NAME: &'static str;
    type Item: DeserializeOwned;
}

/// A server-pushed notification.
pub trait Notify: DeserializeOwned {
    const NAME: &'static str;
}

/// Error payload of a failed server operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The resource is in use by another client.
    NotAvailable,
    Internal,
    NotFound,
    EmptyPath,
    /// The data is incompatible with the operation.
    BadData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("server error {code:?}: {}", .msg.as_deref().unwrap_or("no detail"))]
pub struct ServerError {
    pub code: ErrorCode,
    pub msg: Option<String>,
}

/// Outcome of a server operation, `{"status": "Ok"|"Err", "value": ...}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value")]
pub enum ServerResult<T> {
    Ok(T),
    Err(ServerError),
}

impl<T> ServerResult<T> {
    pub fn into_result(self) -> Result<T, ServerError> {
        match self {
            ServerResult::Ok(v) => Ok(v),
            ServerResult::Err(e) => Err(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ServerResult::Ok(_))
    }
}

impl<T> From<ServerResult<T>> for Result<T, ServerError> {
    fn from(value: ServerResult<T>) -> Self {
        value.into_result()
    }
}

#[derive(Deserialize)]
#[serde(tag = "protocol")]
enum Incoming {
    Response {
        id: u32,
        #[serde(default)]
        value: Value,
    },
    #[serde(rename = "Response-Part")]
    ResponsePart {
        id: u32,
        part: u32,
        complete: bool,
        items: Vec<Value>,
    },
    #[serde(rename = "Notify-C")]
    Notify {
        name: String,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
}

type NotifyHandler = Rc<dyn Fn(Value)>;

#[derive(Default)]
struct Inner {
    next_id: Cell<u32>,
    calls: RefCell<HashMap<u32, oneshot::Sender<Value>>>,
    iterates: RefCell<HashMap<u32, IterateReceiver>>,
    notify: RefCell<HashMap<&'static str, NotifyHandler>>,
    outgoing: RefCell<VecDeque<String>>,
}

/// Shared handle to one protocol session. Cloning shares the session.
#[derive(Clone, Default)]
pub struct RawClient {
    inner: Rc<Inner>,
}

impl fmt::Debug for RawClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawClient")
            .field("pending_calls", &self.pending_calls())
            .field("outgoing", &self.inner.outgoing.borrow().len())
            .finish_non_exhaustive()
    }
}

impl RawClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u32 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id.wrapping_add(1));
        id
    }

    fn encode<A: Serialize>(protocol: &str, name: &'static str, id: u32, args: &A) -> Result<String, ClientError> {
        let encode_err = |reason: String| ClientError::Encode { name, reason };
        let mut frame = match serde_json::to_value(args).map_err(|e| encode_err(e.to_string()))? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(encode_err(format!("arguments must be an object, got {other}"))),
        };
        frame.insert("protocol".into(), Value::from(protocol));
        frame.insert("name".into(), Value::from(name));
        frame.insert("id".into(), Value::from(id));
        serde_json::to_string(&frame).map_err(|e| encode_err(e.to_string()))
    }

    fn queue(&self, frame: String) {
        log::trace!("Queued: {:.100}", frame);
        self.inner.outgoing.borrow_mut().push_back(frame);
    }

    /// Send a method call. The frame is queued immediately; the returned future
    /// resolves when the matching response arrives.
    pub fn call_method<M: Method>(&self, args: &M) -> MethodCall<M::Response> {
        let id = self.next_id();
        match Self::encode("Method", M::NAME, id, args) {
            Ok(frame) => {
                let (tx, rx) = oneshot::channel();
                self.inner.calls.borrow_mut().insert(id, tx);
                self.queue(frame);
                log::debug!("Method {} sent as call {}", M::NAME, id);
                MethodCall::pending(M::NAME, rx)
            }
            Err(e) => MethodCall::failed(M::NAME, e),
        }
    }

    /// Start an iterate call. Parts are delivered in order on the returned stream.
    pub fn call_iterate<I: Iterate>(&self, args: &I) -> Result<IterateStream<I::Item>, ClientError> {
        let id = self.next_id();
        let frame = Self::encode("Iterate", I::NAME, id, args)?;
        let (tx, rx) = mpsc::unbounded();
        self.inner.iterates.borrow_mut().insert(id, IterateReceiver::new(id, tx));
        self.queue(frame);
        log::debug!("Iterate {} sent as call {}", I::NAME, id);
        Ok(IterateStream::new(rx))
    }

    /// Register the handler for notification kind `N`.
    ///
    /// # Panics
    ///
    /// If a handler for `N` is already bound.
    pub fn bind_notify<N, F>(&self, handler: F)
    where
        N: Notify + 'static,
        F: Fn(N) + 'static,
    {
        let mut notify = self.inner.notify.borrow_mut();
        assert!(!notify.contains_key(N::NAME), "notification {} bound twice", N::NAME);
        notify.insert(
            N::NAME,
            Rc::new(move |value| match serde_json::from_value::<N>(value) {
                Ok(n) => handler(n),
                Err(e) => log::error!("Dropping undecodable {} notification: {}", N::NAME, e),
            }),
        );
    }

    pub fn unbind_notify<N: Notify>(&self) -> bool {
        self.inner.notify.borrow_mut().remove(N::NAME).is_some()
    }

    pub fn is_bound<N: Notify>(&self) -> bool {
        self.inner.notify.borrow().contains_key(N::NAME)
    }

    /// Dispatch one inbound frame.
    ///
    /// Protocol mismatches (unknown call ids, unbound notifications) are
    /// logged and dropped. Only a frame that is not valid JSON in one of the
    /// known shapes is an error.
    pub fn handle_message(&self, text: &str) -> Result<(), ClientError> {
        let incoming: Incoming = serde_json::from_str(text).map_err(ClientError::Malformed)?;
        match incoming {
            Incoming::Response { id, value } => {
                let sender = self.inner.calls.borrow_mut().remove(&id);
                match sender {
                    Some(tx) => {
                        if tx.send(value).is_err() {
                            log::debug!("Response {} arrived after its caller went away", id);
                        }
                    }
                    None => log::error!("Dropping response for unknown call {}", id),
                }
            }
            Incoming::ResponsePart { id, part, complete, items } => {
                let receiver = self.inner.iterates.borrow_mut().remove(&id);
                match receiver {
                    Some(mut receiver) => {
                        if !receiver.receive(part, complete, items) {
                            self.inner.iterates.borrow_mut().insert(id, receiver);
                        }
                    }
                    None => log::error!("Dropping part {} for unknown iterate {}", part, id),
                }
            }
            Incoming::Notify { name, fields } => {
                let handler = self.inner.notify.borrow().get(name.as_str()).cloned();
                match handler {
                    Some(handler) => handler(Value::Object(fields)),
                    None => log::warn!("No handler bound for notification {}", name),
                }
            }
        }
        Ok(())
    }

    /// Drain the queued outbound frames.
    pub fn take_outgoing(&self) -> Vec<String> {
        self.inner.outgoing.borrow_mut().drain(..).collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.inner.outgoing.borrow().is_empty()
    }

    /// Method calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.borrow().len()
    }
}

enum CallState {
    Pending(oneshot::Receiver<Value>),
    Failed(Option<ClientError>),
}

/// Future for the response to a [`RawClient::call_method`].
#[must_use = "the call is sent regardless; the future only carries its response"]
pub struct MethodCall<R> {
    name: &'static str,
    state: CallState,
    _marker: PhantomData<fn() -> R>,
}

impl<R> MethodCall<R> {
    fn pending(name: &'static str, rx: oneshot::Receiver<Value>) -> Self {
        Self { name, state: CallState::Pending(rx), _marker: PhantomData }
    }

    fn failed(name: &'static str, error: ClientError) -> Self {
        Self { name, state: CallState::Failed(Some(error)), _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<R> fmt::Debug for MethodCall<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<R: DeserializeOwned> Future for MethodCall<R> {
    type Output = Result<R, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            CallState::Pending(rx) => rx.poll_unpin(cx).map(|value| match value {
                Ok(value) => serde_json::from_value(value).map_err(ClientError::Decode),
                Err(oneshot::Canceled) => Err(ClientError::Cancelled),
            }),
            CallState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(ClientError::Cancelled))),
        }
    }
}
