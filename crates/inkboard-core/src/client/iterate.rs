//! Reassembly of chunked iterate responses.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ClientError;

struct Part {
    complete: bool,
    items: Vec<Value>,
}

/// Buffers out-of-order parts of one iterate call and forwards them in
/// part order.
pub(crate) struct IterateReceiver {
    id: u32,
    next_part: u32,
    pending: BTreeMap<u32, Part>,
    sink: UnboundedSender<Vec<Value>>,
    finished: bool,
}

impl IterateReceiver {
    pub(crate) fn new(id: u32, sink: UnboundedSender<Vec<Value>>) -> Self {
        Self { id, next_part: 0, pending: BTreeMap::new(), sink, finished: false }
    }

    /// Accept one part. Returns `true` once the complete part and every part
    /// before it have been forwarded.
    pub(crate) fn receive(&mut self, part: u32, complete: bool, items: Vec<Value>) -> bool {
        if self.finished {
            log::warn!("Iterate {}: part {} arrived after completion", self.id, part);
            return true;
        }
        if part < self.next_part || self.pending.contains_key(&part) {
            log::warn!("Iterate {}: duplicate part {}", self.id, part);
            return false;
        }
        self.pending.insert(part, Part { complete, items });

        while let Some(Part { complete, items }) = self.pending.remove(&self.next_part) {
            if self.sink.unbounded_send(items).is_err() {
                log::debug!("Iterate {}: reader dropped, discarding part {}", self.id, self.next_part);
            }
            self.next_part += 1;
            if complete {
                self.finished = true;
                self.sink.close_channel();
                if !self.pending.is_empty() {
                    log::warn!("Iterate {}: {} parts after the final part", self.id, self.pending.len());
                }
                break;
            }
        }
        self.finished
    }
}

/// The parts of an iterate response, in order, with each item decoded.
///
/// Finite and single-reader. Ends after the part flagged complete.
pub struct IterateStream<T> {
    rx: UnboundedReceiver<Vec<Value>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> IterateStream<T> {
    pub(crate) fn new(rx: UnboundedReceiver<Vec<Value>>) -> Self {
        Self { rx, _marker: PhantomData }
    }

    /// Flatten the parts into a stream of individual items.
    pub fn dechunk(self) -> impl Stream<Item = Result<T, ClientError>> {
        self.flat_map(stream::iter)
    }
}

impl<T: DeserializeOwned> Stream for IterateStream<T> {
    type Item = Vec<Result<T, ClientError>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx).map(|part| {
            part.map(|items| {
                items
                    .into_iter()
                    .map(|v| serde_json::from_value(v).map_err(ClientError::Decode))
                    .collect()
            })
        })
    }
}
