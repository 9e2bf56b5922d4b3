//! Single-binding capability slots, multi-subscriber event hubs, and the
//! queue through which render collaborators are called.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::state::WatchHandle;

/// A callback slot that must be bound exactly once before it is used.
///
/// Binding twice or reading an unbound slot is a programming error and panics.
pub struct ExclusiveSlot<F: ?Sized> {
    name: &'static str,
    slot: RefCell<Option<Rc<F>>>,
}

impl<F: ?Sized> ExclusiveSlot<F> {
    pub fn new(name: &'static str) -> Self {
        Self { name, slot: RefCell::new(None) }
    }

    pub fn bind(&self, callback: Rc<F>) {
        let mut slot = self.slot.borrow_mut();
        assert!(slot.is_none(), "capability `{}` bound more than once", self.name);
        *slot = Some(callback);
    }

    pub fn get(&self) -> Rc<F> {
        match self.slot.borrow().as_ref() {
            Some(callback) => callback.clone(),
            None => panic!("capability `{}` used before it was bound", self.name),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl<F: ?Sized> fmt::Debug for ExclusiveSlot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveSlot")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

type Subscribers<E> = RefCell<Vec<(u64, Rc<dyn Fn(&E)>)>>;

/// Broadcasts events to every current subscriber, in subscription order.
pub struct EventHub<E> {
    subscribers: Rc<Subscribers<E>>,
    next_key: Cell<u64>,
}

impl<E: 'static> EventHub<E> {
    pub fn new() -> Self {
        Self { subscribers: Rc::new(RefCell::new(Vec::new())), next_key: Cell::new(0) }
    }

    /// Subscribe until the returned handle is dropped.
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> WatchHandle {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        self.subscribers.borrow_mut().push((key, Rc::new(callback)));

        let subscribers = Rc::downgrade(&self.subscribers);
        WatchHandle::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.borrow_mut().retain(|(k, _)| *k != key);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let current: Vec<_> = self.subscribers.borrow().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in current {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl<E: 'static> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

type Call = Box<dyn FnOnce()>;

/// Collaborator calls held back until their owner has released its state.
///
/// Calls run in the order they were queued. A call queued while a flush is
/// running is picked up by that same flush, after the call that queued it
/// has returned.
#[derive(Default)]
pub struct CallbackQueue {
    calls: RefCell<VecDeque<Call>>,
    flushing: Cell<bool>,
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, call: impl FnOnce() + 'static) {
        self.calls.borrow_mut().push_back(Box::new(call));
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub fn flush(&self) {
        if self.flushing.replace(true) {
            return;
        }
        while let Some(call) = self.pop() {
            call();
        }
        self.flushing.set(false);
    }

    fn pop(&self) -> Option<Call> {
        self.calls.borrow_mut().pop_front()
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("pending", &self.len())
            .field("flushing", &self.flushing.get())
            .finish()
    }
}

/// A collaborator that is only ever reached through a [`CallbackQueue`].
///
/// Constructed with [`Deferred::build`], even the constructor runs from the
/// queue, so no collaborator code runs while its owner is mid-update.
pub struct Deferred<T: ?Sized> {
    target: Rc<RefCell<Option<Box<T>>>>,
    queue: Rc<CallbackQueue>,
}

impl<T: ?Sized + 'static> Deferred<T> {
    /// Wrap an already built collaborator.
    pub fn new(queue: &Rc<CallbackQueue>, target: Box<T>) -> Self {
        Self { target: Rc::new(RefCell::new(Some(target))), queue: queue.clone() }
    }

    /// Build the collaborator on the next flush.
    pub fn build(queue: &Rc<CallbackQueue>, build: impl FnOnce() -> Box<T> + 'static) -> Self {
        let target = Rc::new(RefCell::new(None));
        let slot = target.clone();
        queue.defer(move || {
            let built = build();
            *slot.borrow_mut() = Some(built);
        });
        Self { target, queue: queue.clone() }
    }

    /// Queue `f` to run against the collaborator.
    pub fn call(&self, f: impl FnOnce(&mut T) + 'static) {
        let target = self.target.clone();
        self.queue.defer(move || {
            let mut slot = target.borrow_mut();
            match slot.as_deref_mut() {
                Some(target) => f(target),
                None => log::warn!("Dropping call to a collaborator that was never built"),
            }
        });
    }

    pub fn queue(&self) -> &Rc<CallbackQueue> {
        &self.queue
    }
}

impl<T: ?Sized> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let built = self.target.try_borrow().map(|t| t.is_some()).unwrap_or(true);
        f.debug_struct("Deferred").field("built", &built).finish()
    }
}
