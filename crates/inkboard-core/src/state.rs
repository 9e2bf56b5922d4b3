//! Observable value cells.
//!
//! A [`MutableState`] has a single writer. Readers get a [`State`] handle that
//! can be read, watched, or mapped into derived states. Every `set` notifies
//! all current watchers synchronously, in registration order, before it
//! returns. Derived states recompute exactly once per source update.
//!
//! Watches registered with [`State::watch`] live until their [`WatchHandle`]
//! is dropped or ended. [`State::watch_weak`] also only keeps a weak reference
//! to the callback, so that watch ends early if its owner drops the callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

type Callback<T> = dyn Fn(&T);

enum Watcher<T> {
    Strong(Rc<Callback<T>>),
    Weak(Weak<Callback<T>>),
}

impl<T> Watcher<T> {
    fn upgrade(&self) -> Option<Rc<Callback<T>>> {
        match self {
            Watcher::Strong(cb) => Some(cb.clone()),
            Watcher::Weak(cb) => cb.upgrade(),
        }
    }
}

struct Inner<T> {
    value: RefCell<T>,
    watchers: RefCell<Vec<(u64, Watcher<T>)>>,
    next_key: Cell<u64>,
    /// Watches on upstream cells that keep this cell current.
    upstream: RefCell<Vec<WatchHandle>>,
}

impl<T: Clone + 'static> Inner<T> {
    fn new(value: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            watchers: RefCell::new(Vec::new()),
            next_key: Cell::new(0),
            upstream: RefCell::new(Vec::new()),
        })
    }

    fn register(&self, watcher: Watcher<T>) -> u64 {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        let mut watchers = self.watchers.borrow_mut();
        Self::prune(&mut watchers);
        watchers.push((key, watcher));
        key
    }

    /// Drop weak watches whose callback is gone.
    fn prune(watchers: &mut Vec<(u64, Watcher<T>)>) {
        watchers.retain(|(_, w)| !matches!(w, Watcher::Weak(cb) if cb.strong_count() == 0));
    }

    fn unregister(&self, key: u64) {
        self.watchers.borrow_mut().retain(|(k, _)| *k != key);
    }

    fn replace(&self, value: T) {
        *self.value.borrow_mut() = value.clone();
        self.notify(&value);
    }

    fn notify(&self, value: &T) {
        let live: Vec<Rc<Callback<T>>> = {
            let mut watchers = self.watchers.borrow_mut();
            Self::prune(&mut watchers);
            watchers.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        for callback in live {
            callback(value);
        }
    }
}

/// Ends a watch when dropped.
#[must_use = "dropping a WatchHandle ends the watch immediately"]
pub struct WatchHandle {
    release: Option<Box<dyn FnOnce()>>,
}

impl WatchHandle {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    /// Stop watching now.
    pub fn end(self) {}

    /// Keep the watch alive for as long as the watched cell lives.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").field("active", &self.release.is_some()).finish()
    }
}

/// Read-only view of an observable value.
pub struct State<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("State").field(&*self.inner.value.borrow()).finish()
    }
}

impl<T: Clone + 'static> State<T> {
    /// A state that never changes.
    pub fn constant(value: T) -> Self {
        Self { inner: Inner::new(value) }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn watch(&self, callback: impl Fn(&T) + 'static) -> WatchHandle {
        let key = self.inner.register(Watcher::Strong(Rc::new(callback)));
        self.handle_for(key)
    }

    fn handle_for(&self, key: u64) -> WatchHandle {
        let cell = Rc::downgrade(&self.inner);
        WatchHandle::new(move || {
            if let Some(cell) = cell.upgrade() {
                cell.unregister(key);
            }
        })
    }

    /// Call `callback` with the current value, then on every update.
    pub fn watch_immediate(&self, callback: impl Fn(&T) + 'static) -> WatchHandle {
        callback(&self.get());
        self.watch(callback)
    }

    /// Watch without owning the callback. The watch ends when the handle is
    /// ended or once every strong reference to `callback` is gone, whichever
    /// comes first.
    pub fn watch_weak(&self, callback: &Rc<dyn Fn(&T)>) -> WatchHandle {
        let key = self.inner.register(Watcher::Weak(Rc::downgrade(callback)));
        self.handle_for(key)
    }

    /// A read-only state holding `f(value)`, recomputed on every update of `self`.
    pub fn derived<U, F>(&self, f: F) -> State<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let target = Inner::new(self.with(&f));
        let weak = Rc::downgrade(&target);
        let handle = self.watch(move |value| {
            if let Some(target) = weak.upgrade() {
                target.replace(f(value));
            }
        });
        target.upstream.borrow_mut().push(handle);
        State { inner: target }
    }

    /// A read-only state holding both values, updated when either source updates.
    pub fn zip<U: Clone + 'static>(&self, other: &State<U>) -> State<(T, U)> {
        let target = Inner::new((self.get(), other.get()));

        let weak = Rc::downgrade(&target);
        let left = self.watch(move |value| {
            if let Some(target) = weak.upgrade() {
                let right = target.value.borrow().1.clone();
                target.replace((value.clone(), right));
            }
        });
        let weak = Rc::downgrade(&target);
        let right = other.watch(move |value| {
            if let Some(target) = weak.upgrade() {
                let left = target.value.borrow().0.clone();
                target.replace((left, value.clone()));
            }
        });
        target.upstream.borrow_mut().extend([left, right]);
        State { inner: target }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }
}

/// The single writer of an observable value.
pub struct MutableState<T> {
    state: State<T>,
}

impl<T: Clone + 'static> MutableState<T> {
    pub fn new(value: T) -> Self {
        Self { state: State::constant(value) }
    }

    /// Store `value` and notify every watcher before returning.
    pub fn set(&self, value: T) {
        self.state.inner.replace(value);
    }

    /// Modify the value in place, then notify.
    pub fn update_by(&self, f: impl FnOnce(&mut T)) {
        let value = {
            let mut value = self.state.inner.value.borrow_mut();
            f(&mut value);
            value.clone()
        };
        self.state.inner.notify(&value);
    }

    pub fn as_readonly(&self) -> State<T> {
        self.state.clone()
    }
}

impl<T> Deref for MutableState<T> {
    type Target = State<T>;

    fn deref(&self) -> &State<T> {
        &self.state
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutableState").field(&*self.state.inner.value.borrow()).finish()
    }
}

impl<T: Clone + Default + 'static> Default for MutableState<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
