//! The item table: the local mirror of every item on the board.
//!
//! Entries are created by [`ItemTable::add_item`] and only removed by an
//! explicit [`ItemTable::remove_item`]. Each entry records which client, if
//! any, currently holds the item under selection; the selection engine keeps
//! that field in step with its own bookkeeping.
//!
//! Mutations queue [`ItemEvent`]s instead of calling subscribers directly, so
//! the owner can dispatch them once it has released its borrow of the table.
//! Render handles are reached the same way, through the shared
//! [`CallbackQueue`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::events::{CallbackQueue, Deferred, ExclusiveSlot};
use crate::items::{ClientId, Item, ItemFactory, ItemId, LocationError, LocationUpdate, RenderHandle};

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("{0} is not in the item table")]
    MissingItem(ItemId),
    #[error("{id} is held by {holder}")]
    HeldBy { id: ItemId, holder: ClientId },
    #[error("cannot move {id}: {source}")]
    Location {
        id: ItemId,
        #[source]
        source: LocationError,
    },
}

/// A change to the item table, for render and tool collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    Insert(ItemId),
    Update(ItemId),
    Deselect(ItemId),
    Remove(ItemId),
}

/// What happened to an incoming remote edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The item is held by the local selection, whose state wins.
    Suppressed,
    Missing,
}

pub struct ItemEntry {
    pub id: ItemId,
    pub item: Item,
    pub selection: Option<ClientId>,
    handle: Deferred<dyn RenderHandle>,
}

impl fmt::Debug for ItemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemEntry")
            .field("id", &self.id)
            .field("item", &self.item)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl ItemEntry {
    fn set_item(&mut self, item: Item) {
        self.item = item;
        self.redraw();
    }

    fn redraw(&self) {
        let item = self.item.clone();
        self.handle.call(move |handle| handle.update(&item));
    }
}

pub struct ItemTable {
    own_id: ClientId,
    entries: HashMap<ItemId, ItemEntry>,
    factory: Rc<ExclusiveSlot<ItemFactory>>,
    callbacks: Rc<CallbackQueue>,
    events: Vec<ItemEvent>,
}

impl ItemTable {
    pub fn new(own_id: ClientId, factory: Rc<ExclusiveSlot<ItemFactory>>, callbacks: Rc<CallbackQueue>) -> Self {
        Self { own_id, entries: HashMap::new(), factory, callbacks, events: Vec::new() }
    }

    pub fn own_id(&self) -> ClientId {
        self.own_id
    }

    /// Insert a new item. Its render handle is built on the next flush of
    /// the callback queue.
    ///
    /// # Panics
    ///
    /// If `id` is already present (ids are server-assigned and never reused),
    /// or if the item factory has not been bound.
    pub fn add_item(&mut self, id: ItemId, item: Item) {
        assert!(!self.entries.contains_key(&id), "duplicate insert of {id}");
        let factory = self.factory.get();
        let initial = item.clone();
        let handle = Deferred::build(&self.callbacks, move || factory(id, &initial));
        log::trace!("Inserted {} ({})", id, item.item_type());
        self.events.push(ItemEvent::Insert(id));
        self.entries.insert(id, ItemEntry { id, item, selection: None, handle });
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemEntry> {
        self.entries.get(&id)
    }

    /// One result per input id, in input order, `None` for unknown ids.
    pub fn get_many<'a, I>(&'a self, ids: I) -> impl Iterator<Item = Option<&'a ItemEntry>> + 'a
    where
        I: IntoIterator<Item = ItemId>,
        I::IntoIter: 'a,
    {
        ids.into_iter().map(move |id| self.entries.get(&id))
    }

    pub fn entries(&self) -> impl Iterator<Item = &ItemEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selector(&self, id: ItemId) -> Option<ClientId> {
        self.entries.get(&id).and_then(|e| e.selection)
    }

    /// Apply an authoritative value from the server, unless the item is
    /// currently held by the local selection.
    pub fn apply_remote_edit(&mut self, id: ItemId, item: Item) -> EditOutcome {
        let own_id = self.own_id;
        let Some(entry) = self.entries.get_mut(&id) else {
            return EditOutcome::Missing;
        };
        if entry.selection == Some(own_id) {
            log::debug!("Suppressed remote edit of locally selected {}", id);
            return EditOutcome::Suppressed;
        }
        entry.set_item(item);
        self.events.push(ItemEvent::Update(id));
        EditOutcome::Applied
    }

    /// Replace the value of an item edited locally.
    ///
    /// Items held by another client are refused; their holder's release
    /// decides where they end up.
    pub fn apply_local_edit(&mut self, id: ItemId, item: Item) -> Result<(), TableError> {
        let own_id = self.own_id;
        let entry = self.entries.get_mut(&id).ok_or(TableError::MissingItem(id))?;
        if let Some(holder) = entry.selection.filter(|holder| *holder != own_id) {
            return Err(TableError::HeldBy { id, holder });
        }
        entry.set_item(item);
        self.events.push(ItemEvent::Update(id));
        Ok(())
    }

    /// Move an item to its final placement, regardless of who selects it.
    pub fn apply_location(&mut self, id: ItemId, update: LocationUpdate) -> Result<(), TableError> {
        let entry = self.entries.get_mut(&id).ok_or(TableError::MissingItem(id))?;
        entry
            .item
            .apply_location_update(update)
            .map_err(|source| TableError::Location { id, source })?;
        entry.redraw();
        self.events.push(ItemEvent::Update(id));
        Ok(())
    }

    /// Record `selector` as the holder of `id`, returning the previous holder.
    ///
    /// Releasing an item (`None`) queues a [`ItemEvent::Deselect`].
    pub fn set_selection(&mut self, id: ItemId, selector: Option<ClientId>) -> Result<Option<ClientId>, TableError> {
        let entry = self.entries.get_mut(&id).ok_or(TableError::MissingItem(id))?;
        let previous = std::mem::replace(&mut entry.selection, selector);
        if previous != selector {
            entry.handle.call(move |handle| handle.selection_changed(selector));
            if selector.is_none() {
                self.events.push(ItemEvent::Deselect(id));
            }
        }
        Ok(previous)
    }

    /// Delete an item. This is the only way an entry leaves the table.
    pub fn remove_item(&mut self, id: ItemId) -> Option<ItemEntry> {
        let entry = self.entries.remove(&id)?;
        entry.handle.call(|handle| handle.removed());
        self.events.push(ItemEvent::Remove(id));
        Some(entry)
    }

    pub fn take_events(&mut self) -> Vec<ItemEvent> {
        std::mem::take(&mut self.events)
    }
}

impl fmt::Debug for ItemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemTable")
            .field("own_id", &self.own_id)
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}
