//! Per-client selection bookkeeping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use kurbo::Affine;

use super::{LocalSelection, RemoteSelection, RemoteSelectionInit, SelectionFactories, SelectionInit, SelectionView};
use crate::events::{CallbackQueue, Deferred};
use crate::items::{ClientId, Item, ItemId, LocationUpdate};
use crate::protocol::{ClientInfo, ClientState, SelectionAddItems, SelectionMove, SelectionRemoveItems, TransformRecord};
use crate::table::ItemTable;
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Disconnected,
    Connected,
    Exited,
}

/// One participant. Entries are created on first observation and never removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEntry {
    pub id: ClientId,
    pub items: BTreeSet<ItemId>,
    pub info: ClientInfo,
    pub connection: ConnectionState,
}

impl ClientEntry {
    pub fn new(id: ClientId) -> Self {
        Self { id, items: BTreeSet::new(), info: ClientInfo::default(), connection: ConnectionState::Unknown }
    }
}

/// Cardinality of the local selection, as published to tools and panels.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocalSelectionState {
    #[default]
    None,
    One {
        id: ItemId,
        item: Item,
    },
    Multiple(BTreeSet<ItemId>),
}

/// Tracks which client holds which items, and the selection boxes that place them.
///
/// The engine and the [`ItemTable`] must agree on every item's selector, so
/// every operation that changes membership takes the table and updates both.
pub struct SelectionEngine {
    own: ClientEntry,
    clients: BTreeMap<ClientId, ClientEntry>,
    local: Option<LocalSelection>,
    remotes: HashMap<ClientId, RemoteSelection>,
    factories: Rc<SelectionFactories>,
    callbacks: Rc<CallbackQueue>,
}

impl SelectionEngine {
    pub fn new(
        own_id: ClientId,
        info: ClientInfo,
        factories: Rc<SelectionFactories>,
        callbacks: Rc<CallbackQueue>,
    ) -> Self {
        let own = ClientEntry { id: own_id, items: BTreeSet::new(), info, connection: ConnectionState::Connected };
        Self { own, clients: BTreeMap::new(), local: None, remotes: HashMap::new(), factories, callbacks }
    }

    pub fn own_id(&self) -> ClientId {
        self.own.id
    }

    pub fn own_entry(&self) -> &ClientEntry {
        &self.own
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientEntry> {
        if id == self.own.id { Some(&self.own) } else { self.clients.get(&id) }
    }

    /// Every other known client, in id order.
    pub fn clients(&self) -> impl Iterator<Item = &ClientEntry> {
        self.clients.values()
    }

    pub fn local_selection(&self) -> Option<&LocalSelection> {
        self.local.as_ref()
    }

    pub fn remote_selection(&self, id: ClientId) -> Option<&RemoteSelection> {
        self.remotes.get(&id)
    }

    /// The client holding `id`, according to the engine.
    pub fn selector(&self, id: ItemId) -> Option<ClientId> {
        if self.own.items.contains(&id) {
            return Some(self.own.id);
        }
        self.clients.values().find(|c| c.items.contains(&id)).map(|c| c.id)
    }

    /// Current board placement of a selected item.
    pub fn effective_transform(&self, id: ItemId) -> Option<Affine> {
        if let Some(t) = self.local.as_ref().and_then(|l| l.effective(id)) {
            return Some(t);
        }
        self.remotes.values().find_map(|r| r.effective(id))
    }

    fn entry_mut(&mut self, id: ClientId) -> &mut ClientEntry {
        self.clients.entry(id).or_insert_with(|| {
            log::debug!("First observation of {}", id);
            ClientEntry::new(id)
        })
    }

    /// The local view, built from the bound factory on the next flush.
    fn local_view(
        factories: &SelectionFactories,
        callbacks: &Rc<CallbackQueue>,
        init: Option<SelectionInit>,
    ) -> Deferred<dyn SelectionView> {
        let factory = factories.local.get();
        Deferred::build(callbacks, move || factory(init.as_ref()))
    }

    fn remote_view(&self, init: RemoteSelectionInit) -> Deferred<dyn SelectionView> {
        let factory = self.factories.remote.get();
        Deferred::build(&self.callbacks, move || factory(&init))
    }

    fn ensure_local(&mut self) -> &mut LocalSelection {
        let (factories, callbacks) = (&self.factories, &self.callbacks);
        self.local.get_or_insert_with(|| LocalSelection::new(Self::local_view(factories, callbacks, None), None))
    }

    /// Keep the records whose items exist and are free, marking them held by `holder`.
    fn claim(table: &mut ItemTable, holder: ClientId, records: &[TransformRecord]) -> Vec<TransformRecord> {
        let mut claimed = Vec::with_capacity(records.len());
        for (id, sit) in records {
            match table.get(*id).map(|e| e.selection) {
                None => log::warn!("{} selects unknown {}, skipping", holder, id),
                Some(Some(other)) if other != holder => {
                    log::warn!("{} selects {} which is held by {}, skipping", holder, id, other)
                }
                Some(_) => {
                    if let Err(e) = table.set_selection(*id, Some(holder)) {
                        log::error!("{}", e);
                        continue;
                    }
                    claimed.push((*id, *sit));
                }
            }
        }
        claimed
    }

    /// Fold this client's pre-existing selection into the local box.
    pub fn bootstrap_own(&mut self, table: &mut ItemTable, state: &ClientState) {
        self.own.info = state.info.clone();
        let items = Self::claim(table, self.own.id, &state.selected_items);
        self.own.items.extend(items.iter().map(|(id, _)| *id));

        let init = (!items.is_empty()).then(|| SelectionInit { srt: state.selection_transform, items });
        let view = Self::local_view(&self.factories, &self.callbacks, init.clone());
        self.local = Some(LocalSelection::new(view, init.as_ref()));
        if init.is_some() {
            log::info!("Restored local selection of {} items", self.own.items.len());
        }
    }

    /// Record another client's state as fetched at bootstrap.
    pub fn bootstrap_client(&mut self, table: &mut ItemTable, id: ClientId, state: &ClientState) {
        if id == self.own.id {
            return;
        }
        let items = Self::claim(table, id, &state.selected_items);
        let entry = self.entry_mut(id);
        entry.info = state.info.clone();
        entry.items.extend(items.iter().map(|(id, _)| *id));

        if !items.is_empty() {
            let init = RemoteSelectionInit { id, srt: state.selection_transform, items };
            let view = self.remote_view(init.clone());
            self.remotes.insert(id, RemoteSelection::new(view, &init));
        }
    }

    /// Select the free items among `ids` and build the announcement for the server.
    ///
    /// Items that are unknown, already held by any client, or repeated are
    /// skipped. Returns `None` when nothing was free.
    pub fn add_own_selection(&mut self, table: &mut ItemTable, ids: &[ItemId]) -> Option<SelectionAddItems> {
        let own_id = self.own.id;
        let mut free = Vec::new();
        for id in ids {
            if free.contains(id) {
                continue;
            }
            match table.get(*id).map(|e| e.selection) {
                None => log::debug!("Cannot select unknown {}", id),
                Some(Some(holder)) => log::debug!("{} is already held by {}", id, holder),
                Some(None) => free.push(*id),
            }
        }
        if free.is_empty() {
            return None;
        }

        for id in &free {
            if let Err(e) = table.set_selection(*id, Some(own_id)) {
                log::error!("{}", e);
            }
        }
        self.own.items.extend(free.iter().copied());
        let payload = self.ensure_local().create_add_payload(table, &free);
        log::debug!("Selected {} items, {} held in total", free.len(), self.own.items.len());
        Some(payload)
    }

    /// Move the whole local selection. Returns `None` when nothing is selected.
    pub fn move_own_selection(&mut self, transform: Transform) -> Option<SelectionMove> {
        let local = self.local.as_mut().filter(|l| !l.is_empty())?;
        local.move_to(transform.to_affine());
        Some(SelectionMove { new_srt: transform })
    }

    /// Release the local selection, committing every member's effective
    /// placement to the table. A no-op on an empty selection.
    pub fn cancel_selection(&mut self, table: &mut ItemTable) -> Option<SelectionRemoveItems> {
        let local = self.local.as_mut().filter(|l| !l.is_empty())?;
        let mut items = Vec::new();
        for (id, effective) in local.drain_final_transforms() {
            self.own.items.remove(&id);
            let Some(entry) = table.get(id) else {
                log::warn!("Selected {} vanished from the table", id);
                continue;
            };
            let update = entry.item.location_update(effective);
            if let Err(e) = table.apply_location(id, update.clone()) {
                log::error!("{}", e);
            }
            if let Err(e) = table.set_selection(id, None) {
                log::error!("{}", e);
            }
            items.push((id, update));
        }
        self.own.items.clear();
        Some(SelectionRemoveItems { items })
    }

    /// Another client added items to its selection.
    ///
    /// Items that are unknown or held by someone else are skipped. A client
    /// with no selection box only gets one once it has claimed something.
    pub fn remote_items_added(
        &mut self,
        table: &mut ItemTable,
        id: ClientId,
        items: &[TransformRecord],
        new_srt: Transform,
    ) {
        let claimed = Self::claim(table, id, items);
        let entry = self.entry_mut(id);
        entry.items.extend(claimed.iter().map(|(item, _)| *item));

        match self.remotes.get_mut(&id) {
            Some(remote) => remote.add_items(&claimed, new_srt),
            None if claimed.is_empty() => log::debug!("{} claimed nothing, no selection box created", id),
            None => {
                let init = RemoteSelectionInit { id, srt: new_srt, items: claimed };
                let view = self.remote_view(init.clone());
                self.remotes.insert(id, RemoteSelection::new(view, &init));
            }
        }
    }

    /// Another client released items, with their final placement.
    pub fn remote_items_removed(&mut self, table: &mut ItemTable, id: ClientId, items: &[(ItemId, LocationUpdate)]) {
        for (item, update) in items {
            match table.selector(*item) {
                Some(holder) if holder != id => {
                    log::warn!("{} released {} which is held by {}, ignoring", id, item, holder);
                    continue;
                }
                _ => {}
            }
            if let Err(e) = table.apply_location(*item, update.clone()) {
                log::error!("{}", e);
            }
            if let Err(e) = table.set_selection(*item, None) {
                log::error!("{}", e);
            }
            if let Some(remote) = self.remotes.get_mut(&id) {
                remote.remove(*item);
            }
            if let Some(entry) = self.clients.get_mut(&id) {
                entry.items.remove(item);
            }
        }
    }

    /// Another client moved its selection.
    pub fn remote_moved(&mut self, id: ClientId, transform: Transform, new_sits: Option<&[TransformRecord]>) {
        match self.remotes.get_mut(&id) {
            Some(remote) => remote.move_items(transform, new_sits),
            None => log::warn!("Dropping move for {}, which has no selection", id),
        }
    }

    pub fn client_joined(&mut self, id: ClientId, info: Option<ClientInfo>) {
        let entry = self.entry_mut(id);
        if let Some(info) = info {
            entry.info = info;
        }
        log::info!("{} joined as {:?}", id, entry.info.name);
    }

    pub fn set_connection(&mut self, id: ClientId, connection: ConnectionState) {
        let entry = self.entry_mut(id);
        log::debug!("{} is now {:?}", id, connection);
        entry.connection = connection;
    }

    /// Forget a deleted item. Returns `true` if it was in the local selection.
    pub fn item_deleted(&mut self, id: ItemId) -> bool {
        let local = self.own.items.remove(&id);
        if let Some(selection) = self.local.as_mut() {
            selection.remove(id);
        }
        for entry in self.clients.values_mut() {
            entry.items.remove(&id);
        }
        for remote in self.remotes.values_mut() {
            remote.remove(id);
        }
        local
    }

    pub fn local_state(&self, table: &ItemTable) -> LocalSelectionState {
        let mut ids = self.own.items.iter();
        match (ids.next(), ids.next()) {
            (None, _) => LocalSelectionState::None,
            (Some(id), None) => match table.get(*id) {
                Some(entry) => LocalSelectionState::One { id: *id, item: entry.item.clone() },
                None => LocalSelectionState::None,
            },
            _ => LocalSelectionState::Multiple(self.own.items.clone()),
        }
    }
}

impl fmt::Debug for SelectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionEngine")
            .field("own", &self.own)
            .field("clients", &self.clients)
            .field("local", &self.local)
            .field("remotes", &self.remotes.len())
            .finish()
    }
}
