//! Board coordinator.
//!
//! Owns the item table and the selection engine, binds every notification
//! once, bootstraps from the server and routes live traffic. Render
//! collaborators plug in through [`Capabilities`] before [`Board::bootstrap`]
//! runs. They are only ever called once the board has released its state,
//! so they may read the board from inside their callbacks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::join_all;
use futures::StreamExt;
use thiserror::Error;

use crate::client::{ClientError, Method, MethodCall, Notify, RawClient, ServerError, ServerResult};
use crate::events::{CallbackQueue, EventHub, ExclusiveSlot};
use crate::items::{ClientId, Item, ItemFactory, ItemId, ItemRegistry, RenderHandle};
use crate::protocol::{
    Ack, ClientConnected, ClientDisconnected, ClientExited, ClientInfo, ClientJoined, CreateItem, DeleteItems,
    EditSingleItem, GetAllClientIDs, GetAllItemIDs, GetClientState, GetFullItems, ItemCreated, ItemsDeleted,
    SelectionItemsAdded, SelectionItemsRemoved, SelectionMoved, SingleItemEdited,
};
use crate::selection::{
    ConnectionState, LocalSelectionState, RemoteSelectionInit, SelectionEngine, SelectionFactories, SelectionInit,
    SelectionView,
};
use crate::state::{MutableState, State};
use crate::table::{EditOutcome, ItemEvent, ItemTable, TableError};
use crate::transform::Transform;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: ClientError,
    },
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("board is already bootstrapped")]
    AlreadyBootstrapped,
}

/// What bootstrap found on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Items added to the table from the bulk fetch.
    pub inserted: usize,
    /// Ids the server could not produce.
    pub failed: Vec<ItemId>,
    /// Bulk fetch entries that could not be decoded at all.
    pub undecodable: usize,
    /// Other clients whose state was fetched.
    pub clients: usize,
}

/// Render-side constructors. Each slot is bound exactly once, before bootstrap.
pub struct Capabilities {
    items: Rc<ExclusiveSlot<ItemFactory>>,
    selections: Rc<SelectionFactories>,
}

impl Capabilities {
    fn new() -> Self {
        Self { items: Rc::new(ExclusiveSlot::new("item factory")), selections: Rc::new(SelectionFactories::new()) }
    }

    pub fn bind_item_factory<F>(&self, factory: F)
    where
        F: Fn(ItemId, &Item) -> Box<dyn RenderHandle> + 'static,
    {
        self.items.bind(Rc::new(factory));
    }

    /// Bind the item factory from a per-variant registry.
    pub fn bind_registry(&self, registry: ItemRegistry) {
        self.items.bind(registry.into_factory());
    }

    pub fn bind_local_selection_factory<F>(&self, factory: F)
    where
        F: Fn(Option<&SelectionInit>) -> Box<dyn SelectionView> + 'static,
    {
        self.selections.local.bind(Rc::new(factory));
    }

    pub fn bind_remote_selection_factory<F>(&self, factory: F)
    where
        F: Fn(&RemoteSelectionInit) -> Box<dyn SelectionView> + 'static,
    {
        self.selections.remote.bind(Rc::new(factory));
    }

    pub fn is_complete(&self) -> bool {
        self.items.is_bound() && self.selections.local.is_bound() && self.selections.remote.is_bound()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("items", &self.items)
            .field("selections", &self.selections)
            .finish()
    }
}

struct BoardState {
    table: ItemTable,
    selection: SelectionEngine,
}

struct Shared {
    client: RawClient,
    capabilities: Capabilities,
    state: RefCell<BoardState>,
    callbacks: Rc<CallbackQueue>,
    item_events: EventHub<ItemEvent>,
    selection_state: MutableState<LocalSelectionState>,
    bootstrapped: Cell<bool>,
}

/// Handle to one board session. Clones share the session.
#[derive(Clone)]
pub struct Board {
    shared: Rc<Shared>,
}

impl Board {
    pub fn new(client: RawClient, own_id: ClientId, info: ClientInfo) -> Self {
        let capabilities = Capabilities::new();
        let callbacks = Rc::new(CallbackQueue::new());
        let table = ItemTable::new(own_id, capabilities.items.clone(), callbacks.clone());
        let selection = SelectionEngine::new(own_id, info, capabilities.selections.clone(), callbacks.clone());
        Self {
            shared: Rc::new(Shared {
                client,
                capabilities,
                state: RefCell::new(BoardState { table, selection }),
                callbacks,
                item_events: EventHub::new(),
                selection_state: MutableState::new(LocalSelectionState::None),
                bootstrapped: Cell::new(false),
            }),
        }
    }

    pub fn client(&self) -> &RawClient {
        &self.shared.client
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.shared.capabilities
    }

    pub fn own_id(&self) -> ClientId {
        self.shared.state.borrow().table.own_id()
    }

    /// Insert, update, deselect and remove events for every item.
    pub fn item_events(&self) -> &EventHub<ItemEvent> {
        &self.shared.item_events
    }

    pub fn selection_state(&self) -> State<LocalSelectionState> {
        self.shared.selection_state.as_readonly()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.shared.bootstrapped.get()
    }

    pub fn with_table<R>(&self, f: impl FnOnce(&ItemTable) -> R) -> R {
        f(&self.shared.state.borrow().table)
    }

    pub fn with_selection<R>(&self, f: impl FnOnce(&SelectionEngine) -> R) -> R {
        f(&self.shared.state.borrow().selection)
    }

    pub fn item(&self, id: ItemId) -> Option<Item> {
        self.with_table(|t| t.get(id).map(|e| e.item.clone()))
    }

    /// Run a mutation, then publish what it changed once the state is released.
    ///
    /// Render handles and selection views run first, then item event
    /// subscribers, then the local selection state.
    fn mutate<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> R {
        let (result, events, local) = {
            let mut state = self.shared.state.borrow_mut();
            let result = f(&mut state);
            let events = state.table.take_events();
            let local = state.selection.local_state(&state.table);
            (result, events, local)
        };
        self.shared.callbacks.flush();
        for event in &events {
            self.shared.item_events.emit(event);
        }
        if self.shared.selection_state.with(|current| *current != local) {
            self.shared.selection_state.set(local);
        }
        result
    }

    async fn call<M: Method>(&self, args: &M) -> Result<M::Response, BoardError> {
        self.shared.client.call_method(args).await.map_err(|source| BoardError::Call { call: M::NAME, source })
    }

    fn bind<N, F>(&self, handler: F)
    where
        N: Notify + 'static,
        F: Fn(&Board, N) + 'static,
    {
        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        self.shared.client.bind_notify(move |notification: N| {
            if let Some(shared) = weak.upgrade() {
                handler(&Board { shared }, notification);
            }
        });
    }

    /// Load the board and start following it.
    ///
    /// Items are fetched first, then clients. The local selection is restored
    /// from the server before selection notifications are bound, so a
    /// selection described by both is applied once.
    ///
    /// # Panics
    ///
    /// If a capability is used before it is bound.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, BoardError> {
        if self.shared.bootstrapped.replace(true) {
            return Err(BoardError::AlreadyBootstrapped);
        }
        let own_id = self.own_id();
        let mut report = BootstrapReport::default();

        let ids = self.call(&GetAllItemIDs {}).await?;
        log::info!("Board has {} items", ids.len());
        self.bind_item_events();

        let mut items = self
            .shared
            .client
            .call_iterate(&GetFullItems { ids })
            .map_err(|source| BoardError::Call { call: "GetFullItems", source })?
            .dechunk();
        while let Some(entry) = items.next().await {
            match entry {
                Ok((id, ServerResult::Ok(item))) => {
                    let inserted = self.mutate(|s| {
                        if s.table.contains(id) {
                            return false;
                        }
                        s.table.add_item(id, item);
                        true
                    });
                    if inserted {
                        report.inserted += 1;
                    } else {
                        log::debug!("{} already arrived by notification", id);
                    }
                }
                Ok((id, ServerResult::Err(e))) => {
                    log::error!("Could not fetch {}: {}", id, e);
                    report.failed.push(id);
                }
                Err(e) => {
                    log::error!("Skipping bulk fetch entry: {}", e);
                    report.undecodable += 1;
                }
            }
        }

        let clients = self.call(&GetAllClientIDs {}).await?;
        self.bind_client_events();

        let own = self.call(&GetClientState { client_id: own_id }).await?;
        self.mutate(|s| s.selection.bootstrap_own(&mut s.table, &own));

        let others: Vec<ClientId> = clients.into_iter().filter(|id| *id != own_id).collect();
        let states = join_all(
            others.iter().map(|id| self.shared.client.call_method(&GetClientState { client_id: *id })),
        )
        .await;
        for (id, state) in others.iter().zip(states) {
            match state {
                Ok(state) => {
                    self.mutate(|s| s.selection.bootstrap_client(&mut s.table, *id, &state));
                    report.clients += 1;
                }
                Err(e) => log::error!("Could not fetch state of {}: {}", id, e),
            }
        }

        self.bind_selection_events();
        log::info!(
            "Bootstrapped: {} items, {} failed, {} other clients",
            report.inserted,
            report.failed.len(),
            report.clients
        );
        Ok(report)
    }

    fn bind_item_events(&self) {
        self.bind(|board, ItemCreated { id, client, item }| {
            board.mutate(|s| {
                if s.table.contains(id) {
                    log::debug!("Ignoring creation of known {}", id);
                    return;
                }
                log::debug!("{} created by {:?}", id, client);
                s.table.add_item(id, item);
            });
        });

        self.bind(|board, SingleItemEdited { id, item }| {
            if board.mutate(|s| s.table.apply_remote_edit(id, item)) == EditOutcome::Missing {
                log::warn!("Edit for unknown {}", id);
            }
        });

        self.bind(|board, ItemsDeleted { ids }| {
            board.mutate(|s| {
                for id in ids {
                    s.selection.item_deleted(id);
                    if s.table.remove_item(id).is_none() {
                        log::warn!("Delete for unknown {}", id);
                    }
                }
            });
        });
    }

    fn bind_client_events(&self) {
        self.bind(|board, ClientJoined { id, info }| {
            if id != board.own_id() {
                board.mutate(|s| s.selection.client_joined(id, info));
            }
        });
        self.bind(|board, ClientConnected { id }| board.set_connection(id, ConnectionState::Connected));
        self.bind(|board, ClientDisconnected { id }| board.set_connection(id, ConnectionState::Disconnected));
        self.bind(|board, ClientExited { id }| board.set_connection(id, ConnectionState::Exited));
    }

    fn set_connection(&self, id: ClientId, connection: ConnectionState) {
        if id != self.own_id() {
            self.mutate(|s| s.selection.set_connection(id, connection));
        }
    }

    fn bind_selection_events(&self) {
        self.bind(|board, SelectionItemsAdded { id, items, new_srt }| {
            if id != board.own_id() {
                board.mutate(|s| s.selection.remote_items_added(&mut s.table, id, &items, new_srt));
            }
        });

        self.bind(|board, SelectionItemsRemoved { id, items }| {
            if id != board.own_id() {
                board.mutate(|s| s.selection.remote_items_removed(&mut s.table, id, &items));
            }
        });

        self.bind(|board, SelectionMoved { id, transform, new_sits }| {
            if id != board.own_id() {
                board.mutate(|s| s.selection.remote_moved(id, transform, new_sits.as_deref()));
            }
        });
    }

    /// Select the free items among `ids`. Returns `None` if none were free.
    pub fn add_own_selection(&self, ids: &[ItemId]) -> Option<MethodCall<Ack>> {
        let payload = self.mutate(|s| s.selection.add_own_selection(&mut s.table, ids))?;
        Some(self.shared.client.call_method(&payload))
    }

    /// Place the local selection at `transform`. Returns `None` if nothing is selected.
    pub fn move_own_selection(&self, transform: Transform) -> Option<MethodCall<Ack>> {
        let payload = self.mutate(|s| s.selection.move_own_selection(transform))?;
        Some(self.shared.client.call_method(&payload))
    }

    /// Release the local selection. Returns `None` if nothing was selected.
    pub fn cancel_selection(&self) -> Option<MethodCall<Ack>> {
        let payload = self.mutate(|s| s.selection.cancel_selection(&mut s.table))?;
        Some(self.shared.client.call_method(&payload))
    }

    /// Create an item. Resolves with the id the server assigned; the item
    /// itself arrives through the creation notification.
    pub fn create_item(&self, item: Item) -> impl Future<Output = Result<ItemId, BoardError>> + use<> {
        let call = self.shared.client.call_method(&CreateItem { item });
        async move {
            let result = call.await.map_err(|source| BoardError::Call { call: CreateItem::NAME, source })?;
            Ok(result.into_result()?)
        }
    }

    /// Apply a local edit and send it. Refused for items another client holds.
    pub fn edit_item(&self, id: ItemId, item: Item) -> Result<MethodCall<Ack>, BoardError> {
        self.mutate(|s| s.table.apply_local_edit(id, item.clone()))?;
        Ok(self.shared.client.call_method(&EditSingleItem { item_id: id, item }))
    }

    /// Ask the server to delete items. Entries leave the table when the
    /// deletion notification arrives.
    pub fn delete_items(&self, ids: Vec<ItemId>) -> MethodCall<Ack> {
        self.shared.client.call_method(&DeleteItems { ids })
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Board")
            .field("table", &state.table)
            .field("selection", &state.selection)
            .field("bootstrapped", &self.shared.bootstrapped.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::NullRenderHandle;
    use crate::protocol::ClientState;
    use crate::selection::NullSelectionView;
    use crate::table::tests::rect;
    use kurbo::{Affine, Point};
    use serde_json::{json, Value};
    use std::pin::pin;
    use std::task::{Context, Poll};

    const EPS: f64 = 1e-9;

    fn close(a: Affine, b: Affine) -> bool {
        Transform::from_affine(a).approx_eq(&Transform::from_affine(b), EPS)
    }

    /// Answers outbound frames from canned board contents.
    #[derive(Default)]
    struct Fixture {
        items: Vec<(u32, Item)>,
        broken: Vec<u32>,
        clients: Vec<(u32, Option<ClientState>)>,
        part_order: Option<Vec<usize>>,
    }

    impl Fixture {
        fn with_items(n: u32) -> Self {
            Self {
                items: (1..=n).map(|i| (i, rect(i as f64 * 10.0, 0.0))).collect(),
                ..Default::default()
            }
        }

        fn answer(&self, frame: &Value) -> Vec<Value> {
            let id = frame["id"].clone();
            let respond = |value: Value| vec![json!({"protocol": "Response", "id": id, "value": value})];
            match frame["name"].as_str().unwrap() {
                "GetAllItemIDs" => {
                    let ids: Vec<u32> = self.items.iter().map(|(i, _)| *i).chain(self.broken.iter().copied()).collect();
                    respond(json!(ids))
                }
                "GetFullItems" => {
                    let entries: Vec<Value> = frame["ids"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|v| {
                            let n = v.as_u64().unwrap() as u32;
                            match self.items.iter().find(|(i, _)| *i == n) {
                                Some((_, item)) => json!([n, {"status": "Ok", "value": item}]),
                                None => json!([n, {"status": "Err", "value": {"code": "NotFound", "msg": "gone"}}]),
                            }
                        })
                        .collect();
                    if entries.is_empty() {
                        return vec![json!({
                            "protocol": "Response-Part",
                            "id": id,
                            "part": 0,
                            "complete": true,
                            "items": [],
                        })];
                    }
                    let last = entries.len() - 1;
                    let parts: Vec<Value> = entries
                        .into_iter()
                        .enumerate()
                        .map(|(part, entry)| {
                            json!({
                                "protocol": "Response-Part",
                                "id": id,
                                "part": part,
                                "complete": part == last,
                                "items": [entry],
                            })
                        })
                        .collect();
                    match &self.part_order {
                        Some(order) => order.iter().map(|i| parts[*i].clone()).collect(),
                        None => parts,
                    }
                }
                "GetAllClientIDs" => respond(json!(self.clients.iter().map(|(c, _)| *c).collect::<Vec<_>>())),
                "GetClientState" => {
                    let client = frame["clientId"].as_u64().unwrap() as u32;
                    let state = self
                        .clients
                        .iter()
                        .find(|(c, _)| *c == client)
                        .and_then(|(_, s)| s.clone())
                        .unwrap_or_else(|| ClientState {
                            info: ClientInfo::new(format!("client {client}")),
                            selected_items: vec![],
                            selection_transform: Transform::IDENTITY,
                        });
                    respond(serde_json::to_value(state).unwrap())
                }
                _ => respond(Value::Null),
            }
        }
    }

    fn board(own: u32) -> Board {
        let board = Board::new(RawClient::new(), ClientId(own), ClientInfo::new(format!("client {own}")));
        let caps = board.capabilities();
        caps.bind_item_factory(|_: ItemId, _: &Item| -> Box<dyn RenderHandle> { Box::new(NullRenderHandle) });
        caps.bind_local_selection_factory(|_: Option<&SelectionInit>| -> Box<dyn SelectionView> {
            Box::new(NullSelectionView)
        });
        caps.bind_remote_selection_factory(|_: &RemoteSelectionInit| -> Box<dyn SelectionView> {
            Box::new(NullSelectionView)
        });
        board
    }

    /// Poll `fut` to completion, answering every frame the board sends.
    fn drive<T>(board: &Board, fixture: &Fixture, fut: impl Future<Output = T>) -> T {
        let mut fut = pin!(fut);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        for _ in 0..64 {
            if let Poll::Ready(value) = fut.as_mut().poll(&mut cx) {
                return value;
            }
            for frame in board.client().take_outgoing() {
                let frame: Value = serde_json::from_str(&frame).unwrap();
                for reply in fixture.answer(&frame) {
                    board.client().handle_message(&reply.to_string()).unwrap();
                }
            }
        }
        panic!("board did not settle");
    }

    fn bootstrapped(own: u32, fixture: &Fixture) -> Board {
        let board = board(own);
        drive(&board, fixture, board.bootstrap()).unwrap();
        board
    }

    fn notify(board: &Board, name: &str, mut fields: Value) {
        fields["protocol"] = json!("Notify-C");
        fields["name"] = json!(name);
        board.client().handle_message(&fields.to_string()).unwrap();
    }

    /// The outbound method frames, decoded, with responses ignored.
    fn sent(board: &Board) -> Vec<Value> {
        board.client().take_outgoing().iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }

    fn board_transform(board: &Board, id: u32) -> Affine {
        board.item(ItemId(id)).unwrap().board_transform().to_affine()
    }

    fn tjson(t: Affine) -> Value {
        serde_json::to_value(Transform::from_affine(t)).unwrap()
    }

    #[test]
    fn test_bootstrap_flushes_parts_in_order() {
        let fixture = Fixture { part_order: Some(vec![0, 2, 1, 3]), ..Fixture::with_items(4) };
        let board = board(1);
        let inserted = Rc::new(RefCell::new(Vec::new()));
        let sink = inserted.clone();
        let _sub = board.item_events().subscribe(move |e| {
            if let ItemEvent::Insert(id) = e {
                sink.borrow_mut().push(id.0);
            }
        });

        let report = drive(&board, &fixture, board.bootstrap()).unwrap();
        assert_eq!(report.inserted, 4);
        assert_eq!(*inserted.borrow(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_bootstrap_isolates_failed_items() {
        let fixture = Fixture { broken: vec![7], ..Fixture::with_items(3) };
        let board = board(1);
        let report = drive(&board, &fixture, board.bootstrap()).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.failed, vec![ItemId(7)]);
        assert_eq!(report.undecodable, 0);
        assert_eq!(board.with_table(|t| t.len()), 3);
    }

    #[test]
    fn test_bootstrap_twice_is_rejected() {
        let fixture = Fixture::with_items(1);
        let board = bootstrapped(1, &fixture);
        assert!(matches!(drive(&board, &fixture, board.bootstrap()), Err(BoardError::AlreadyBootstrapped)));
    }

    #[test]
    fn test_bootstrap_restores_selections_then_binds() {
        let srt = Transform::translate(Point::new(10.0, 0.0));
        let fixture = Fixture {
            clients: vec![
                (
                    1,
                    Some(ClientState {
                        info: ClientInfo::new("me"),
                        selected_items: vec![(ItemId(1), Transform::IDENTITY)],
                        selection_transform: srt,
                    }),
                ),
                (
                    2,
                    Some(ClientState {
                        info: ClientInfo::new("other"),
                        selected_items: vec![(ItemId(2), Transform::IDENTITY)],
                        selection_transform: Transform::translate(Point::new(20.0, 0.0)),
                    }),
                ),
            ],
            ..Fixture::with_items(3)
        };
        let board = board(1);
        assert!(!board.client().is_bound::<SelectionMoved>());
        let report = drive(&board, &fixture, board.bootstrap()).unwrap();
        assert_eq!(report.clients, 1);
        assert!(board.client().is_bound::<SelectionMoved>());

        assert_eq!(board.with_table(|t| t.selector(ItemId(1))), Some(ClientId(1)));
        assert_eq!(board.with_table(|t| t.selector(ItemId(2))), Some(ClientId(2)));
        assert!(matches!(board.selection_state().get(), LocalSelectionState::One { id: ItemId(1), .. }));
        assert_eq!(board.with_selection(|s| s.client(ClientId(2)).unwrap().info.name.clone()), "other");
    }

    #[test]
    fn test_local_edit_wins_while_selected() {
        let board = bootstrapped(1, &Fixture::with_items(2));
        board.add_own_selection(&[ItemId(1)]).unwrap();

        let edited = serde_json::to_value(rect(50.0, 50.0)).unwrap();
        notify(&board, "SingleItemEdited", json!({"id": 1, "item": edited}));
        assert_eq!(board.item(ItemId(1)).unwrap(), rect(10.0, 0.0));

        board.cancel_selection().unwrap();
        notify(&board, "SingleItemEdited", json!({"id": 1, "item": edited}));
        assert_eq!(board.item(ItemId(1)).unwrap(), rect(50.0, 50.0));
    }

    #[test]
    fn test_selection_exclusivity() {
        let fixture = Fixture { clients: vec![(1, None), (2, None)], ..Fixture::with_items(3) };
        let board = bootstrapped(1, &fixture);

        let srt = tjson(Affine::translate((10.0, 0.0)));
        notify(&board, "SelectionItemsAdded", json!({"id": 2, "items": [[1, tjson(Affine::IDENTITY)]], "newSrt": srt}));

        let call = board.add_own_selection(&[ItemId(1), ItemId(2)]).unwrap();
        assert_eq!(call.name(), "SelectionAddItems");
        let frames = sent(&board);
        assert_eq!(frames[0]["items"].as_array().unwrap().len(), 1);
        assert_eq!(frames[0]["items"][0][0], 2);

        // a second client cannot take what is held
        let identity = tjson(Affine::IDENTITY);
        let items = json!([[1, identity], [2, identity]]);
        notify(&board, "SelectionItemsAdded", json!({"id": 3, "items": items, "newSrt": identity}));
        let mut seen: Vec<(u32, Option<u32>)> =
            board.with_table(|t| t.entries().map(|e| (e.id.0, e.selection.map(|c| c.0))).collect());
        seen.sort();
        assert_eq!(seen, vec![(1, Some(2)), (2, Some(1)), (3, None)]);
        assert!(board.with_selection(|s| s.remote_selection(ClientId(3)).is_none()));
    }

    #[test]
    fn test_end_to_end_remote_selection() {
        let fixture = Fixture { clients: vec![(1, None), (2, None)], ..Fixture::with_items(3) };
        let a = bootstrapped(1, &fixture);
        let b = bootstrapped(2, &fixture);

        // A selects {1, 2}; the server relays the new sub-item transforms to B
        a.add_own_selection(&[ItemId(1), ItemId(2)]).unwrap();
        let add = sent(&a).remove(0);
        let records: Vec<Value> =
            add["items"].as_array().unwrap().iter().map(|r| json!([r[0].clone(), r[2].clone()])).collect();
        notify(&b, "SelectionItemsAdded", json!({"id": 1, "items": records, "newSrt": add["newSrt"]}));

        for id in [1, 2] {
            let effective = b.with_selection(|s| s.effective_transform(ItemId(id))).unwrap();
            assert!(close(effective, board_transform(&b, id)));
        }
        assert_eq!(b.with_table(|t| t.selector(ItemId(1))), Some(ClientId(1)));

        // A moves; B recomputes from the new SRT alone
        let s1 = Affine::rotate(0.25).then_translate((30.0, 40.0).into());
        a.move_own_selection(Transform::from_affine(s1)).unwrap();
        let moved = sent(&a).remove(0);
        notify(&b, "SelectionMoved", json!({"id": 1, "transform": moved["newSrt"]}));

        let t1: Transform = serde_json::from_value(records[0][1].clone()).unwrap();
        let effective = b.with_selection(|s| s.effective_transform(ItemId(1))).unwrap();
        assert!(close(effective, s1 * t1.to_affine()));
        assert!(close(effective, a.with_selection(|s| s.effective_transform(ItemId(1))).unwrap()));

        // A releases; B commits the final placement A sent
        a.cancel_selection().unwrap();
        let removed = sent(&a).remove(0);
        notify(&b, "SelectionItemsRemoved", json!({"id": 1, "items": removed["items"]}));
        for id in [1, 2] {
            assert!(close(board_transform(&b, id), board_transform(&a, id)));
            assert_eq!(b.with_table(|t| t.selector(ItemId(id))), None);
        }
    }

    #[test]
    fn test_srt_sit_invariant_over_mixed_operations() {
        let fixture = Fixture { clients: vec![(1, None), (2, None)], ..Fixture::with_items(5) };
        let board = bootstrapped(1, &fixture);
        let mut expected: Vec<(u32, Affine)> = Vec::new();

        // remote client 2 holds item 4 at a rotated SRT
        let s0 = Affine::rotate(0.5).then_translate((40.0, 0.0).into());
        let t4 = s0.inverse() * board_transform(&board, 4);
        notify(&board, "SelectionItemsAdded", json!({"id": 2, "items": [[4, tjson(t4)]], "newSrt": tjson(s0)}));
        expected.push((4, board_transform(&board, 4)));

        // local selection grows in two steps
        for id in [1, 2] {
            expected.push((id, board_transform(&board, id)));
        }
        board.add_own_selection(&[ItemId(1), ItemId(2)]).unwrap();
        expected.push((3, board_transform(&board, 3)));
        board.add_own_selection(&[ItemId(3)]).unwrap();

        let check = |expected: &[(u32, Affine)]| {
            for (id, placement) in expected {
                let effective = board.with_selection(|s| s.effective_transform(ItemId(*id))).unwrap();
                assert!(close(effective, *placement), "item {id}");
            }
        };
        check(&expected);

        // local move: every local member follows the SRT
        let srt = board.with_selection(|s| s.local_selection().unwrap().srt());
        let m = Affine::scale(2.0).then_translate((1.0, 1.0).into()) * srt;
        board.move_own_selection(Transform::from_affine(m)).unwrap();
        for (id, placement) in expected.iter_mut().filter(|(id, _)| *id != 4) {
            let sit = board.with_selection(|s| s.local_selection().unwrap().sit(ItemId(*id))).unwrap();
            *placement = m * sit;
        }
        check(&expected);

        // remote add under a new SRT keeps item 4 in place
        let s1 = Affine::translate((45.0, 5.0));
        let t5 = s1.inverse() * board_transform(&board, 5);
        notify(&board, "SelectionItemsAdded", json!({"id": 2, "items": [[5, tjson(t5)]], "newSrt": tjson(s1)}));
        expected.push((5, board_transform(&board, 5)));
        check(&expected);

        // remote move with renormalized sub-item transforms
        let s2 = Affine::translate((0.0, 100.0));
        let sit4 = Affine::translate((1.0, 2.0));
        notify(&board, "SelectionMoved", json!({"id": 2, "transform": tjson(s2), "newSits": [[4, tjson(sit4)]]}));
        let sit5 = board.with_selection(|s| s.remote_selection(ClientId(2)).unwrap().sit(ItemId(5))).unwrap();
        for (id, placement) in expected.iter_mut() {
            match *id {
                4 => *placement = s2 * sit4,
                5 => *placement = s2 * sit5,
                _ => {}
            }
        }
        check(&expected);
    }

    #[test]
    fn test_deletion_clears_table_and_selection() {
        let board = bootstrapped(1, &Fixture::with_items(2));
        board.add_own_selection(&[ItemId(1), ItemId(2)]).unwrap();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let sink = removed.clone();
        let _sub = board.item_events().subscribe(move |e| {
            if let ItemEvent::Remove(id) = e {
                sink.borrow_mut().push(*id);
            }
        });

        let call = board.delete_items(vec![ItemId(1)]);
        assert_eq!(call.name(), "DeleteItems");
        notify(&board, "ItemsDeleted", json!({"ids": [1, 9]}));

        assert_eq!(*removed.borrow(), vec![ItemId(1)]);
        assert!(board.item(ItemId(1)).is_none());
        assert!(matches!(board.selection_state().get(), LocalSelectionState::One { id: ItemId(2), .. }));
    }

    #[test]
    fn test_notifications_about_self_are_ignored() {
        let board = bootstrapped(1, &Fixture::with_items(1));
        let identity = tjson(Affine::IDENTITY);
        notify(&board, "SelectionItemsAdded", json!({"id": 1, "items": [[1, identity]], "newSrt": identity}));
        notify(&board, "ClientJoined", json!({"id": 1, "info": {"name": "ghost"}}));
        assert_eq!(board.with_table(|t| t.selector(ItemId(1))), None);
        assert_eq!(board.with_selection(|s| s.clients().count()), 0);
    }

    #[test]
    fn test_live_item_notifications() {
        let board = bootstrapped(1, &Fixture::with_items(1));
        notify(&board, "ItemCreated", json!({"id": 5, "item": serde_json::to_value(rect(1.0, 1.0)).unwrap()}));
        notify(&board, "ItemCreated", json!({"id": 5, "item": serde_json::to_value(rect(9.0, 9.0)).unwrap()}));
        assert_eq!(board.item(ItemId(5)).unwrap(), rect(1.0, 1.0));

        notify(&board, "ClientConnected", json!({"id": 3}));
        notify(&board, "ClientExited", json!({"id": 3}));
        assert_eq!(
            board.with_selection(|s| s.client(ClientId(3)).unwrap().connection),
            ConnectionState::Exited
        );
    }

    #[test]
    fn test_create_and_edit_items() {
        let fixture = Fixture::with_items(1);
        let board = bootstrapped(1, &fixture);

        let created = board.create_item(rect(3.0, 3.0));
        let frames = sent(&board);
        assert_eq!(frames[0]["name"], "CreateItem");
        let id = frames[0]["id"].clone();
        board
            .client()
            .handle_message(
                &json!({"protocol": "Response", "id": id, "value": {"status": "Ok", "value": 12}}).to_string(),
            )
            .unwrap();
        assert_eq!(futures::executor::block_on(created).unwrap(), ItemId(12));

        board.edit_item(ItemId(1), rect(2.0, 2.0)).unwrap();
        assert_eq!(board.item(ItemId(1)).unwrap(), rect(2.0, 2.0));
        assert_eq!(sent(&board)[0]["itemId"], 1);
        assert!(matches!(
            board.edit_item(ItemId(8), rect(0.0, 0.0)),
            Err(BoardError::Table(TableError::MissingItem(ItemId(8))))
        ));
    }

    #[test]
    fn test_create_item_server_error() {
        let board = bootstrapped(1, &Fixture::default());
        let created = board.create_item(rect(0.0, 0.0));
        let id = sent(&board)[0]["id"].clone();
        let error = json!({"status": "Err", "value": {"code": "BadData", "msg": null}});
        let reply = json!({"protocol": "Response", "id": id, "value": error});
        board.client().handle_message(&reply.to_string()).unwrap();
        assert!(matches!(futures::executor::block_on(created), Err(BoardError::Server(_))));
    }

    #[test]
    #[should_panic(expected = "used before it was bound")]
    fn test_insert_before_factory_bound_panics() {
        let board = Board::new(RawClient::new(), ClientId(1), ClientInfo::default());
        drive(&board, &Fixture::with_items(1), board.bootstrap()).ok();
    }

    #[test]
    fn test_collaborators_may_read_board_from_callbacks() {
        struct BorderView {
            board: Weak<Shared>,
            log: Rc<RefCell<Vec<String>>>,
        }
        impl SelectionView for BorderView {
            fn srt_changed(&mut self, _srt: Affine) {
                let board = Board { shared: self.board.upgrade().unwrap() };
                let bounds = board
                    .with_table(|t| board.with_selection(|s| s.local_selection().and_then(|l| l.board_bounds(t))))
                    .unwrap();
                self.log.borrow_mut().push(format!("border {} {}", bounds.center().x, bounds.center().y));
            }
        }

        struct Highlight {
            id: ItemId,
            board: Weak<Shared>,
            log: Rc<RefCell<Vec<String>>>,
        }
        impl RenderHandle for Highlight {
            fn update(&mut self, _item: &Item) {}
            fn selection_changed(&mut self, selector: Option<ClientId>) {
                let board = Board { shared: self.board.upgrade().unwrap() };
                assert_eq!(board.with_selection(|s| s.selector(self.id)), selector);
                self.log.borrow_mut().push(format!("{} held by {:?}", self.id.0, selector.map(|c| c.0)));
            }
        }

        let board = Board::new(RawClient::new(), ClientId(1), ClientInfo::new("me"));
        let log = Rc::new(RefCell::new(Vec::new()));
        let caps = board.capabilities();
        let (weak, sink) = (Rc::downgrade(&board.shared), log.clone());
        caps.bind_item_factory(move |id: ItemId, _: &Item| -> Box<dyn RenderHandle> {
            Box::new(Highlight { id, board: weak.clone(), log: sink.clone() })
        });
        let (weak, sink) = (Rc::downgrade(&board.shared), log.clone());
        caps.bind_local_selection_factory(move |_: Option<&SelectionInit>| -> Box<dyn SelectionView> {
            Box::new(BorderView { board: weak.clone(), log: sink.clone() })
        });
        caps.bind_remote_selection_factory(|_: &RemoteSelectionInit| -> Box<dyn SelectionView> {
            Box::new(NullSelectionView)
        });
        drive(&board, &Fixture::with_items(2), board.bootstrap()).unwrap();

        let (weak, sink) = (Rc::downgrade(&board.shared), log.clone());
        let _watch = board.with_selection(|s| s.local_selection().unwrap().srt_state()).watch(move |_| {
            let board = Board { shared: weak.upgrade().unwrap() };
            sink.borrow_mut().push(format!("watch {}", board.with_table(|t| t.len())));
        });

        board.add_own_selection(&[ItemId(1)]).unwrap();
        assert_eq!(*log.borrow(), vec!["1 held by Some(1)", "watch 2", "border 10 0"]);
        log.borrow_mut().clear();

        board.move_own_selection(Transform::from_affine(Affine::translate((10.0, 5.0)))).unwrap();
        board.cancel_selection().unwrap();
        assert_eq!(*log.borrow(), vec!["watch 2", "border 10 5", "1 held by None"]);
    }

    #[test]
    fn test_edit_refused_for_items_held_by_others() {
        let fixture = Fixture { clients: vec![(1, None), (2, None)], ..Fixture::with_items(2) };
        let board = bootstrapped(1, &fixture);
        let srt = tjson(Affine::translate((10.0, 0.0)));
        notify(&board, "SelectionItemsAdded", json!({"id": 2, "items": [[1, tjson(Affine::IDENTITY)]], "newSrt": srt}));

        assert!(matches!(
            board.edit_item(ItemId(1), rect(50.0, 50.0)),
            Err(BoardError::Table(TableError::HeldBy { id: ItemId(1), holder: ClientId(2) }))
        ));
        assert_eq!(board.item(ItemId(1)).unwrap(), rect(10.0, 0.0));
        assert!(sent(&board).is_empty());

        let placed = tjson(Affine::translate((10.0, 0.0)));
        notify(&board, "SelectionItemsRemoved", json!({"id": 2, "items": [[1, {"Transform": placed}]]}));
        board.edit_item(ItemId(1), rect(50.0, 50.0)).unwrap();
        assert_eq!(board.item(ItemId(1)).unwrap(), rect(50.0, 50.0));
        assert_eq!(sent(&board)[0]["name"], "EditSingleItem");
    }
}
