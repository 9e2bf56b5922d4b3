//! Board methods, iterates and notifications.
//!
//! Field names are camelCase on the wire. Tuples serialize as JSON arrays.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{Iterate, Method, Notify, ServerResult};
use crate::items::{ClientId, Item, ItemId, LocationUpdate};
use crate::transform::Transform;

/// An item's transform, keyed by id.
pub type TransformRecord = (ItemId, Transform);

/// Server acknowledgement of a mutation. Logged, not interpreted.
pub type Ack = Value;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Identification returned when opening a session over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: ClientId,
    pub session_id: u32,
}

/// Everything the server knows about one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub info: ClientInfo,
    pub selected_items: Vec<TransformRecord>,
    pub selection_transform: Transform,
}

macro_rules! method {
    ($ty:ident => $resp:ty) => {
        impl Method for $ty {
            const NAME: &'static str = stringify!($ty);
            type Response = $resp;
        }
    };
}

macro_rules! notify {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Notify for $ty {
                const NAME: &'static str = stringify!($ty);
            }
        )*
    };
}

// ---- methods ----

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetAllItemIDs {}
method!(GetAllItemIDs => Vec<ItemId>);

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetAllClientIDs {}
method!(GetAllClientIDs => Vec<ClientId>);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetClientState {
    pub client_id: ClientId,
}
method!(GetClientState => ClientState);

#[derive(Debug, Clone, Serialize)]
pub struct CreateItem {
    pub item: Item,
}
method!(CreateItem => ServerResult<ItemId>);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSingleItem {
    pub item_id: ItemId,
    pub item: Item,
}
method!(EditSingleItem => Ack);

#[derive(Debug, Clone, Serialize)]
pub struct DeleteItems {
    pub ids: Vec<ItemId>,
}
method!(DeleteItems => Ack);

/// Items joining the local selection. Each record is
/// `(id, old transform, new transform)`: the previous sub-item transform for
/// existing members, or the board transform for newly added items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionAddItems {
    pub items: Vec<(ItemId, Transform, Transform)>,
    pub new_srt: Transform,
}
method!(SelectionAddItems => Ack);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionRemoveItems {
    pub items: Vec<(ItemId, LocationUpdate)>,
}
method!(SelectionRemoveItems => Ack);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionMove {
    pub new_srt: Transform,
}
method!(SelectionMove => Ack);

// ---- iterates ----

#[derive(Debug, Clone, Serialize)]
pub struct GetFullItems {
    pub ids: Vec<ItemId>,
}

impl Iterate for GetFullItems {
    const NAME: &'static str = "GetFullItems";
    type Item = (ItemId, ServerResult<Item>);
}

// ---- notifications ----

#[derive(Debug, Clone, Deserialize)]
pub struct ItemCreated {
    pub id: ItemId,
    #[serde(default)]
    pub client: Option<ClientId>,
    pub item: Item,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleItemEdited {
    pub id: ItemId,
    pub item: Item,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemsDeleted {
    pub ids: Vec<ItemId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientJoined {
    pub id: ClientId,
    #[serde(default)]
    pub info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConnected {
    pub id: ClientId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientDisconnected {
    pub id: ClientId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientExited {
    pub id: ClientId,
}

/// Items added to another client's selection, with their sub-item transforms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionItemsAdded {
    pub id: ClientId,
    pub items: Vec<TransformRecord>,
    pub new_srt: Transform,
}

/// Items released from another client's selection, with their final placement.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionItemsRemoved {
    pub id: ClientId,
    pub items: Vec<(ItemId, LocationUpdate)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionMoved {
    pub id: ClientId,
    pub transform: Transform,
    #[serde(default)]
    pub new_sits: Option<Vec<TransformRecord>>,
}

notify!(
    ItemCreated,
    SingleItemEdited,
    ItemsDeleted,
    ClientJoined,
    ClientConnected,
    ClientDisconnected,
    ClientExited,
    SelectionItemsAdded,
    SelectionItemsRemoved,
    SelectionMoved,
);
