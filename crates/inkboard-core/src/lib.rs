//! Inkboard Core Library
//!
//! Client core of the inkboard collaborative drawing board: the shared item
//! table, local and remote selections with composable transforms, and the
//! protocol client that keeps them in step with the server.

pub mod board;
pub mod client;
pub mod events;
pub mod items;
pub mod protocol;
pub mod selection;
pub mod state;
pub mod table;
pub mod transform;
pub mod transport;

pub use board::{Board, BoardError, BootstrapReport, Capabilities};
pub use client::{ClientError, ErrorCode, MethodCall, RawClient, ServerError, ServerResult};
pub use events::{CallbackQueue, Deferred, EventHub, ExclusiveSlot};
pub use items::{ClientId, Item, ItemId, ItemRegistry, ItemType, LocationUpdate, RenderHandle};
pub use protocol::{ClientInfo, ClientState, ConnectionInfo};
pub use selection::{
    ClientEntry, ConnectionState, LocalSelection, LocalSelectionState, RemoteSelection, RemoteSelectionInit,
    SelectionBox, SelectionEngine, SelectionInit, SelectionView,
};
pub use state::{MutableState, State, WatchHandle};
pub use table::{ItemEvent, ItemTable};
pub use transform::{Transform, UserTransform};
#[cfg(not(target_arch = "wasm32"))]
pub use transport::NativeTransport;
pub use transport::{SocketState, TransportError, TransportEvent};
