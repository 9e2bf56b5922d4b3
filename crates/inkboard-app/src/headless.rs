//! Render capabilities for a client without a canvas.
//!
//! Every handle logs what a renderer would have drawn.

use inkboard_core::{Capabilities, ClientId, Item, ItemId, ItemRegistry, ItemType, RenderHandle, SelectionView};
use kurbo::Affine;

pub struct LoggingItem {
    id: ItemId,
}

impl RenderHandle for LoggingItem {
    fn update(&mut self, item: &Item) {
        log::debug!("{} redrawn at {:?}", self.id, item.board_transform().origin);
    }

    fn selection_changed(&mut self, selector: Option<ClientId>) {
        match selector {
            Some(client) => log::debug!("{} highlighted for {}", self.id, client),
            None => log::debug!("{} released", self.id),
        }
    }

    fn removed(&mut self) {
        log::debug!("{} removed", self.id);
    }
}

pub struct LoggingSelection {
    owner: String,
}

impl SelectionView for LoggingSelection {
    fn srt_changed(&mut self, srt: Affine) {
        log::debug!("{} selection placed at {:?}", self.owner, srt.translation());
    }

    fn item_added(&mut self, id: ItemId, _sit: Affine) {
        log::debug!("{} selection gained {}", self.owner, id);
    }

    fn item_removed(&mut self, id: ItemId) {
        log::debug!("{} selection lost {}", self.owner, id);
    }
}

/// A registry with a logging handle for every item type.
pub fn registry() -> ItemRegistry {
    ItemType::ALL.iter().fold(ItemRegistry::new(), |registry, item_type| {
        registry.register(*item_type, |id: ItemId, _: &Item| -> Box<dyn RenderHandle> { Box::new(LoggingItem { id }) })
    })
}

/// Bind every render capability of a board to logging stand-ins.
pub fn bind(capabilities: &Capabilities) {
    capabilities.bind_registry(registry());
    capabilities.bind_local_selection_factory(|_| -> Box<dyn SelectionView> {
        Box::new(LoggingSelection { owner: "local".into() })
    });
    capabilities.bind_remote_selection_factory(|init| -> Box<dyn SelectionView> {
        Box::new(LoggingSelection { owner: init.id.to_string() })
    });
}
