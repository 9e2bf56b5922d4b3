//! Per-variant render constructors.

use std::collections::HashMap;
use std::rc::Rc;

use super::{ClientId, Item, ItemId, ItemType};

/// Render-side representation of an item, owned by its table entry.
pub trait RenderHandle {
    /// The item's canonical value changed.
    fn update(&mut self, item: &Item);

    /// The item's selector changed. `None` means it was released.
    fn selection_changed(&mut self, _selector: Option<ClientId>) {}

    /// The item was deleted from the board.
    fn removed(&mut self) {}
}

/// A handle that renders nothing.
#[derive(Debug, Default)]
pub struct NullRenderHandle;

impl RenderHandle for NullRenderHandle {
    fn update(&mut self, _item: &Item) {}
}

/// Builds the render handle for a newly inserted item.
pub type ItemFactory = dyn Fn(ItemId, &Item) -> Box<dyn RenderHandle>;

type Builder = Box<dyn Fn(ItemId, &Item) -> Box<dyn RenderHandle>>;

/// Maps each [`ItemType`] to the constructor for its render handle.
///
/// Built once at startup and turned into the board's item factory.
pub struct ItemRegistry {
    builders: HashMap<ItemType, Builder>,
    fallback: Builder,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
            fallback: Box::new(|_: ItemId, _: &Item| -> Box<dyn RenderHandle> { Box::new(NullRenderHandle) }),
        }
    }

    pub fn register<F>(mut self, item_type: ItemType, builder: F) -> Self
    where
        F: Fn(ItemId, &Item) -> Box<dyn RenderHandle> + 'static,
    {
        if self.builders.insert(item_type, Box::new(builder)).is_some() {
            log::warn!("Render builder for {} replaced", item_type);
        }
        self
    }

    /// Constructor used for variants with no registered builder.
    pub fn fallback<F>(mut self, builder: F) -> Self
    where
        F: Fn(ItemId, &Item) -> Box<dyn RenderHandle> + 'static,
    {
        self.fallback = Box::new(builder);
        self
    }

    pub fn is_registered(&self, item_type: ItemType) -> bool {
        self.builders.contains_key(&item_type)
    }

    pub fn build(&self, id: ItemId, item: &Item) -> Box<dyn RenderHandle> {
        match self.builders.get(&item.item_type()) {
            Some(builder) => builder(id, item),
            None => {
                log::debug!("No render builder for {}, using fallback", item.item_type());
                (self.fallback)(id, item)
            }
        }
    }

    pub fn into_factory(self) -> Rc<ItemFactory> {
        Rc::new(move |id: ItemId, item: &Item| self.build(id, item))
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}
