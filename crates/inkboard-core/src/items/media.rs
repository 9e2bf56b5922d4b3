//! Content items: images, text boxes, links and tags.
//!
//! All of them occupy the transformed unit square.

use super::{
    apply_transform_location, transform_location, ItemTrait, ItemType, LocationError, LocationUpdate, UNIT_SQUARE,
};
use crate::transform::Transform;
use kurbo::{Affine, Rect};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub transform: Transform,
    pub url: String,
    pub description: String,
}

/// A markdown text box. The transform places the box, not the glyphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub transform: Transform,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub transform: Transform,
    pub url: String,
    pub text: String,
}

/// Identity of a tag type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub transform: Transform,
    pub id: TagId,
    pub data: String,
}

macro_rules! unit_square_item {
    ($($ty:ident),*) => {
        $(
            impl ItemTrait for $ty {
                fn item_type(&self) -> ItemType {
                    ItemType::$ty
                }

                fn board_transform(&self) -> Transform {
                    self.transform
                }

                fn local_bounds(&self) -> Rect {
                    UNIT_SQUARE
                }

                fn location_update(&self, placement: Affine) -> LocationUpdate {
                    transform_location(placement)
                }

                fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError> {
                    apply_transform_location(ItemType::$ty, &mut self.transform, update)
                }
            }
        )*
    };
}

unit_square_item!(Image, Text, Link, Tag);
