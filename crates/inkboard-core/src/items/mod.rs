//! Board items.
//!
//! [`Item`] is a closed sum of every item kind the server knows. Each variant
//! struct implements [`ItemTrait`], and `Item` delegates to it, so geometry and
//! location-update logic lives next to the variant it belongs to.
//!
//! Transform-based items draw a unit square (or circle) centred on the origin,
//! placed on the board by their `transform`. Point-based items (`Line`,
//! `Polygon`) store board coordinates directly, so their board transform is
//! the identity.

mod line;
mod media;
mod registry;
mod shape;

pub use line::{Line, Polygon};
pub use media::{Image, Link, Tag, TagId, Text};
pub use registry::{ItemFactory, ItemRegistry, NullRenderHandle, RenderHandle};
pub use shape::{Ellipse, Path, Rectangle, Spline, SplineNode};

use std::fmt;

use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::Transform;

/// Server-assigned item identity. Unique and never reused within a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Server-assigned participant identity, stable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// A CSS colour string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub String);

impl Color {
    pub fn new(css: impl Into<String>) -> Self {
        Self(css.into())
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new("black")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub width: f64,
    pub color: Color,
}

impl Default for Stroke {
    fn default() -> Self {
        Self { width: 1.0, color: Color::default() }
    }
}

/// The final placement of an item released from a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationUpdate {
    Transform(Transform),
    Points(Vec<Point>),
}

impl LocationUpdate {
    fn kind(&self) -> &'static str {
        match self {
            LocationUpdate::Transform(_) => "transform",
            LocationUpdate::Points(_) => "points",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LocationError {
    #[error("{item} items cannot take a {update} location update")]
    Mismatch { item: ItemType, update: &'static str },
    #[error("line location update needs 2 points, got {0}")]
    PointCount(usize),
}

/// Variant tag of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemType {
    Rectangle,
    Ellipse,
    Line,
    Polygon,
    Path,
    Image,
    Text,
    Link,
    Tag,
}

impl ItemType {
    pub const ALL: [ItemType; 9] = [
        ItemType::Rectangle,
        ItemType::Ellipse,
        ItemType::Line,
        ItemType::Polygon,
        ItemType::Path,
        ItemType::Image,
        ItemType::Text,
        ItemType::Link,
        ItemType::Tag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ItemType::Rectangle => "Rectangle",
            ItemType::Ellipse => "Ellipse",
            ItemType::Line => "Line",
            ItemType::Polygon => "Polygon",
            ItemType::Path => "Path",
            ItemType::Image => "Image",
            ItemType::Text => "Text",
            ItemType::Link => "Link",
            ItemType::Tag => "Tag",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Geometry shared by every item variant.
pub trait ItemTrait {
    fn item_type(&self) -> ItemType;

    /// Placement of the local geometry on the board.
    fn board_transform(&self) -> Transform;

    /// Bounds of the geometry before `board_transform` is applied.
    fn local_bounds(&self) -> Rect;

    /// The update that moves this item to `placement`, where `placement`
    /// replaces the item's board transform.
    fn location_update(&self, placement: Affine) -> LocationUpdate;

    fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError>;
}

/// Every item kind, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    Rectangle(Rectangle),
    Ellipse(Ellipse),
    Line(Line),
    Polygon(Polygon),
    Path(Path),
    Image(Image),
    Text(Text),
    Link(Link),
    Tag(Tag),
}

impl Item {
    fn inner(&self) -> &dyn ItemTrait {
        match self {
            Item::Rectangle(i) => i,
            Item::Ellipse(i) => i,
            Item::Line(i) => i,
            Item::Polygon(i) => i,
            Item::Path(i) => i,
            Item::Image(i) => i,
            Item::Text(i) => i,
            Item::Link(i) => i,
            Item::Tag(i) => i,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ItemTrait {
        match self {
            Item::Rectangle(i) => i,
            Item::Ellipse(i) => i,
            Item::Line(i) => i,
            Item::Polygon(i) => i,
            Item::Path(i) => i,
            Item::Image(i) => i,
            Item::Text(i) => i,
            Item::Link(i) => i,
            Item::Tag(i) => i,
        }
    }

    pub fn item_type(&self) -> ItemType {
        self.inner().item_type()
    }

    pub fn board_transform(&self) -> Transform {
        self.inner().board_transform()
    }

    pub fn local_bounds(&self) -> Rect {
        self.inner().local_bounds()
    }

    /// Board-space bounding box.
    pub fn bounds(&self) -> Rect {
        self.bounds_with(self.board_transform().to_affine())
    }

    /// Bounding box of the item if it were placed by `placement` instead of
    /// its own board transform.
    pub fn bounds_with(&self, placement: Affine) -> Rect {
        placement.transform_rect_bbox(self.local_bounds())
    }

    pub fn location_update(&self, placement: Affine) -> LocationUpdate {
        self.inner().location_update(placement)
    }

    pub fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError> {
        self.inner_mut().apply_location_update(update)
    }
}

/// Bounds of the unit square centred on the origin.
pub(crate) const UNIT_SQUARE: Rect = Rect::new(-0.5, -0.5, 0.5, 0.5);

pub(crate) fn transform_location(placement: Affine) -> LocationUpdate {
    LocationUpdate::Transform(Transform::from_affine(placement))
}

pub(crate) fn apply_transform_location(
    item: ItemType,
    target: &mut Transform,
    update: LocationUpdate,
) -> Result<(), LocationError> {
    match update {
        LocationUpdate::Transform(t) => {
            *target = t;
            Ok(())
        }
        other => Err(LocationError::Mismatch { item, update: other.kind() }),
    }
}

pub(crate) fn points_bounds(points: &[Point]) -> Rect {
    let mut iter = points.iter();
    let Some(first) = iter.next() else {
        return Rect::ZERO;
    };
    iter.fold(Rect::from_points(*first, *first), |acc, p| acc.union_pt(*p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Vec2;

    fn rect_at(x: f64, y: f64, w: f64, h: f64) -> Item {
        Item::Rectangle(Rectangle {
            transform: Transform::new(Point::new(x, y), Vec2::new(w, 0.0), Vec2::new(0.0, h)),
            stroke: Stroke::default(),
            fill: Color::new("red"),
        })
    }

    #[test]
    fn test_item_wire_tag() {
        let json = serde_json::to_value(rect_at(0.0, 0.0, 1.0, 1.0)).unwrap();
        assert_eq!(json["type"], "Rectangle");
        assert_eq!(json["fill"], "red");
        assert!(json["transform"]["basisX"].is_object());

        let line: Item = serde_json::from_str(
            r#"{"type":"Line","start":{"x":0,"y":0},"end":{"x":3,"y":4},"stroke":{"width":2,"color":"blue"}}"#,
        )
        .unwrap();
        assert_eq!(line.item_type(), ItemType::Line);
    }

    #[test]
    fn test_bounds_of_transform_item() {
        let item = rect_at(10.0, 20.0, 4.0, 2.0);
        let bounds = item.bounds();
        assert!((bounds.x0 - 8.0).abs() < 1e-9);
        assert!((bounds.x1 - 12.0).abs() < 1e-9);
        assert!((bounds.y0 - 19.0).abs() < 1e-9);
        assert!((bounds.y1 - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_location_update_mismatch() {
        let mut item = rect_at(0.0, 0.0, 1.0, 1.0);
        let err = item
            .apply_location_update(LocationUpdate::Points(vec![Point::ORIGIN]))
            .unwrap_err();
        assert_eq!(err, LocationError::Mismatch { item: ItemType::Rectangle, update: "points" });
    }

    #[test]
    fn test_location_update_wire_shape() {
        let update = LocationUpdate::Points(vec![Point::new(1.0, 2.0)]);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"Points": [{"x": 1.0, "y": 2.0}]}));
    }

    #[test]
    fn test_ids_are_bare_integers() {
        assert_eq!(serde_json::to_string(&ItemId(7)).unwrap(), "7");
        assert_eq!(serde_json::from_str::<ClientId>("3").unwrap(), ClientId(3));
    }
}
