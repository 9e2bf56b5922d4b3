//! Filled shapes and hand-drawn paths.

use super::{
    apply_transform_location, points_bounds, transform_location, Color, ItemTrait, ItemType,
    LocationError, LocationUpdate, Stroke, UNIT_SQUARE,
};
use crate::transform::Transform;
use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// A rectangle. Its size comes from the transform's basis vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub transform: Transform,
    pub stroke: Stroke,
    pub fill: Color,
}

/// An ellipse inscribed in the unit square.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub transform: Transform,
    pub stroke: Stroke,
    pub fill: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplineNode {
    pub position: Point,
    /// Direction of the curve at this node.
    pub velocity: Vec2,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spline {
    pub points: Vec<SplineNode>,
}

/// A hand-drawn path, with node positions in the item's local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub transform: Transform,
    pub path: Spline,
    pub stroke: Stroke,
}

impl Rectangle {
    pub fn new(transform: Transform, stroke: Stroke, fill: Color) -> Self {
        Self { transform, stroke, fill }
    }
}

impl Ellipse {
    pub fn new(transform: Transform, stroke: Stroke, fill: Color) -> Self {
        Self { transform, stroke, fill }
    }
}

impl ItemTrait for Rectangle {
    fn item_type(&self) -> ItemType {
        ItemType::Rectangle
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
        apply_transform_location(ItemType::Rectangle, &mut self.transform, update)
    }
}

impl ItemTrait for Ellipse {
    fn item_type(&self) -> ItemType {
        ItemType::Ellipse
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
        apply_transform_location(ItemType::Ellipse, &mut self.transform, update)
    }
}

impl ItemTrait for Path {
    fn item_type(&self) -> ItemType {
        ItemType::Path
    }

    fn board_transform(&self) -> Transform {
        self.transform
    }

    fn local_bounds(&self) -> Rect {
        let positions: Vec<Point> = self.path.points.iter().map(|n| n.position).collect();
        points_bounds(&positions)
    }

    fn location_update(&self, placement: Affine) -> LocationUpdate {
        transform_location(placement)
    }

    fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError> {
        apply_transform_location(ItemType::Path, &mut self.transform, update)
    }
}
