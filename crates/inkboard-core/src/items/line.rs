//! Items stored as board-space points.

use super::{points_bounds, Color, ItemTrait, ItemType, LocationError, LocationUpdate, Stroke};
use crate::transform::Transform;
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A straight segment between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point,
    pub end: Point,
    pub stroke: Stroke,
}

/// A closed loop of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point>,
    pub stroke: Stroke,
    pub fill: Color,
}

impl Line {
    pub fn new(start: Point, end: Point, stroke: Stroke) -> Self {
        Self { start, end, stroke }
    }
}

impl ItemTrait for Line {
    fn item_type(&self) -> ItemType {
        ItemType::Line
    }

    fn board_transform(&self) -> Transform {
        Transform::IDENTITY
    }

    fn local_bounds(&self) -> Rect {
        Rect::from_points(self.start, self.end)
    }

    fn location_update(&self, placement: Affine) -> LocationUpdate {
        LocationUpdate::Points(vec![placement * self.start, placement * self.end])
    }

    fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError> {
        match update {
            LocationUpdate::Points(points) => match points.as_slice() {
                [start, end] => {
                    self.start = *start;
                    self.end = *end;
                    Ok(())
                }
                other => Err(LocationError::PointCount(other.len())),
            },
            LocationUpdate::Transform(_) => Err(LocationError::Mismatch {
                item: ItemType::Line,
                update: "transform",
            }),
        }
    }
}

impl ItemTrait for Polygon {
    fn item_type(&self) -> ItemType {
        ItemType::Polygon
    }

    fn board_transform(&self) -> Transform {
        Transform::IDENTITY
    }

    fn local_bounds(&self) -> Rect {
        points_bounds(&self.points)
    }

    fn location_update(&self, placement: Affine) -> LocationUpdate {
        LocationUpdate::Points(self.points.iter().map(|p| placement * *p).collect())
    }

    fn apply_location_update(&mut self, update: LocationUpdate) -> Result<(), LocationError> {
        match update {
            LocationUpdate::Points(points) => {
                self.points = points;
                Ok(())
            }
            LocationUpdate::Transform(_) => Err(LocationError::Mismatch {
                item: ItemType::Polygon,
                update: "transform",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Vec2;

    #[test]
    fn test_line_location_maps_endpoints() {
        let line = Line::new(Point::new(0.0, 0.0), Point::new(2.0, 0.0), Stroke::default());
        let update = line.location_update(Affine::translate(Vec2::new(1.0, 1.0)));
        assert_eq!(update, LocationUpdate::Points(vec![Point::new(1.0, 1.0), Point::new(3.0, 1.0)]));
    }

    #[test]
    fn test_line_rejects_wrong_point_count() {
        let mut line = Line::new(Point::ORIGIN, Point::ORIGIN, Stroke::default());
        let err = line
            .apply_location_update(LocationUpdate::Points(vec![Point::ORIGIN; 3]))
            .unwrap_err();
        assert_eq!(err, LocationError::PointCount(3));
    }

    #[test]
    fn test_polygon_bounds_and_update() {
        let mut poly = Polygon {
            points: vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0), Point::new(2.0, 3.0)],
            stroke: Stroke::default(),
            fill: Color::new("green"),
        };
        assert_eq!(poly.local_bounds(), Rect::new(0.0, 0.0, 4.0, 3.0));
        let update = poly.location_update(Affine::scale(2.0));
        poly.apply_location_update(update).unwrap();
        assert_eq!(poly.points[1], Point::new(8.0, 0.0));
    }
}
