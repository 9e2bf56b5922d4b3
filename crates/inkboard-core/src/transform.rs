//! Affine transforms as exchanged with the board server.
//!
//! A [`Transform`] is an origin plus two basis vectors, which is the same
//! information as a 2x3 matrix `[basis_x | basis_y | origin]`. All math is done
//! through [`kurbo::Affine`]; this type exists for the wire shape and for the
//! decomposition used by property editors.
//!
//! Inversion of a singular transform (collinear or zero basis vectors) is the
//! caller's responsibility. [`invert`] returns non-finite coefficients in that
//! case; use [`checked_invert`] where the input is not known to be well formed.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

/// Determinants at or below this magnitude are treated as singular by [`checked_invert`].
const SINGULAR_EPSILON: f64 = 1e-12;

/// An affine transform in origin/basis form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub origin: Point,
    pub basis_x: Vec2,
    pub basis_y: Vec2,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        origin: Point::ORIGIN,
        basis_x: Vec2::new(1.0, 0.0),
        basis_y: Vec2::new(0.0, 1.0),
    };

    pub fn new(origin: Point, basis_x: Vec2, basis_y: Vec2) -> Self {
        Self { origin, basis_x, basis_y }
    }

    /// A pure translation to `origin`.
    pub fn translate(origin: Point) -> Self {
        Self { origin, ..Self::IDENTITY }
    }

    pub fn to_affine(self) -> Affine {
        Affine::new([
            self.basis_x.x,
            self.basis_x.y,
            self.basis_y.x,
            self.basis_y.y,
            self.origin.x,
            self.origin.y,
        ])
    }

    pub fn from_affine(affine: Affine) -> Self {
        let [a, b, c, d, e, f] = affine.as_coeffs();
        Self {
            origin: Point::new(e, f),
            basis_x: Vec2::new(a, b),
            basis_y: Vec2::new(c, d),
        }
    }

    pub fn determinant(&self) -> f64 {
        self.basis_x.cross(self.basis_y)
    }

    /// Whether every coefficient of `self` is within `tolerance` of `other`.
    pub fn approx_eq(&self, other: &Transform, tolerance: f64) -> bool {
        let lhs = self.to_affine().as_coeffs();
        let rhs = other.to_affine().as_coeffs();
        lhs.iter().zip(rhs.iter()).all(|(l, r)| (l - r).abs() <= tolerance)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Affine> for Transform {
    fn from(affine: Affine) -> Self {
        Self::from_affine(affine)
    }
}

impl From<Transform> for Affine {
    fn from(transform: Transform) -> Self {
        transform.to_affine()
    }
}

/// Apply `b` then `a`.
pub fn compose(a: Transform, b: Transform) -> Transform {
    Transform::from_affine(a.to_affine() * b.to_affine())
}

/// Inverse of `t`. The result is meaningless if `t` is singular.
pub fn invert(t: Transform) -> Transform {
    Transform::from_affine(t.to_affine().inverse())
}

/// Inverse of `t`, or `None` if its basis vectors are degenerate.
pub fn checked_invert(t: Transform) -> Option<Transform> {
    if t.determinant().abs() <= SINGULAR_EPSILON {
        return None;
    }
    Some(invert(t))
}

pub fn apply(t: Transform, point: Point) -> Point {
    t.to_affine() * point
}

/// Human-editable decomposition of a [`Transform`].
///
/// `rotation` is in degrees. `stretch` scales the unrotated basis and `skew`
/// shears the y basis along x, relative to the x stretch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserTransform {
    pub origin: Point,
    pub rotation: f64,
    pub stretch: Vec2,
    pub skew: f64,
}

impl UserTransform {
    pub fn from_transform(t: &Transform) -> Self {
        let rotation = t.basis_x.y.atan2(t.basis_x.x);
        let stretch_x = t.basis_x.hypot();
        let (st, ct) = rotation.sin_cos();

        // y basis with the rotation undone
        let oyx = ct * t.basis_y.x + st * t.basis_y.y;
        let oyy = -st * t.basis_y.x + ct * t.basis_y.y;

        Self {
            origin: t.origin,
            rotation: rotation.to_degrees(),
            stretch: Vec2::new(stretch_x, oyy),
            skew: oyx / stretch_x,
        }
    }

    pub fn to_transform(&self) -> Transform {
        let rotate = Affine::rotate(self.rotation.to_radians());
        let bx = Vec2::new(self.stretch.x, 0.0);
        let by = Vec2::new(self.skew * self.stretch.x, self.stretch.y);
        Transform {
            origin: self.origin,
            basis_x: (rotate * bx.to_point()).to_vec2(),
            basis_y: (rotate * by.to_point()).to_vec2(),
        }
    }
}

impl From<Transform> for UserTransform {
    fn from(t: Transform) -> Self {
        Self::from_transform(&t)
    }
}

impl From<UserTransform> for Transform {
    fn from(u: UserTransform) -> Self {
        u.to_transform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn sample_points() -> [Point; 4] {
        [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(-3.5, 7.25),
        ]
    }

    fn samples() -> Vec<Transform> {
        vec![
            Transform::new(Point::new(10.0, -4.0), Vec2::new(2.0, 0.5), Vec2::new(-0.3, 1.5)),
            Transform::from_affine(Affine::rotate(0.7).then_translate(Vec2::new(3.0, 9.0))),
            Transform::new(Point::new(-1.0, 2.0), Vec2::new(0.5, 0.0), Vec2::new(0.25, 4.0)),
            Transform::IDENTITY,
        ]
    }

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() <= EPS && (a.y - b.y).abs() <= EPS
    }

    #[test]
    fn test_wire_shape() {
        let t = Transform::new(Point::new(1.0, 2.0), Vec2::new(3.0, 4.0), Vec2::new(5.0, 6.0));
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "origin": {"x": 1.0, "y": 2.0},
                "basisX": {"x": 3.0, "y": 4.0},
                "basisY": {"x": 5.0, "y": 6.0},
            })
        );
        let back: Transform = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_compose_applies_right_first() {
        let scale = Transform::from_affine(Affine::scale(2.0));
        let shift = Transform::translate(Point::new(1.0, 0.0));
        let p = apply(compose(scale, shift), Point::new(1.0, 1.0));
        assert!(close(p, Point::new(4.0, 2.0)));
    }

    #[test]
    fn test_compose_associative() {
        let ts = samples();
        for a in &ts {
            for b in &ts {
                for c in &ts {
                    let left = compose(compose(*a, *b), *c);
                    let right = compose(*a, compose(*b, *c));
                    for p in sample_points() {
                        assert!(close(apply(left, p), apply(right, p)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_invert_roundtrip() {
        for t in samples() {
            let inv = checked_invert(t).unwrap();
            for p in sample_points() {
                assert!(close(apply(inv, apply(t, p)), p));
            }
            assert!(compose(t, inv).approx_eq(&Transform::IDENTITY, EPS));
        }
    }

    #[test]
    fn test_checked_invert_singular() {
        let flat = Transform::new(Point::ORIGIN, Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0));
        assert!(checked_invert(flat).is_none());
    }

    #[test]
    fn test_user_transform_roundtrip() {
        for t in samples() {
            let user = UserTransform::from_transform(&t);
            assert!(user.to_transform().approx_eq(&t, EPS));
        }
    }

    #[test]
    fn test_user_transform_rotation_degrees() {
        let t = Transform::from_affine(Affine::rotate(std::f64::consts::FRAC_PI_2));
        let user = UserTransform::from(t);
        assert!((user.rotation - 90.0).abs() < EPS);
        assert!((user.stretch.x - 1.0).abs() < EPS);
        assert!((user.stretch.y - 1.0).abs() < EPS);
        assert!(user.skew.abs() < EPS);
    }
}
