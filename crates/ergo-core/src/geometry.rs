//! Planar geometry over normalized image coordinates.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Point in normalized image space (`0..1` on both axes, y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImagePoint {
    pub x: f64,
    pub y: f64,
}

impl ImagePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn to_nalgebra(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    pub fn from_nalgebra(p: Point2<f64>) -> Self {
        Self::new(p.x, p.y)
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.to_nalgebra() - other.to_nalgebra()).norm()
    }

    pub fn midpoint(&self, other: &Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Angle between two vectors in radians (0 for degenerate vectors)
pub fn angle_between(v1: &Vector2<f64>, v2: &Vector2<f64>) -> f64 {
    let norms = v1.norm() * v2.norm();
    if norms < 1e-10 {
        0.0
    } else {
        (v1.dot(v2) / norms).clamp(-1.0, 1.0).acos()
    }
}

/// Interior angle at `b` formed by the segments `b→a` and `b→c`, in degrees
pub fn joint_angle_deg(a: &ImagePoint, b: &ImagePoint, c: &ImagePoint) -> f64 {
    let ba = a.to_nalgebra() - b.to_nalgebra();
    let bc = c.to_nalgebra() - b.to_nalgebra();
    angle_between(&ba, &bc).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let p1 = ImagePoint::new(0.0, 0.0);
        let p2 = ImagePoint::new(0.3, 0.4);
        assert!((p1.distance_to(&p2) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_joint_angle_right_angle() {
        let a = ImagePoint::new(0.0, 1.0);
        let b = ImagePoint::origin();
        let c = ImagePoint::new(1.0, 0.0);
        assert!((joint_angle_deg(&a, &b, &c) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_joint_angle_degenerate_segment() {
        let b = ImagePoint::new(0.5, 0.5);
        assert_eq!(joint_angle_deg(&b, &b, &ImagePoint::new(1.0, 1.0)), 0.0);
    }
}
