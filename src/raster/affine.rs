use crate::annotations::point::Point;
use serde::{Deserialize, Serialize};

/// Affine map from pixel (col, row) to geographic (x, y).
///
/// Coefficients follow the (a, b, c, d, e, f) order:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// (col, row) = (0, 0) is the top-left corner of the top-left pixel.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        GeoTransform { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        GeoTransform::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// North-up transform from an upper-left corner and pixel sizes.
    pub fn from_origin(west: f64, north: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform::new(pixel_width, 0.0, west, 0.0, -pixel_height, north)
    }

    /// Applies the transform to an arbitrary (col, row) position.
    pub fn apply(&self, col: f64, row: f64) -> Point {
        Point::new(
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Returns the transform whose origin is `(dx, dy)` pixels further along.
    pub fn shifted(&self, dx: f64, dy: f64) -> GeoTransform {
        let origin = self.apply(dx, dy);
        GeoTransform::new(self.a, self.b, origin.x, self.d, self.e, origin.y)
    }

    /// False when the linear part cannot be inverted.
    pub fn is_invertible(&self) -> bool {
        (self.a * self.e - self.b * self.d).abs() > f64::EPSILON * f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn north_up_transform() {
        let t = GeoTransform::from_origin(117.0, 34.0, 0.0001, 0.0001);
        let p = t.apply(10.0, 20.0);
        assert_relative_eq!(p.x, 117.001, max_relative = 1e-12);
        assert_relative_eq!(p.y, 33.998, max_relative = 1e-12);
    }

    #[test]
    fn shifted_matches_apply() {
        let t = GeoTransform::new(2.0, 0.5, 100.0, 0.25, -2.0, 50.0);
        let s = t.shifted(-0.5, -0.5);
        let a = s.apply(3.0, 4.0);
        let b = t.apply(2.5, 3.5);
        assert_relative_eq!(a.x, b.x);
        assert_relative_eq!(a.y, b.y);
    }

    #[test]
    fn singular_transform_detected() {
        assert!(GeoTransform::identity().is_invertible());
        assert!(!GeoTransform::new(0.0, 0.0, 1.0, 0.0, 0.0, 1.0).is_invertible());
    }
}
