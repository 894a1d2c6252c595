use crate::annotations::point::Point;
use serde::{Deserialize, Serialize};

/// A struct representing an axis-aligned bounding box.
///
/// A bounding box is the smallest rectangle with edges parallel to the image axes that
/// contains an object. Object detection models that do not predict rotation emit these
/// directly; for rotated detections the box is derived as the extent of the polygon.
///
/// This project uses the standard convention of the left side of the image being x=0 and the top
/// of the image being y=0.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BoundingBox {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl BoundingBox {
    /// Checks if a box has valid parameters before constructing.
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Result<Self, String> {
        if left > right {
            Err(format!(
                "Failed to create BoundingBox, value for left > value for right ({} > {}).",
                left, right
            ))
        } else if top > bottom {
            Err(format!(
                "Failed to create BoundingBox, value for top > value for bottom ({} > {}).",
                top, bottom
            ))
        } else {
            Ok(BoundingBox {
                left,
                top,
                right,
                bottom,
            })
        }
    }

    /// The extent (min_x, min_y, max_x, max_y) of a set of points.
    ///
    /// Returns None for an empty slice.
    pub fn enclosing(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            left: first.x,
            top: first.y,
            right: first.x,
            bottom: first.y,
        };
        for p in &points[1..] {
            bbox.left = bbox.left.min(p.x);
            bbox.top = bbox.top.min(p.y);
            bbox.right = bbox.right.max(p.x);
            bbox.bottom = bbox.bottom.max(p.y);
        }
        Some(bbox)
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn right(&self) -> f64 {
        self.right
    }

    pub fn bottom(&self) -> f64 {
        self.bottom
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn as_xyxy(&self) -> (f64, f64, f64, f64) {
        (self.left, self.top, self.right, self.bottom)
    }

    /// Clamps the box into [0, width] x [0, height].
    pub fn clip(&self, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            left: self.left.clamp(0.0, width),
            top: self.top.clamp(0.0, height),
            right: self.right.clamp(0.0, width),
            bottom: self.bottom.clamp(0.0, height),
        }
    }

    pub fn intersection_over_union(&self, other: &BoundingBox) -> f64 {
        let inter_w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let inter_h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_box() {
        assert!(BoundingBox::new(5.0, 0.0, 1.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, 5.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn enclosing_extent() {
        let pts = [
            Point::new(3.0, 7.0),
            Point::new(-1.0, 2.0),
            Point::new(4.5, 3.0),
        ];
        let bbox = BoundingBox::enclosing(&pts).unwrap();
        assert_eq!(bbox.as_xyxy(), (-1.0, 2.0, 4.5, 7.0));
        assert!(BoundingBox::enclosing(&[]).is_none());
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap();
        let b = BoundingBox::new(1.0, 0.0, 3.0, 2.0).unwrap();
        // intersection 2, union 6
        assert!((a.intersection_over_union(&b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn iou_disjoint_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0).unwrap();
        assert_eq!(a.intersection_over_union(&b), 0.0);
    }
}
