use crate::annotations::bounding_box::BoundingBox;
use crate::annotations::point::Point;
use serde::{Deserialize, Serialize};

/// A four corner polygon.
///
/// Every detection ends up as a quad, whether the model predicted a rotated box or an
/// axis-aligned one. Quads built from an axis-aligned box have their corners in the order
/// top-left, top-right, bottom-right, bottom-left. Rotated quads keep the corner order the
/// model reported.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Quad(pub [Point; 4]);

impl Quad {
    /// Expands two opposite corners into an explicit rectangle.
    pub fn from_corners(min: Point, max: Point) -> Quad {
        Quad([
            Point::new(min.x, min.y),
            Point::new(max.x, min.y),
            Point::new(max.x, max.y),
            Point::new(min.x, max.y),
        ])
    }

    /// A rotated rectangle given its center, size and rotation in radians.
    ///
    /// Corners are produced starting from the (+w/2, -h/2) corner in the box's own frame and
    /// going clockwise in image space.
    pub fn from_rotated_box(cx: f64, cy: f64, w: f64, h: f64, angle: f64) -> Quad {
        let (sin, cos) = angle.sin_cos();
        let half = [(w / 2.0, -h / 2.0), (w / 2.0, h / 2.0), (-w / 2.0, h / 2.0), (-w / 2.0, -h / 2.0)];
        let corner = |(dx, dy): (f64, f64)| Point::new(cx + dx * cos - dy * sin, cy + dx * sin + dy * cos);
        Quad([corner(half[0]), corner(half[1]), corner(half[2]), corner(half[3])])
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Quad {
        Quad(self.0.map(|p| p.translate(dx, dy)))
    }

    pub fn scale(&self, factor: f64) -> Quad {
        Quad(self.0.map(|p| Point::new(p.x * factor, p.y * factor)))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::enclosing(&self.0).unwrap_or_default()
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.0).abs()
    }

    /// Intersection over union of two convex quads.
    pub fn intersection_over_union(&self, other: &Quad) -> f64 {
        let a = counter_clockwise(&self.0);
        let b = counter_clockwise(&other.0);
        let intersection = signed_area(&clip_convex(&a, &b)).abs();
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

fn signed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

fn counter_clockwise(points: &[Point; 4]) -> Vec<Point> {
    let mut pts = points.to_vec();
    if signed_area(&pts) < 0.0 {
        pts.reverse();
    }
    pts
}

/// Sutherland-Hodgman clipping of `subject` by the convex, counter-clockwise `clip` polygon.
fn clip_convex(subject: &[Point], clip: &[Point]) -> Vec<Point> {
    let mut output = subject.to_vec();
    for i in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let edge_start = clip[i];
        let edge_end = clip[(i + 1) % clip.len()];
        let inside = |p: &Point| {
            (edge_end.x - edge_start.x) * (p.y - edge_start.y)
                - (edge_end.y - edge_start.y) * (p.x - edge_start.x)
                >= 0.0
        };
        let input = std::mem::take(&mut output);
        for (j, current) in input.iter().enumerate() {
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_in = inside(current);
            let previous_in = inside(&previous);
            if current_in {
                if !previous_in {
                    output.push(line_intersection(previous, *current, edge_start, edge_end));
                }
                output.push(*current);
            } else if previous_in {
                output.push(line_intersection(previous, *current, edge_start, edge_end));
            }
        }
    }
    output
}

fn line_intersection(p1: Point, p2: Point, q1: Point, q2: Point) -> Point {
    let d1 = (p2.x - p1.x, p2.y - p1.y);
    let d2 = (q2.x - q1.x, q2.y - q1.y);
    let denom = d1.0 * d2.1 - d1.1 * d2.0;
    if denom.abs() < f64::EPSILON {
        return p2;
    }
    let t = ((q1.x - p1.x) * d2.1 - (q1.y - p1.y) * d2.0) / denom;
    Point::new(p1.x + t * d1.0, p1.y + t * d1.1)
}
