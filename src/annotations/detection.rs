use crate::annotations::bounding_box::BoundingBox;
use crate::annotations::point::Point;
use crate::annotations::polygon::Quad;
use serde::{Deserialize, Serialize};

/// The geometry a detection model reports for one object.
///
/// Oriented models report all four corners of a rotated rectangle, axis-aligned models report
/// two opposite corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    Oriented(Quad),
    AxisAligned { min: Point, max: Point },
}

impl Shape {
    /// The shape as a four corner polygon, in the same coordinate space.
    pub fn to_quad(&self) -> Quad {
        match self {
            Shape::Oriented(quad) => *quad,
            Shape::AxisAligned { min, max } => Quad::from_corners(*min, *max),
        }
    }
}

/// A detection as it comes out of the detector for a single tile.
///
/// Coordinates are tile-local pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub shape: Shape,
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

/// A detection in full-image pixel space.
///
/// A detection is any annotation combined with a confidence score: a probability value that
/// encodes the model's belief that the detection is true. Here the annotation is always a
/// four corner polygon, whatever shape the model produced, plus its axis-aligned extent.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub polygon: Quad,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: String, confidence: f32, polygon: Quad) -> Self {
        let bbox = polygon.bounding_box();
        Detection {
            class_name,
            confidence,
            polygon,
            bbox,
        }
    }
}
