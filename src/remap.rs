//! Coordinate remapping: tile pixels to image pixels to geographic coordinates.
//!
//! Both steps are pure functions. `to_geo` is also used when outputs are regenerated from cached
//! image-pixel detections, so it must stay independent of any batch state.

use crate::annotations::detection::RawDetection;
use crate::annotations::point::Point;
use crate::annotations::polygon::Quad;
use crate::image_utils::tiling::TileWindow;
use crate::raster::affine::GeoTransform;

/// Pixel coordinates name the center of a pixel, not its top-left corner.
pub const PIXEL_CENTER_OFFSET: f64 = 0.5;

/// Moves a detection from tile-local pixels into full-image pixels.
///
/// Axis-aligned shapes are expanded to a rectangle (top-left, top-right, bottom-right,
/// bottom-left) before translating.
pub fn to_image_pixels(raw: &RawDetection, tile: &TileWindow) -> Quad {
    raw.shape
        .to_quad()
        .translate(tile.origin_x as f64, tile.origin_y as f64)
}

/// Maps image-pixel points to geographic coordinates under the pixel-center convention.
pub fn to_geo(polygon: &Quad, transform: &GeoTransform) -> Quad {
    Quad(polygon.0.map(|p| pixel_to_geo(p, transform)))
}

pub fn pixel_to_geo(point: Point, transform: &GeoTransform) -> Point {
    transform.apply(point.x + PIXEL_CENTER_OFFSET, point.y + PIXEL_CENTER_OFFSET)
}
