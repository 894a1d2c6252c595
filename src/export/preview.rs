//! Annotated preview image.
//!
//! The preview is a convenience artifact: the source raster stretched to 8 bits, each detection
//! outlined and tagged at its first corner. It can always be rebuilt from an [`ImageResult`] and
//! the raster.

use crate::aggregate::ImageResult;
use crate::annotations::detection::Detection;
use crate::annotations::point::Point;
use crate::error::PipelineError;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::warn;
use std::path::Path;

pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const TAG_HEIGHT: u32 = 20;
const TAG_PADDING: u32 = 2;
const LABEL_SCALE: f32 = 16.0;

static LABEL_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

fn label_font() -> Option<FontRef<'static>> {
    match FontRef::try_from_slice(LABEL_FONT) {
        Ok(font) => Some(font),
        Err(err) => {
            warn!("Preview labels disabled, bundled font is unreadable: {}", err);
            None
        }
    }
}

fn draw_outline(canvas: &mut RgbImage, detection: &Detection) {
    let points = detection.polygon.points();
    for i in 0..points.len() {
        let (a, b) = (points[i], points[(i + 1) % points.len()]);
        // Two pixels wide.
        for offset in [0.0, 1.0] {
            draw_line_segment_mut(
                canvas,
                (a.x as f32 + offset, a.y as f32),
                (b.x as f32 + offset, b.y as f32),
                OUTLINE_COLOR,
            );
        }
    }
}

/// The tag sits just above the first corner, or just below the top edge if there is no room.
fn tag_rect(corner: Point, label_width: u32, canvas_width: u32, canvas_height: u32) -> Option<Rect> {
    if canvas_width == 0 || canvas_height == 0 {
        return None;
    }
    let width = label_width.max(1) + 2 * TAG_PADDING;
    let x = (corner.x.round() as i64).clamp(0, canvas_width as i64 - 1);
    let y = (corner.y.round() as i64 - TAG_HEIGHT as i64).clamp(0, canvas_height as i64 - 1);
    Some(Rect::at(x as i32, y as i32).of_size(width, TAG_HEIGHT))
}

/// Outlines every detection and tags it with its class name.
pub fn draw_detections(canvas: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = canvas.dimensions();
    let font = label_font();
    let scale = PxScale::from(LABEL_SCALE);
    for detection in detections {
        draw_outline(canvas, detection);
        let label_width = font
            .as_ref()
            .map(|font| text_size(scale, font, &detection.class_name).0)
            .unwrap_or(0);
        let corner = detection.polygon.points()[0];
        let Some(rect) = tag_rect(corner, label_width, w, h) else {
            continue;
        };
        draw_filled_rect_mut(canvas, rect, OUTLINE_COLOR);
        if let Some(font) = &font {
            draw_text_mut(
                canvas,
                LABEL_COLOR,
                rect.left() + TAG_PADDING as i32,
                rect.top() + TAG_PADDING as i32,
                scale,
                font,
                &detection.class_name,
            );
        }
    }
}

pub fn render_preview(source: &RgbImage, result: &ImageResult) -> RgbImage {
    let mut canvas = source.clone();
    draw_detections(&mut canvas, &result.detections);
    canvas
}

pub fn save_preview(source: &RgbImage, result: &ImageResult, path: &Path) -> Result<(), PipelineError> {
    render_preview(source, result).save(path).map_err(|err| match err {
        image::ImageError::IoError(e) => PipelineError::io(path, e),
        other => PipelineError::format(format!("{}: {}", path.display(), other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::polygon::Quad;

    fn detection(min: (f64, f64), max: (f64, f64)) -> Detection {
        Detection::new(
            "car".to_string(),
            0.9,
            Quad::from_corners(Point::new(min.0, min.1), Point::new(max.0, max.1)),
        )
    }

    #[test]
    fn outline_and_tag_are_drawn() {
        let mut canvas = RgbImage::new(100, 100);
        draw_detections(&mut canvas, &[detection((30.0, 40.0), (60.0, 70.0))]);
        // Bottom edge.
        assert_eq!(canvas.get_pixel(45, 70), &OUTLINE_COLOR);
        // Tag above the first corner, padding left as fill.
        assert_eq!(canvas.get_pixel(30, 20), &OUTLINE_COLOR);
        // Interior untouched.
        assert_eq!(canvas.get_pixel(45, 55), &Rgb([0, 0, 0]));
    }

    #[test]
    fn tag_carries_class_name() {
        let mut canvas = RgbImage::new(100, 100);
        let det = detection((30.0, 40.0), (60.0, 70.0));
        draw_detections(&mut canvas, std::slice::from_ref(&det));

        let font = label_font().unwrap();
        let (text_width, _) = text_size(PxScale::from(LABEL_SCALE), &font, "car");
        assert!(text_width > 0);
        let rect = tag_rect(det.polygon.points()[0], text_width, 100, 100).unwrap();
        assert_eq!(rect.width(), text_width + 2 * TAG_PADDING);

        let lettering = (rect.left()..rect.right())
            .flat_map(|x| (rect.top()..rect.bottom()).map(move |y| (x as u32, y as u32)))
            .filter(|&(x, y)| canvas.get_pixel(x, y) != &OUTLINE_COLOR)
            .count();
        assert!(lettering > 0);

        // Different classes get tags of different widths.
        let (wide, _) = text_size(PxScale::from(LABEL_SCALE), &font, "container ship");
        assert!(wide > text_width);
    }

    #[test]
    fn tag_is_kept_on_canvas() {
        let rect = tag_rect(Point::new(5.0, 3.0), 24, 50, 50).unwrap();
        assert_eq!((rect.left(), rect.top()), (5, 0));
        assert_eq!(rect.width(), 24 + 2 * TAG_PADDING);
        assert!(tag_rect(Point::new(0.0, 0.0), 24, 0, 0).is_none());
    }
}
