use crate::image_utils::image_conversion::{
    convert_array_view_to_rgb32f_image, convert_rgb32f_image_to_nchw,
};
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView3};

/// Gray value used for the padded border, matching what YOLO models are trained with.
pub const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// A tile resized onto a square model canvas.
pub struct Letterbox {
    pub tensor: Array4<f32>,
    /// Model pixels per tile pixel. Divide model coordinates by this to get back to the tile.
    pub scale: f64,
}

/// Resizes a (height, width, 3) tile to fit a `size` x `size` canvas keeping its aspect ratio,
/// and pads by adding pixels to the right and bottom of the image.
pub fn letterbox(tile: ArrayView3<f32>, size: u32) -> Letterbox {
    let (height, width, _) = tile.dim();
    let scale = (size as f64 / width.max(1) as f64).min(size as f64 / height.max(1) as f64);
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, size);
    let image = convert_array_view_to_rgb32f_image(tile);
    let resized = if new_width as usize == width && new_height as usize == height {
        image
    } else {
        imageops::resize(&image, new_width, new_height, FilterType::Triangle)
    };
    Letterbox {
        tensor: convert_rgb32f_image_to_nchw(&resized, size as usize, LETTERBOX_FILL),
        scale,
    }
}
