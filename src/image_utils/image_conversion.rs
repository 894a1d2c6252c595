use image::{Rgb, Rgb32FImage};
use ndarray::{Array4, ArrayView3};

/// Converts a (height, width, 3) array into a float image, keeping full precision for resampling.
pub fn convert_array_view_to_rgb32f_image(image_array: ArrayView3<f32>) -> Rgb32FImage {
    let (image_height, image_width, _) = image_array.dim();
    Rgb32FImage::from_fn(image_width as u32, image_height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            image_array[[y, x, 0]],
            image_array[[y, x, 1]],
            image_array[[y, x, 2]],
        ])
    })
}

/// Writes an image into the top-left corner of a (1, 3, size, size) model input tensor.
///
/// Pixels outside the image keep `fill`.
pub fn convert_rgb32f_image_to_nchw(image: &Rgb32FImage, size: usize, fill: f32) -> Array4<f32> {
    let mut tensor = Array4::from_elem((1, 3, size, size), fill);
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = pixel.0[c];
        }
    }
    tensor
}
