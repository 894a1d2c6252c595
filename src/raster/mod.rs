//! Raster reading.
//!
//! A [`RasterHandle`] owns the decoded samples of one georeferenced image together with its
//! pixel-to-world transform and CRS identifier. The file itself is only held open while it is
//! decoded; dropping the handle (or calling [`RasterHandle::close`]) releases the samples.

pub mod affine;
pub mod geotiff;
pub mod world_file;

use crate::error::PipelineError;
use crate::image_utils::tiling::TileWindow;
use affine::GeoTransform;
use image::{DynamicImage, Rgb, RgbImage};
use log::debug;
use ndarray::{Array3, s};
use std::path::{Path, PathBuf};

/// Decoded samples, shaped (height, width, bands).
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Array3<u8>),
    U16(Array3<u16>),
    F32(Array3<f32>),
}

impl PixelBuffer {
    pub fn shape(&self) -> (usize, usize, usize) {
        match self {
            PixelBuffer::U8(a) => a.dim(),
            PixelBuffer::U16(a) => a.dim(),
            PixelBuffer::F32(a) => a.dim(),
        }
    }

    /// The (low, high) sample values that map to 0.0 and 1.0 after normalisation.
    ///
    /// 8-bit data uses the full 0..=255 range. Wider data is stretched between its own
    /// finite minimum and maximum, since 12 or 14 bit sensors rarely fill a 16-bit range.
    pub fn value_range(&self) -> (f32, f32) {
        fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
            let (lo, hi) = values
                .filter(|v| v.is_finite())
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if lo > hi { (0.0, 1.0) } else { (lo, hi) }
        }
        match self {
            PixelBuffer::U8(_) => (0.0, 255.0),
            PixelBuffer::U16(a) => min_max(a.iter().map(|v| *v as f32)),
            PixelBuffer::F32(a) => min_max(a.iter().copied()),
        }
    }
}

/// Which source band feeds each of the three RGB channels.
fn rgb_band_indices(bands: usize) -> [usize; 3] {
    if bands >= 3 { [0, 1, 2] } else { [0, 0, 0] }
}

/// Maps a sample into [0, 1] given the (low, high) range.
fn stretch(v: f32, (lo, hi): (f32, f32)) -> f32 {
    let span = if hi > lo { hi - lo } else { 1.0 };
    ((v - lo) / span).clamp(0.0, 1.0)
}

fn normalize_window<T: Copy + Into<f32>>(
    samples: &Array3<T>,
    window: &TileWindow,
    range: (f32, f32),
) -> Array3<f32> {
    let (x0, y0) = (window.origin_x as usize, window.origin_y as usize);
    let view = samples.slice(s![
        y0..y0 + window.height as usize,
        x0..x0 + window.width as usize,
        ..
    ]);
    let bands = rgb_band_indices(view.dim().2);
    Array3::from_shape_fn(
        (window.height as usize, window.width as usize, 3),
        |(y, x, c)| stretch(view[[y, x, bands[c]]].into(), range),
    )
}

/// Stretches samples straight into an 8-bit image, one pixel at a time.
fn stretch_to_rgb8<T: Copy + Into<f32>>(samples: &Array3<T>, range: (f32, f32)) -> RgbImage {
    let (height, width, bands) = samples.dim();
    let bands = rgb_band_indices(bands);
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb(bands.map(|b| (stretch(samples[[y, x, b]].into(), range) * 255.0).round() as u8))
    })
}

/// An open georeferenced raster.
pub struct RasterHandle {
    path: PathBuf,
    pixels: PixelBuffer,
    transform: GeoTransform,
    crs: String,
    value_range: (f32, f32),
}

impl RasterHandle {
    /// Opens and decodes a raster.
    ///
    /// GeoTIFFs are georeferenced from their own tags; any other format `image` can decode
    /// needs a world file. A `.prj` sidecar supplies the CRS when the file itself has none.
    /// Rasters left without a transform or CRS are rejected with a format error.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "raster file not found"),
            ));
        }
        let is_tiff = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "tif" | "tiff"))
            .unwrap_or(false);
        let (pixels, mut transform, mut crs) = if is_tiff {
            let gt = geotiff::read_geotiff(path)?;
            (gt.pixels, gt.transform, gt.crs)
        } else {
            (read_with_image_crate(path)?, None, None)
        };

        if transform.is_none() {
            transform = match world_file::read_world_file(path) {
                Some(Ok(t)) => Some(t),
                Some(Err(reason)) => return Err(PipelineError::format(reason)),
                None => None,
            };
        }
        if crs.is_none() {
            crs = world_file::read_projection_file(path);
        }
        let transform = transform.ok_or_else(|| {
            PipelineError::format(format!("{} has no georeferencing transform", path.display()))
        })?;
        if !transform.is_invertible() {
            return Err(PipelineError::format(format!(
                "{} has a degenerate georeferencing transform",
                path.display()
            )));
        }
        let crs = crs.ok_or_else(|| {
            PipelineError::format(format!(
                "{} has no coordinate reference system",
                path.display()
            ))
        })?;
        let (height, width, bands) = pixels.shape();
        if width == 0 || height == 0 || bands == 0 {
            return Err(PipelineError::format(format!("{} is empty", path.display())));
        }
        let value_range = pixels.value_range();
        debug!(
            "Opened {} ({}x{}, {} bands, crs {})",
            path.display(),
            width,
            height,
            bands,
            crs
        );
        Ok(RasterHandle {
            path: path.to_path_buf(),
            pixels,
            transform,
            crs,
            value_range,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.pixels.shape().1 as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.shape().0 as u32
    }

    pub fn bands(&self) -> usize {
        self.pixels.shape().2
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    /// The samples as decoded, band order as in the source file.
    pub fn read_pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// One window as a (height, width, 3) array of values in [0, 1].
    ///
    /// Single band rasters are replicated into all three channels and bands past the third
    /// are ignored.
    pub fn read_window_normalized(&self, window: &TileWindow) -> Array3<f32> {
        match &self.pixels {
            PixelBuffer::U8(a) => normalize_window(a, window, self.value_range),
            PixelBuffer::U16(a) => normalize_window(a, window, self.value_range),
            PixelBuffer::F32(a) => normalize_window(a, window, self.value_range),
        }
    }

    /// The whole raster stretched to 8 bits per channel.
    ///
    /// 8-bit RGB samples are copied as they are; anything else is stretched pixel by pixel.
    pub fn to_rgb8(&self) -> RgbImage {
        match &self.pixels {
            PixelBuffer::U8(a) => {
                let (width, height) = (self.width(), self.height());
                let raw = a
                    .as_slice()
                    .filter(|_| a.dim().2 == 3)
                    .and_then(|raw| RgbImage::from_raw(width, height, raw.to_vec()));
                match raw {
                    Some(img) => img,
                    None => stretch_to_rgb8(a, self.value_range),
                }
            }
            PixelBuffer::U16(a) => stretch_to_rgb8(a, self.value_range),
            PixelBuffer::F32(a) => stretch_to_rgb8(a, self.value_range),
        }
    }

    /// Releases the decoded samples.
    pub fn close(self) {
        debug!("Closed {}", self.path.display());
    }
}

fn read_with_image_crate(path: &Path) -> Result<PixelBuffer, PipelineError> {
    let img = image::open(path).map_err(|err| match err {
        image::ImageError::IoError(e) => PipelineError::io(path, e),
        other => PipelineError::format(format!("{}: {}", path.display(), other)),
    })?;
    let (w, h) = (img.width() as usize, img.height() as usize);
    fn shaped<T>(data: Vec<T>, h: usize, w: usize, bands: usize) -> Result<Array3<T>, PipelineError> {
        Array3::from_shape_vec((h, w, bands), data).map_err(|e| PipelineError::format(e.to_string()))
    }
    let pixels = match img {
        DynamicImage::ImageLuma8(buf) => PixelBuffer::U8(shaped(buf.into_raw(), h, w, 1)?),
        DynamicImage::ImageLumaA8(buf) => PixelBuffer::U8(shaped(buf.into_raw(), h, w, 2)?),
        DynamicImage::ImageRgb8(buf) => PixelBuffer::U8(shaped(buf.into_raw(), h, w, 3)?),
        DynamicImage::ImageRgba8(buf) => PixelBuffer::U8(shaped(buf.into_raw(), h, w, 4)?),
        DynamicImage::ImageLuma16(buf) => PixelBuffer::U16(shaped(buf.into_raw(), h, w, 1)?),
        DynamicImage::ImageLumaA16(buf) => PixelBuffer::U16(shaped(buf.into_raw(), h, w, 2)?),
        DynamicImage::ImageRgb16(buf) => PixelBuffer::U16(shaped(buf.into_raw(), h, w, 3)?),
        DynamicImage::ImageRgba16(buf) => PixelBuffer::U16(shaped(buf.into_raw(), h, w, 4)?),
        DynamicImage::ImageRgb32F(buf) => PixelBuffer::F32(shaped(buf.into_raw(), h, w, 3)?),
        DynamicImage::ImageRgba32F(buf) => PixelBuffer::F32(shaped(buf.into_raw(), h, w, 4)?),
        other => PixelBuffer::U8(shaped(other.into_rgb8().into_raw(), h, w, 3)?),
    };
    Ok(pixels)
}
