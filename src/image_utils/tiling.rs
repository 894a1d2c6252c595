use serde::{Deserialize, Serialize};
use std::fmt;

/// Images whose longest side is at most this many pixels are scored in one pass.
pub const DEFAULT_SMALL_IMAGE_THRESHOLD: u32 = 1000;
pub const DEFAULT_TILE_SIZE: u32 = 640;
pub const DEFAULT_STRIDE: u32 = 500;

/// A set of custom errors for more informative error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingError {
    InvalidTileSize { tile_size: u32 },
    InvalidStride { stride: u32 },
}

impl fmt::Display for TilingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TilingError::InvalidTileSize { tile_size } => {
                write!(f, "Failed to tile image, tile size must be positive (got {}).", tile_size)
            }
            TilingError::InvalidStride { stride } => {
                write!(f, "Failed to tile image, stride must be positive (got {}).", stride)
            }
        }
    }
}

impl std::error::Error for TilingError {}

/// How the planner chose to cover an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TilingMode {
    /// The whole image is one tile.
    FullFrame,
    /// Overlapping windows on a regular stride.
    SlidingWindow,
}

/// A rectangular window into the source image, in image pixels.
///
/// Windows never extend past the image: width and height are clipped at the right and
/// bottom edges, so edge tiles may be smaller than the configured tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileWindow {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileWindow {
    pub fn new(origin_x: u32, origin_y: u32, width: u32, height: u32) -> Self {
        TileWindow {
            origin_x,
            origin_y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.origin_x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.origin_y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.origin_x && x < self.right() && y >= self.origin_y && y < self.bottom()
    }
}

/// The ordered tiles covering one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlan {
    pub mode: TilingMode,
    pub tiles: Vec<TileWindow>,
}

impl TilePlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingParameters {
    pub tile_size: u32,
    pub stride: u32,
    pub small_image_threshold: u32,
}

impl Default for TilingParameters {
    fn default() -> Self {
        TilingParameters {
            tile_size: DEFAULT_TILE_SIZE,
            stride: DEFAULT_STRIDE,
            small_image_threshold: DEFAULT_SMALL_IMAGE_THRESHOLD,
        }
    }
}

pub fn validate_tiling_parameters(params: &TilingParameters) -> Option<TilingError> {
    if params.tile_size == 0 {
        return Some(TilingError::InvalidTileSize {
            tile_size: params.tile_size,
        });
    }
    if params.stride == 0 {
        return Some(TilingError::InvalidStride {
            stride: params.stride,
        });
    }
    None
}

/// Plans the tiles for an image of the given size.
///
/// Small images (longest side at most `small_image_threshold`) get a single full-frame tile.
/// Larger images are walked row-major: the outer loop steps `y` by `stride` while `y < height`,
/// the inner loop steps `x` the same way, and each window is clipped to the image. A stride
/// larger than the tile size is accepted and leaves gaps between tiles.
pub fn plan_tiles(
    image_width: u32,
    image_height: u32,
    params: &TilingParameters,
) -> Result<TilePlan, TilingError> {
    if let Some(err) = validate_tiling_parameters(params) {
        return Err(err);
    }
    if image_width.max(image_height) <= params.small_image_threshold {
        let tiles = if image_width == 0 || image_height == 0 {
            vec![]
        } else {
            vec![TileWindow::new(0, 0, image_width, image_height)]
        };
        return Ok(TilePlan {
            mode: TilingMode::FullFrame,
            tiles,
        });
    }
    let mut tiles = Vec::new();
    for y in (0..image_height).step_by(params.stride as usize) {
        for x in (0..image_width).step_by(params.stride as usize) {
            tiles.push(TileWindow::new(
                x,
                y,
                params.tile_size.min(image_width - x),
                params.tile_size.min(image_height - y),
            ));
        }
    }
    Ok(TilePlan {
        mode: TilingMode::SlidingWindow,
        tiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(plan: &TilePlan, x: u32, y: u32) -> bool {
        plan.tiles.iter().any(|t| t.contains(x, y))
    }

    #[test]
    fn small_image_is_one_full_frame_tile() {
        for (w, h) in [(1, 1), (640, 480), (1000, 1000), (1000, 3), (999, 1000)] {
            let plan = plan_tiles(w, h, &TilingParameters::default()).unwrap();
            assert_eq!(plan.mode, TilingMode::FullFrame);
            assert_eq!(plan.tiles, vec![TileWindow::new(0, 0, w, h)]);
        }
    }

    #[test]
    fn reference_scenario_1500_by_1200() {
        let plan = plan_tiles(1500, 1200, &TilingParameters::default()).unwrap();
        assert_eq!(plan.mode, TilingMode::SlidingWindow);
        let expected: Vec<TileWindow> = vec![
            TileWindow::new(0, 0, 640, 640),
            TileWindow::new(500, 0, 640, 640),
            TileWindow::new(1000, 0, 500, 640),
            TileWindow::new(0, 500, 640, 640),
            TileWindow::new(500, 500, 640, 640),
            TileWindow::new(1000, 500, 500, 640),
            TileWindow::new(0, 1000, 640, 200),
            TileWindow::new(500, 1000, 640, 200),
            TileWindow::new(1000, 1000, 500, 200),
        ];
        assert_eq!(plan.tiles, expected);
    }

    #[test]
    fn large_image_is_fully_covered_and_bounded() {
        let (w, h) = (2333, 1051);
        let plan = plan_tiles(w, h, &TilingParameters::default()).unwrap();
        for t in &plan.tiles {
            assert!(t.width > 0 && t.height > 0);
            assert!(t.right() <= w && t.bottom() <= h);
        }
        // Sample a grid including every edge pixel row and column.
        let xs: Vec<u32> = (0..w).step_by(37).chain([w - 1]).collect();
        let ys: Vec<u32> = (0..h).step_by(29).chain([h - 1]).collect();
        for &y in &ys {
            for &x in &xs {
                assert!(covered(&plan, x, y), "pixel ({}, {}) not covered", x, y);
            }
        }
    }

    #[test]
    fn tiles_are_row_major() {
        let plan = plan_tiles(2100, 1600, &TilingParameters::default()).unwrap();
        for pair in plan.tiles.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(b.origin_y > a.origin_y || (b.origin_y == a.origin_y && b.origin_x > a.origin_x));
        }
    }

    #[test]
    fn stride_larger_than_tile_leaves_gaps() {
        let params = TilingParameters {
            tile_size: 100,
            stride: 400,
            small_image_threshold: 0,
        };
        let plan = plan_tiles(1000, 500, &params).unwrap();
        assert_eq!(plan.len(), 3 * 2);
        assert!(!covered(&plan, 150, 10));
    }

    #[test]
    fn zero_stride_is_rejected() {
        let params = TilingParameters {
            stride: 0,
            ..TilingParameters::default()
        };
        assert_eq!(
            plan_tiles(2000, 2000, &params),
            Err(TilingError::InvalidStride { stride: 0 })
        );
    }
}
