//! Per-image aggregation of tile detections.

use crate::annotations::detection::{Detection, RawDetection};
use crate::annotations::polygon::Quad;
use crate::image_utils::tiling::TileWindow;
use crate::object_detection::object_detection_utils::suppress_keeping_order;
use crate::raster::RasterHandle;
use crate::raster::affine::GeoTransform;
use crate::remap::{to_geo, to_image_pixels};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What the detector reported for one tile, in tile-local pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct TileDetections {
    pub window: TileWindow,
    pub detections: Vec<RawDetection>,
}

/// The parts of a raster the results depend on, kept after the raster itself is closed.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RasterInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub crs: String,
}

impl RasterInfo {
    pub fn of(raster: &RasterHandle) -> Self {
        RasterInfo {
            source_path: raster.path().to_path_buf(),
            width: raster.width(),
            height: raster.height(),
            transform: raster.transform(),
            crs: raster.crs().to_string(),
        }
    }

    /// File name without directory or extension, used to name outputs.
    pub fn base_name(&self) -> String {
        base_name(&self.source_path)
    }
}

pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// One exportable feature: a polygon in the raster's CRS plus its attributes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GeoFeature {
    pub polygon: Quad,
    pub class_name: String,
    pub confidence: f32,
}

/// Everything detected in one image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageResult {
    pub raster: RasterInfo,
    /// In tile enumeration order, then in the order the model reported them within a tile.
    pub detections: Vec<Detection>,
    pub class_counts: BTreeMap<String, usize>,
    pub geometry_set: Vec<GeoFeature>,
}

impl ImageResult {
    /// Builds the counts and geographic geometry for a list of image-pixel detections.
    pub fn from_detections(raster: RasterInfo, detections: Vec<Detection>) -> Self {
        let class_counts = detections
            .iter()
            .map(|d| d.class_name.clone())
            .counts()
            .into_iter()
            .collect();
        let geometry_set = detections
            .iter()
            .map(|d| GeoFeature {
                polygon: to_geo(&d.polygon, &raster.transform),
                class_name: d.class_name.clone(),
                confidence: d.confidence,
            })
            .collect();
        ImageResult {
            raster,
            detections,
            class_counts,
            geometry_set,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.raster.source_path
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// A short human readable summary, one line per class sorted by name.
    pub fn stats_text(&self) -> String {
        let mut text = format!("[{}] statistics", self.raster.base_name());
        if self.class_counts.is_empty() {
            text.push_str("\nno objects detected");
        }
        for (class_name, count) in &self.class_counts {
            text.push_str(&format!("\n- {}: {}", class_name, count));
        }
        text
    }
}

/// Translates every tile's detections into image pixels, keeping tile order.
pub fn remap_tiles(tiles: &[TileDetections]) -> Vec<Detection> {
    tiles
        .iter()
        .flat_map(|tile| {
            tile.detections.iter().map(move |raw| {
                Detection::new(
                    raw.class_name.clone(),
                    raw.confidence,
                    to_image_pixels(raw, &tile.window),
                )
            })
        })
        .collect()
}

/// Builds the result for one image from its per-tile detections.
///
/// Duplicates from overlapping tiles are kept unless `cross_tile_nms` gives an IoU threshold,
/// in which case same-class overlaps are suppressed and the survivors keep their order.
pub fn aggregate(
    raster: RasterInfo,
    tiles: &[TileDetections],
    cross_tile_nms: Option<f32>,
) -> ImageResult {
    aggregate_detections(raster, remap_tiles(tiles), cross_tile_nms)
}

/// The aggregation step alone, for detections already in image pixels.
pub fn aggregate_detections(
    raster: RasterInfo,
    mut detections: Vec<Detection>,
    cross_tile_nms: Option<f32>,
) -> ImageResult {
    if let Some(iou_threshold) = cross_tile_nms {
        detections = suppress_keeping_order(detections, iou_threshold);
    }
    ImageResult::from_detections(raster, detections)
}
