//! Cache of image-pixel detections.
//!
//! Geographic outputs are derived data: the cache keeps the pixel polygons together with the
//! transform and CRS, so GeoJSON and previews can be rebuilt without running the model again.

use crate::aggregate::{ImageResult, RasterInfo};
use crate::annotations::detection::Detection;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectionCache {
    pub raster: RasterInfo,
    pub detections: Vec<Detection>,
}

impl DetectionCache {
    pub fn from_result(result: &ImageResult) -> Self {
        DetectionCache {
            raster: result.raster.clone(),
            detections: result.detections.clone(),
        }
    }

    /// Rebuilds counts and geographic geometry from the cached pixel polygons.
    pub fn into_result(self) -> ImageResult {
        ImageResult::from_detections(self.raster, self.detections)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| PipelineError::json(path, e))?;
        writer.flush().map_err(|e| PipelineError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| PipelineError::json(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::point::Point;
    use crate::annotations::polygon::Quad;
    use crate::raster::affine::GeoTransform;
    use std::path::PathBuf;

    #[test]
    fn regenerated_result_matches_original() {
        let raster = RasterInfo {
            source_path: PathBuf::from("/imagery/field.tif"),
            width: 2000,
            height: 2000,
            transform: GeoTransform::new(0.5, 0.0, 500000.0, 0.0, -0.5, 4200000.0),
            crs: "EPSG:32633".to_string(),
        };
        let detections = vec![
            Detection::new(
                "tank".to_string(),
                0.66,
                Quad::from_rotated_box(1200.0, 800.0, 30.0, 12.0, 0.4),
            ),
            Detection::new(
                "tank".to_string(),
                0.31,
                Quad::from_corners(Point::new(5.0, 5.0), Point::new(9.0, 12.0)),
            ),
        ];
        let original = ImageResult::from_detections(raster, detections);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("field_detections.json");
        DetectionCache::from_result(&original).save(&path).unwrap();
        let regenerated = DetectionCache::load(&path).unwrap().into_result();

        assert_eq!(regenerated.class_counts, original.class_counts);
        assert_eq!(regenerated.detections.len(), 2);
        for (a, b) in regenerated.geometry_set.iter().zip(&original.geometry_set) {
            for (p, q) in a.polygon.points().iter().zip(b.polygon.points()) {
                assert!((p.x - q.x).abs() < 1e-6 && (p.y - q.y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn malformed_cache_is_format_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(DetectionCache::load(&path), Err(PipelineError::Format(_))));
        assert!(matches!(
            DetectionCache::load(&dir.path().join("missing.json")),
            Err(PipelineError::Io { .. })
        ));
    }
}
