//! Per-image output files.

pub mod detections_json;
pub mod geojson;
pub mod preview;

use crate::aggregate::ImageResult;
use crate::error::PipelineError;
use detections_json::DetectionCache;
use image::RgbImage;
use log::debug;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const DETECTIONS_SUFFIX: &str = "_detections.json";

/// Where the outputs of one image go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub geojson: PathBuf,
    pub preview: PathBuf,
    pub detections: PathBuf,
}

impl OutputPaths {
    pub fn new(output_dir: &Path, base_name: &str) -> Self {
        OutputPaths {
            dir: output_dir.to_path_buf(),
            geojson: output_dir.join(format!("{}_result.geojson", base_name)),
            preview: output_dir.join(format!("{}_vis.png", base_name)),
            detections: output_dir.join(format!("{}{}", base_name, DETECTIONS_SUFFIX)),
        }
    }
}

/// The base name a `_detections.json` file was written under.
pub fn base_name_of_cache(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(DETECTIONS_SUFFIX)
}

/// Output base names handed out during one batch.
///
/// Images from different folders can share a file stem. The first keeps it, later ones get
/// `_2`, `_3`, ... so no image overwrites another's outputs.
#[derive(Debug, Default)]
pub struct OutputNames {
    taken: HashSet<String>,
}

impl OutputNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, base_name: &str) -> String {
        let mut name = base_name.to_string();
        let mut n = 2;
        while self.taken.contains(&name) {
            name = format!("{}_{}", base_name, n);
            n += 1;
        }
        self.taken.insert(name.clone());
        name
    }

    pub fn clear(&mut self) {
        self.taken.clear();
    }
}

/// Writes every output for one image. Returns the preview path when a preview was written.
///
/// `preview_source` is the raster stretched to 8 bits; passing `None` skips the preview.
pub fn export_result(
    result: &ImageResult,
    paths: &OutputPaths,
    preview_source: Option<&RgbImage>,
) -> Result<Option<PathBuf>, PipelineError> {
    fs::create_dir_all(&paths.dir).map_err(|e| PipelineError::io(&paths.dir, e))?;
    geojson::save_geojson(result, &paths.geojson)?;
    DetectionCache::from_result(result).save(&paths.detections)?;
    debug!("Wrote {}", paths.geojson.display());
    match preview_source {
        Some(source) => {
            preview::save_preview(source, result, &paths.preview)?;
            debug!("Wrote {}", paths.preview.display());
            Ok(Some(paths.preview.clone()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::RasterInfo;
    use crate::raster::affine::GeoTransform;

    #[test]
    fn output_names_follow_base_name() {
        let paths = OutputPaths::new(Path::new("/out"), "tile_07");
        assert_eq!(paths.geojson, PathBuf::from("/out/tile_07_result.geojson"));
        assert_eq!(paths.preview, PathBuf::from("/out/tile_07_vis.png"));
        assert_eq!(paths.detections, PathBuf::from("/out/tile_07_detections.json"));
        assert_eq!(base_name_of_cache(&paths.detections), Some("tile_07"));
        assert_eq!(base_name_of_cache(Path::new("/out/tile_07.json")), None);
    }

    #[test]
    fn repeated_base_names_are_numbered() {
        let mut names = OutputNames::new();
        assert_eq!(names.claim("scene"), "scene");
        assert_eq!(names.claim("scene"), "scene_2");
        assert_eq!(names.claim("scene_2"), "scene_2_2");
        assert_eq!(names.claim("scene"), "scene_3");
        assert_eq!(names.claim("harbour"), "harbour");
        names.clear();
        assert_eq!(names.claim("scene"), "scene");
    }

    #[test]
    fn exports_empty_result() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("nested").join("out");
        let result = ImageResult::from_detections(
            RasterInfo {
                source_path: PathBuf::from("empty.png"),
                width: 8,
                height: 8,
                transform: GeoTransform::identity(),
                crs: "EPSG:3857".to_string(),
            },
            vec![],
        );
        let paths = OutputPaths::new(&out, &result.raster.base_name());
        let preview = export_result(&result, &paths, Some(&RgbImage::new(8, 8))).unwrap();
        assert_eq!(preview, Some(out.join("empty_vis.png")));
        assert!(out.join("empty_result.geojson").is_file());
        assert!(out.join("empty_detections.json").is_file());

        assert_eq!(export_result(&result, &paths, None).unwrap(), None);
    }
}
