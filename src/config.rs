use crate::error::ConfigError;
use crate::image_utils::tiling::{
    DEFAULT_SMALL_IMAGE_THRESHOLD, DEFAULT_STRIDE, DEFAULT_TILE_SIZE, TilingParameters,
};
use crate::object_detection::object_detection_model::Thresholds;
use crate::object_detection::object_detection_utils::read_classes_txt_file;
use crate::object_detection::yolov11::YoloTask;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_THRESHOLD: f32 = 0.01;
pub const MAX_THRESHOLD: f32 = 1.0;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INPUT_SIZE: u32 = 640;

fn default_confidence_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_overlap_threshold() -> f32 {
    DEFAULT_OVERLAP_THRESHOLD
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_stride() -> u32 {
    DEFAULT_STRIDE
}

fn default_small_image_threshold() -> u32 {
    DEFAULT_SMALL_IMAGE_THRESHOLD
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

fn default_write_preview() -> bool {
    true
}

/// Settings for one batch run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BatchConfig {
    pub model_path: PathBuf,
    /// One class name per line. Defaults to a `.txt` file next to the model.
    #[serde(default)]
    pub classes_path: Option<PathBuf>,
    /// Model head. Inferred from the model file name when absent.
    #[serde(default)]
    pub task: Option<YoloTask>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_stride")]
    pub stride: u32,
    #[serde(default = "default_small_image_threshold")]
    pub small_image_threshold: u32,
    /// Side of the square model input.
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    pub output_dir: PathBuf,
    #[serde(default = "default_write_preview")]
    pub write_preview: bool,
    /// IoU threshold for suppressing duplicates across tiles. Off when `None`.
    #[serde(default)]
    pub cross_tile_nms: Option<f32>,
}

impl BatchConfig {
    pub fn new(model_path: PathBuf, output_dir: PathBuf) -> Self {
        BatchConfig {
            model_path,
            classes_path: None,
            task: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            tile_size: DEFAULT_TILE_SIZE,
            stride: DEFAULT_STRIDE,
            small_image_threshold: DEFAULT_SMALL_IMAGE_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            output_dir,
            write_preview: true,
            cross_tile_nms: None,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))
    }

    /// Checks every setting that would make the whole batch impossible to run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("confidence_threshold", self.confidence_threshold)?;
        check_threshold("overlap_threshold", self.overlap_threshold)?;
        if let Some(iou) = self.cross_tile_nms {
            check_threshold("cross_tile_nms", iou)?;
        }
        check_positive("tile_size", self.tile_size)?;
        check_positive("stride", self.stride)?;
        check_positive("input_size", self.input_size)?;
        Ok(())
    }

    /// Fails if the model file is not there.
    pub fn check_model_file(&self) -> Result<(), ConfigError> {
        if self.model_path.is_file() {
            Ok(())
        } else {
            Err(ConfigError::MissingModel(self.model_path.clone()))
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence_threshold,
            iou: self.overlap_threshold,
        }
    }

    pub fn tiling_parameters(&self) -> TilingParameters {
        TilingParameters {
            tile_size: self.tile_size,
            stride: self.stride,
            small_image_threshold: self.small_image_threshold,
        }
    }

    pub fn resolved_task(&self) -> YoloTask {
        self.task
            .unwrap_or_else(|| YoloTask::infer_from_path(&self.model_path))
    }

    /// Class names from `classes_path`, or from `<model>.txt` if it exists.
    ///
    /// With neither, the list is empty and detections are labelled with their class id.
    pub fn resolve_class_names(&self) -> Result<Vec<String>, ConfigError> {
        let path = match &self.classes_path {
            Some(path) => path.clone(),
            None => {
                let sidecar = self.model_path.with_extension("txt");
                if !sidecar.is_file() {
                    warn!(
                        "No class names for {}, labelling detections by class id",
                        self.model_path.display()
                    );
                    return Ok(vec![]);
                }
                sidecar
            }
        };
        read_classes_txt_file(&path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))
    }

    pub fn model_name(&self) -> String {
        self.model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.model_path.display().to_string())
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value as f64,
            min: MIN_THRESHOLD as f64,
            max: MAX_THRESHOLD as f64,
        })
    }
}

fn check_positive(name: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive {
            name,
            value: value as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BatchConfig {
        BatchConfig::new(PathBuf::from("models/yolo11n-obb.onnx"), PathBuf::from("out"))
    }

    #[test]
    fn defaults_are_valid() {
        let config = base_config();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.tiling_parameters(), TilingParameters::default());
        assert_eq!(config.thresholds().confidence, 0.25);
        assert_eq!(config.thresholds().iou, 0.45);
    }

    #[test]
    fn thresholds_outside_range_are_rejected() {
        for bad in [0.0, 0.005, 1.01, f32::NAN] {
            let mut config = base_config();
            config.confidence_threshold = bad;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::OutOfRange { name: "confidence_threshold", .. })
            ));
        }
        let mut config = base_config();
        config.overlap_threshold = 1.0;
        config.cross_tile_nms = Some(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { name: "cross_tile_nms", .. })
        ));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = base_config();
        config.stride = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "stride", value: 0 })
        );
        let mut config = base_config();
        config.tile_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_fills_in_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        fs::write(
            &path,
            r#"{"model_path": "m/yolo11s.onnx", "output_dir": "results", "stride": 400, "task": "obb"}"#,
        )
        .unwrap();
        let config = BatchConfig::from_json_file(&path).unwrap();
        assert_eq!(config.stride, 400);
        assert_eq!(config.tile_size, 640);
        assert_eq!(config.resolved_task(), YoloTask::Obb);
        assert!(config.write_preview);
        assert_eq!(config.cross_tile_nms, None);
    }

    #[test]
    fn task_is_inferred_from_model_name() {
        assert_eq!(base_config().resolved_task(), YoloTask::Obb);
        let detect = BatchConfig::new(PathBuf::from("yolo11x.onnx"), PathBuf::from("out"));
        assert_eq!(detect.resolved_task(), YoloTask::Detect);
    }

    #[test]
    fn class_names_from_model_sidecar() {
        let dir = tempfile::TempDir::new().unwrap();
        let model = dir.path().join("dota.onnx");
        fs::write(&model, b"not a real model").unwrap();
        fs::write(dir.path().join("dota.txt"), "plane\nship\n").unwrap();
        let config = BatchConfig::new(model, dir.path().join("out"));
        assert_eq!(config.check_model_file(), Ok(()));
        assert_eq!(config.resolve_class_names().unwrap(), vec!["plane", "ship"]);
    }

    #[test]
    fn missing_model_is_reported() {
        let config = BatchConfig::new(PathBuf::from("/nonexistent/model.onnx"), PathBuf::from("out"));
        assert!(matches!(config.check_model_file(), Err(ConfigError::MissingModel(_))));
        assert_eq!(config.resolve_class_names().unwrap(), Vec::<String>::new());
    }
}
