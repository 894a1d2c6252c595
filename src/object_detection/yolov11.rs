use crate::annotations::bounding_box::BoundingBox;
use crate::annotations::detection::Shape;
use crate::annotations::point::Point;
use crate::annotations::polygon::Quad;
use crate::error::InferenceError;
use crate::image_utils::padding::letterbox;
use crate::object_detection::object_detection_model::{
    ModelOutput, ObjectDetectionModel, ScoredShape, Thresholds,
};
use crate::object_detection::object_detection_utils::non_maximum_suppression;
use crate::object_detection::ort_inference_session::OrtInferenceSession;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Ix2, s};
use ort::inputs;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which head the exported YOLO11 model has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YoloTask {
    /// Axis-aligned boxes: rows are cx, cy, w, h, then one score per class.
    Detect,
    /// Oriented boxes: as above followed by the rotation angle in radians.
    Obb,
}

impl YoloTask {
    /// Guesses the head from a model file name, the way exported weights are usually named
    /// (`yolo11n-obb.onnx`).
    pub fn infer_from_path(model_path: &Path) -> YoloTask {
        let stem = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem.contains("obb") {
            YoloTask::Obb
        } else {
            YoloTask::Detect
        }
    }
}

impl FromStr for YoloTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detect" => Ok(YoloTask::Detect),
            "obb" => Ok(YoloTask::Obb),
            other => Err(format!("unknown YOLO task {:?} (expected detect or obb)", other)),
        }
    }
}

impl fmt::Display for YoloTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YoloTask::Detect => write!(f, "detect"),
            YoloTask::Obb => write!(f, "obb"),
        }
    }
}

pub struct Yolov11 {
    ort_session: OrtInferenceSession,
    class_names: Vec<String>,
    input_size: u32,
    task: YoloTask,
    model_name: String,
}

impl Yolov11 {
    pub fn new(
        model_path: &Path,
        class_names: Vec<String>,
        input_size: u32,
        task: YoloTask,
        model_name: String,
    ) -> Result<Self, InferenceError> {
        let ort_session = OrtInferenceSession::new(model_path)?;
        Ok(Yolov11 {
            ort_session,
            class_names,
            input_size,
            task,
            model_name,
        })
    }

    pub fn task(&self) -> YoloTask {
        self.task
    }

    /// Runs the session and returns its first output as (anchors, channels).
    fn forward(&mut self, tile: ArrayView3<f32>) -> Result<(Array2<f32>, f64), InferenceError> {
        let letterboxed = letterbox(tile, self.input_size);
        let session = &mut self.ort_session;
        let outputs = session.session.run(inputs![
            session.input_name.as_str() => TensorRef::from_array_view(&letterboxed.tensor)?
        ])?;
        let output = outputs[session.output_name.as_str()].try_extract_array::<f32>()?;
        let shape: Vec<i64> = output.shape().iter().map(|&d| d as i64).collect();
        if output.ndim() != 3 || output.shape()[0] != 1 {
            return Err(InferenceError::OutputShape {
                shape,
                reason: "expected [1, channels, anchors]".to_string(),
            });
        }
        // (1, channels, anchors) -> (anchors, channels)
        let rows = output
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| InferenceError::OutputShape {
                shape: shape.clone(),
                reason: e.to_string(),
            })?
            .t()
            .to_owned();
        Ok((rows, letterboxed.scale))
    }
}

/// Decodes raw YOLO11 rows into shapes in tile pixels.
///
/// `rows` is (anchors, channels) in letterboxed model pixels; `scale` is the letterbox scale.
/// Axis-aligned boxes are clipped to the tile. Survivors of per-class NMS come back sorted by
/// descending confidence.
pub fn decode_output(
    rows: ArrayView2<f32>,
    task: YoloTask,
    scale: f64,
    tile_width: usize,
    tile_height: usize,
    thresholds: Thresholds,
) -> Result<ModelOutput, InferenceError> {
    let channels = rows.shape()[1];
    let extra = match task {
        YoloTask::Detect => 0,
        YoloTask::Obb => 1,
    };
    if channels < 5 + extra {
        return Err(InferenceError::OutputShape {
            shape: rows.shape().iter().map(|&d| d as i64).collect(),
            reason: format!("too few channels for a {} head", task),
        });
    }
    let num_classes = channels - 4 - extra;
    let mut shapes: Vec<ScoredShape> = Vec::new();
    for row in rows.axis_iter(Axis(0)) {
        let (class_id, prob) = row
            .slice(s![4..4 + num_classes])
            .iter()
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
            .unwrap_or((0, 0.0));
        if prob < thresholds.confidence {
            continue;
        }
        let (x, y, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let shape = match task {
            YoloTask::Detect => {
                let bbox = match BoundingBox::new(
                    (x - w / 2.0) / scale,
                    (y - h / 2.0) / scale,
                    (x + w / 2.0) / scale,
                    (y + h / 2.0) / scale,
                ) {
                    Ok(b) => b.clip(tile_width as f64, tile_height as f64),
                    Err(_) => continue,
                };
                Shape::AxisAligned {
                    min: Point::new(bbox.left(), bbox.top()),
                    max: Point::new(bbox.right(), bbox.bottom()),
                }
            }
            YoloTask::Obb => {
                let angle = row[4 + num_classes] as f64;
                Shape::Oriented(Quad::from_rotated_box(x, y, w, h, angle).scale(1.0 / scale))
            }
        };
        shapes.push(ScoredShape {
            shape,
            confidence: prob,
            class_id,
        });
    }
    let kept = non_maximum_suppression(shapes, thresholds.iou);
    Ok(match task {
        YoloTask::Detect => ModelOutput {
            oriented: vec![],
            axis_aligned: kept,
        },
        YoloTask::Obb => ModelOutput {
            oriented: kept,
            axis_aligned: vec![],
        },
    })
}

impl ObjectDetectionModel for Yolov11 {
    fn run_inference(
        &mut self,
        tile: ArrayView3<f32>,
        thresholds: Thresholds,
    ) -> Result<ModelOutput, InferenceError> {
        let (tile_height, tile_width, channels) = tile.dim();
        if channels != 3 || tile_width == 0 || tile_height == 0 {
            return Err(InferenceError::Input(format!(
                "expected a non-empty (h, w, 3) tile, got {:?}",
                tile.dim()
            )));
        }
        let (rows, scale) = self.forward(tile)?;
        decode_output(rows.view(), self.task, scale, tile_width, tile_height, thresholds)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    const THRESHOLDS: Thresholds = Thresholds {
        confidence: 0.25,
        iou: 0.45,
    };

    #[test]
    fn task_from_file_name() {
        assert_eq!(YoloTask::infer_from_path(Path::new("models/yolo11n-obb.onnx")), YoloTask::Obb);
        assert_eq!(YoloTask::infer_from_path(Path::new("models/yolo11s.onnx")), YoloTask::Detect);
        assert_eq!("OBB".parse::<YoloTask>(), Ok(YoloTask::Obb));
        assert!("segment".parse::<YoloTask>().is_err());
    }

    #[test]
    fn decodes_detect_rows() {
        // 3 anchors, 2 classes.
        let rows = Array2::from_shape_vec(
            (3, 6),
            vec![
                100.0, 50.0, 20.0, 10.0, 0.1, 0.9, // class 1
                300.0, 300.0, 40.0, 40.0, 0.2, 0.1, // below threshold
                102.0, 51.0, 20.0, 10.0, 0.1, 0.6, // duplicate of the first
            ],
        )
        .unwrap();
        let out = decode_output(rows.view(), YoloTask::Detect, 2.0, 320, 320, THRESHOLDS).unwrap();
        assert!(out.oriented.is_empty());
        assert_eq!(out.axis_aligned.len(), 1);
        let det = out.axis_aligned[0];
        assert_eq!(det.class_id, 1);
        assert_abs_diff_eq!(det.confidence, 0.9);
        match det.shape {
            Shape::AxisAligned { min, max } => {
                assert_abs_diff_eq!(min.x, 45.0);
                assert_abs_diff_eq!(min.y, 22.5);
                assert_abs_diff_eq!(max.x, 55.0);
                assert_abs_diff_eq!(max.y, 27.5);
            }
            _ => panic!("expected an axis-aligned box"),
        }
    }

    #[test]
    fn detect_boxes_are_clipped_to_tile() {
        let rows = Array2::from_shape_vec((1, 5), vec![5.0, 5.0, 20.0, 20.0, 0.8]).unwrap();
        let out = decode_output(rows.view(), YoloTask::Detect, 1.0, 100, 100, THRESHOLDS).unwrap();
        match out.axis_aligned[0].shape {
            Shape::AxisAligned { min, max } => {
                assert_eq!((min.x, min.y), (0.0, 0.0));
                assert_eq!((max.x, max.y), (15.0, 15.0));
            }
            _ => panic!("expected an axis-aligned box"),
        }
    }

    #[test]
    fn decodes_obb_rows() {
        // 1 anchor, 1 class, angle 0.
        let rows = Array2::from_shape_vec((1, 6), vec![64.0, 32.0, 40.0, 20.0, 0.7, 0.0]).unwrap();
        let out = decode_output(rows.view(), YoloTask::Obb, 0.5, 640, 640, THRESHOLDS).unwrap();
        assert!(out.axis_aligned.is_empty());
        match out.oriented[0].shape {
            Shape::Oriented(quad) => {
                let bbox = quad.bounding_box();
                assert_abs_diff_eq!(bbox.left(), 88.0, epsilon = 1e-9);
                assert_abs_diff_eq!(bbox.top(), 44.0, epsilon = 1e-9);
                assert_abs_diff_eq!(bbox.right(), 168.0, epsilon = 1e-9);
                assert_abs_diff_eq!(bbox.bottom(), 84.0, epsilon = 1e-9);
            }
            _ => panic!("expected an oriented box"),
        }
    }

    #[test]
    fn too_few_channels_is_an_error() {
        let rows = Array2::<f32>::zeros((2, 5));
        assert!(matches!(
            decode_output(rows.view(), YoloTask::Obb, 1.0, 10, 10, THRESHOLDS),
            Err(InferenceError::OutputShape { .. })
        ));
    }
}
