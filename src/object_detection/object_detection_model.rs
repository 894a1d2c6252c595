use crate::annotations::detection::{RawDetection, Shape};
use crate::error::InferenceError;
use log::debug;
use ndarray::ArrayView3;

/// Thresholds handed to the model for each tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    /// IoU above which the model's own non-maximum suppression drops a detection.
    pub iou: f32,
}

/// One scored shape as the model reports it, before class names are attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredShape {
    pub shape: Shape,
    pub confidence: f32,
    pub class_id: usize,
}

/// Everything a model produced for one tile.
///
/// Models report through one of two heads. The lists are kept apart so the adapter decides
/// which one counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub oriented: Vec<ScoredShape>,
    pub axis_aligned: Vec<ScoredShape>,
}

/// Defines a trait that all object detection models must follow.
///
/// The model is a scoring function: it takes a tile of pixels and returns the shapes it found.
/// It is never asked about tile positions or georeferencing, so any backend that can score an
/// image can be swapped in.
pub trait ObjectDetectionModel: Send {
    /// The tile is a (height, width, 3) array of RGB values in [0, 1]. Coordinates in the
    /// output are pixels of that tile.
    fn run_inference(
        &mut self,
        tile: ArrayView3<f32>,
        thresholds: Thresholds,
    ) -> Result<ModelOutput, InferenceError>;

    /// Maps class ids to names.
    fn class_names(&self) -> &[String];

    fn model_name(&self) -> &str;
}

impl<M: ObjectDetectionModel + ?Sized> ObjectDetectionModel for Box<M> {
    fn run_inference(
        &mut self,
        tile: ArrayView3<f32>,
        thresholds: Thresholds,
    ) -> Result<ModelOutput, InferenceError> {
        (**self).run_inference(tile, thresholds)
    }

    fn class_names(&self) -> &[String] {
        (**self).class_names()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Turns model output into [`RawDetection`]s for one tile.
pub struct DetectorAdapter<M: ObjectDetectionModel> {
    model: M,
}

impl<M: ObjectDetectionModel> DetectorAdapter<M> {
    pub fn new(model: M) -> Self {
        DetectorAdapter { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn class_name(&self, class_id: usize) -> String {
        match self.model.class_names().get(class_id) {
            Some(name) => name.clone(),
            None => class_id.to_string(),
        }
    }

    /// Scores one tile.
    ///
    /// If the model reports oriented boxes, those are used and any axis-aligned boxes for the
    /// same tile are dropped. Detections keep the order the model emitted them in.
    pub fn score(
        &mut self,
        tile: ArrayView3<f32>,
        thresholds: Thresholds,
    ) -> Result<Vec<RawDetection>, InferenceError> {
        let output = self.model.run_inference(tile, thresholds)?;
        let chosen = if !output.oriented.is_empty() {
            if !output.axis_aligned.is_empty() {
                debug!(
                    "Ignoring {} axis-aligned detections in favour of {} oriented ones",
                    output.axis_aligned.len(),
                    output.oriented.len()
                );
            }
            output.oriented
        } else {
            output.axis_aligned
        };
        Ok(chosen
            .into_iter()
            .map(|scored| RawDetection {
                shape: scored.shape,
                confidence: scored.confidence,
                class_id: scored.class_id,
                class_name: self.class_name(scored.class_id),
            })
            .collect())
    }
}
