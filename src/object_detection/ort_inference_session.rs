use crate::error::InferenceError;
use log::debug;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use std::path::Path;

/// An onnxruntime session plus the names of the tensors detection models read and write.
///
/// Exported detectors have a single image input and report through their first output.
pub struct OrtInferenceSession {
    pub session: Session,
    pub input_name: String,
    pub output_name: String,
}

impl OrtInferenceSession {
    pub fn new(model_path: &Path) -> Result<Self, InferenceError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| InferenceError::Backend("model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| InferenceError::Backend("model has no outputs".to_string()))?;
        debug!(
            "Loaded {} (input {:?}, output {:?})",
            model_path.display(),
            input_name,
            output_name
        );
        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}
