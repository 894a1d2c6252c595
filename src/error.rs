use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures of the scoring function or its runtime.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("onnxruntime error: {0}")]
    Session(#[from] ort::Error),

    #[error("unexpected model output shape {shape:?}: {reason}")]
    OutputShape { shape: Vec<i64>, reason: String },

    #[error("invalid model input: {0}")]
    Input(String),

    #[error("detector failed: {0}")]
    Backend(String),
}

/// Settings that make a whole batch impossible to run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [{min}, {max}] (got {value})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{name} must be positive (got {value})")]
    NotPositive { name: &'static str, value: i64 },

    #[error("model file does not exist or cannot be read: {0}")]
    MissingModel(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end the processing of one image.
///
/// None of these abort a batch: the orchestrator reports them and moves on to the next image.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format error: {0}")]
    Format(String),

    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("processing cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        PipelineError::Format(message.into())
    }

    /// Reading or writing `path` as JSON failed. Failures of the underlying reader or writer,
    /// such as a full disk, stay I/O errors; malformed content is a format error.
    pub fn json(path: &Path, err: serde_json::Error) -> Self {
        if err.is_io() {
            PipelineError::io(path, err.into())
        } else {
            PipelineError::format(format!("{}: {}", path.display(), err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_write_failure_is_io_error() {
        let err = serde_json::to_writer(FullDisk, &vec![1, 2, 3]).unwrap_err();
        match PipelineError::json(Path::new("/out/scene_result.geojson"), err) {
            PipelineError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("/out/scene_result.geojson"));
                assert_eq!(source.kind(), io::ErrorKind::Other);
            }
            other => panic!("expected an I/O error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_format_error() {
        let err = serde_json::from_str::<Vec<u32>>("[1, 2,").unwrap_err();
        let err = PipelineError::json(Path::new("scene_detections.json"), err);
        assert!(matches!(err, PipelineError::Format(ref m) if m.starts_with("scene_detections.json")));
    }
}
