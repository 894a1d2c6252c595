use crate::aggregate::ImageResult;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where processing of one image has got to.
///
/// A failed image keeps the stage it failed in; [`BatchEvent::ImageFailed`] carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStage {
    Opening,
    Planning,
    Scoring { tile: usize, of: usize },
    Remapping,
    Aggregating,
    Exporting,
    Done,
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageStage::Opening => write!(f, "opening"),
            ImageStage::Planning => write!(f, "planning"),
            ImageStage::Scoring { tile, of } => write!(f, "scoring tile {}/{}", tile, of),
            ImageStage::Remapping => write!(f, "remapping"),
            ImageStage::Aggregating => write!(f, "aggregating"),
            ImageStage::Exporting => write!(f, "exporting"),
            ImageStage::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Whole batch, 0 to 100.
    pub percent: u8,
    /// Time left on the current image as `MM:SS`, followed by `(File i/N)`.
    pub eta: String,
    pub resource_usage: String,
}

/// A finished image.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub image_path: PathBuf,
    pub geojson_path: PathBuf,
    pub preview_path: Option<PathBuf>,
    pub stats_text: String,
    pub result: Arc<ImageResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch {}: {} image(s) attempted, {} succeeded, {} failed in {:.1} s",
            if self.cancelled { "cancelled" } else { "finished" },
            self.attempted,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}

/// What the worker tells the caller, in order.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Log(String),
    Progress(ProgressSnapshot),
    Result(ImageReport),
    ImageFailed {
        image_path: PathBuf,
        stage: ImageStage,
        error: String,
    },
    /// Always the last event of a batch, sent exactly once.
    Finished(BatchSummary),
}
