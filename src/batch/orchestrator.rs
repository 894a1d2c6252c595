//! The batch worker.
//!
//! One image at a time, one tile at a time. Every per-image error is caught at the image
//! boundary and reported as an event; only a bad configuration stops a batch, and that is
//! checked before the worker starts.

use crate::aggregate::{RasterInfo, TileDetections, aggregate_detections, remap_tiles};
use crate::batch::events::{BatchEvent, BatchSummary, ImageReport, ImageStage};
use crate::batch::progress::{BatchProgress, ResourceMonitor};
use crate::config::BatchConfig;
use crate::error::{ConfigError, PipelineError};
use crate::export::{OutputNames, OutputPaths, export_result};
use crate::image_utils::tiling::plan_tiles;
use crate::object_detection::object_detection_model::{DetectorAdapter, ObjectDetectionModel};
use crate::raster::RasterHandle;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub struct BatchOrchestrator<M: ObjectDetectionModel> {
    adapter: DetectorAdapter<M>,
    config: BatchConfig,
    events: Sender<BatchEvent>,
    cancel: Arc<AtomicBool>,
    monitor: ResourceMonitor,
    output_names: OutputNames,
}

impl<M: ObjectDetectionModel> BatchOrchestrator<M> {
    /// Fails with a [`ConfigError`] before anything is opened or any event is sent.
    pub fn new(
        model: M,
        config: BatchConfig,
        events: Sender<BatchEvent>,
    ) -> Result<Self, ConfigError> {
        Self::with_cancel_flag(model, config, events, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`BatchOrchestrator::new`], stopping when the caller's flag is set.
    pub fn with_cancel_flag(
        model: M,
        config: BatchConfig,
        events: Sender<BatchEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(BatchOrchestrator {
            adapter: DetectorAdapter::new(model),
            config,
            events,
            cancel,
            monitor: ResourceMonitor::new(),
            output_names: OutputNames::new(),
        })
    }

    /// Setting the flag stops the batch at the next tile or image boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn emit(&self, event: BatchEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn log(&self, text: String) {
        self.emit(BatchEvent::Log(text));
    }

    fn emit_progress(&mut self, progress: &mut BatchProgress) {
        let usage = self.monitor.sample().to_string();
        self.emit(BatchEvent::Progress(progress.snapshot(usage)));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Processes every image in order and sends [`BatchEvent::Finished`] exactly once.
    pub fn run(&mut self, images: &[PathBuf]) -> BatchSummary {
        let started = Instant::now();
        let mut progress = BatchProgress::new(images.len());
        let mut summary = BatchSummary {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            cancelled: false,
            elapsed: Default::default(),
        };
        info!(
            "Starting batch of {} image(s) with {}",
            images.len(),
            self.adapter.model().model_name()
        );
        self.log(format!("Starting batch of {} image(s)", images.len()));
        self.output_names.clear();

        for (index, path) in images.iter().enumerate() {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.attempted += 1;
            progress.start_image(index);
            self.log(format!(
                "[{}/{}] Processing {}",
                index + 1,
                images.len(),
                path.display()
            ));
            self.emit_progress(&mut progress);

            let mut stage = ImageStage::Opening;
            match self.process_image(path, &mut stage, &mut progress) {
                Ok(report) => {
                    summary.succeeded += 1;
                    info!("Finished {}", path.display());
                    self.log(report.stats_text.clone());
                    self.emit(BatchEvent::Result(report));
                }
                Err(err) => {
                    summary.failed += 1;
                    let cancelled = matches!(err, PipelineError::Cancelled);
                    let error = if cancelled {
                        "cancelled".to_string()
                    } else {
                        err.to_string()
                    };
                    warn!("Failed {} while {}: {}", path.display(), stage, error);
                    self.log(format!("Failed {}: {}", path.display(), error));
                    self.emit(BatchEvent::ImageFailed {
                        image_path: path.clone(),
                        stage,
                        error,
                    });
                    if cancelled {
                        summary.cancelled = true;
                        break;
                    }
                }
            }
            progress.finish_image();
            self.emit_progress(&mut progress);
        }

        summary.elapsed = started.elapsed();
        info!("{}", summary);
        self.emit(BatchEvent::Finished(summary.clone()));
        summary
    }

    fn enter(&self, stage: &mut ImageStage, next: ImageStage, path: &Path) {
        debug!("{}: {} -> {}", path.display(), stage, next);
        *stage = next;
    }

    fn process_image(
        &mut self,
        path: &Path,
        stage: &mut ImageStage,
        progress: &mut BatchProgress,
    ) -> Result<ImageReport, PipelineError> {
        let raster = RasterHandle::open(path)?;

        self.enter(stage, ImageStage::Planning, path);
        let plan = plan_tiles(raster.width(), raster.height(), &self.config.tiling_parameters())
            .map_err(|e| PipelineError::format(e.to_string()))?;
        debug!(
            "{}: {} tile(s) ({:?}) for {}x{}",
            path.display(),
            plan.len(),
            plan.mode,
            raster.width(),
            raster.height()
        );
        progress.set_tile_count(plan.len());

        let thresholds = self.config.thresholds();
        let mut tiles = Vec::with_capacity(plan.len());
        for (i, window) in plan.tiles.iter().enumerate() {
            if self.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.enter(
                stage,
                ImageStage::Scoring {
                    tile: i + 1,
                    of: plan.len(),
                },
                path,
            );
            let pixels = raster.read_window_normalized(window);
            let detections = self.adapter.score(pixels.view(), thresholds)?;
            debug!(
                "{}: tile at ({}, {}) gave {} detection(s)",
                path.display(),
                window.origin_x,
                window.origin_y,
                detections.len()
            );
            tiles.push(TileDetections {
                window: *window,
                detections,
            });
            progress.complete_tile();
            self.emit_progress(progress);
        }

        self.enter(stage, ImageStage::Remapping, path);
        let detections = remap_tiles(&tiles);

        self.enter(stage, ImageStage::Aggregating, path);
        let result = aggregate_detections(RasterInfo::of(&raster), detections, self.config.cross_tile_nms);

        self.enter(stage, ImageStage::Exporting, path);
        let preview_source = self.config.write_preview.then(|| raster.to_rgb8());
        raster.close();
        let base_name = result.raster.base_name();
        let output_name = self.output_names.claim(&base_name);
        if output_name != base_name {
            warn!(
                "{}: outputs for {:?} already written in this batch, using {:?}",
                path.display(),
                base_name,
                output_name
            );
            self.log(format!("Writing {} outputs as {}", path.display(), output_name));
        }
        let paths = OutputPaths::new(&self.config.output_dir, &output_name);
        let preview_path = export_result(&result, &paths, preview_source.as_ref())?;

        self.enter(stage, ImageStage::Done, path);
        Ok(ImageReport {
            image_path: path.to_path_buf(),
            geojson_path: paths.geojson,
            preview_path,
            stats_text: result.stats_text(),
            result: Arc::new(result),
        })
    }
}

/// A batch running on its own thread.
pub struct BatchHandle {
    pub events: Receiver<BatchEvent>,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Waits for the worker. `None` if it panicked.
    pub fn join(self) -> Option<BatchSummary> {
        match self.worker.join() {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Batch worker panicked: {:?}", e);
                None
            }
        }
    }
}

/// Validates the configuration and starts the batch on a background thread.
pub fn spawn_batch<M: ObjectDetectionModel + 'static>(
    model: M,
    config: BatchConfig,
    images: Vec<PathBuf>,
) -> Result<BatchHandle, ConfigError> {
    let (sender, receiver) = unbounded();
    let mut orchestrator = BatchOrchestrator::new(model, config, sender)?;
    let cancel = orchestrator.cancel_flag();
    let worker = thread::spawn(move || orchestrator.run(&images));
    Ok(BatchHandle {
        events: receiver,
        cancel,
        worker,
    })
}
