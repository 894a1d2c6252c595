//! Caller-side state: the queue of images and the results received so far.
//!
//! The worker never touches a session. Results enter the registry only when the caller applies
//! the [`BatchEvent::Result`] that carries them, so nothing here needs a lock.

use crate::aggregate::ImageResult;
use crate::annotations::detection::Detection;
use crate::batch::events::BatchEvent;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// File extensions picked up when a folder is queued.
pub const RASTER_EXTENSIONS: [&str; 5] = ["tif", "tiff", "jpg", "jpeg", "png"];

pub fn is_raster_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RASTER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Default)]
pub struct BatchSession {
    queue: Vec<PathBuf>,
    queued: BTreeSet<PathBuf>,
    results: BTreeMap<PathBuf, Arc<ImageResult>>,
    class_filter: Option<String>,
}

impl BatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one image. Returns false if it was already queued.
    pub fn add_image(&mut self, path: PathBuf) -> bool {
        if self.queued.contains(&path) {
            return false;
        }
        self.queued.insert(path.clone());
        self.queue.push(path);
        true
    }

    /// Queues every raster under `dir`, in sorted order. Returns how many were added.
    pub fn add_folder(&mut self, dir: &Path) -> Result<usize, walkdir::Error> {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry?;
            if entry.file_type().is_file() && is_raster_file(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        Ok(found.into_iter().filter(|p| self.add_image(p.clone())).count())
    }

    pub fn images(&self) -> &[PathBuf] {
        &self.queue
    }

    /// Empties the queue and forgets every result.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.results.clear();
    }

    /// Records what a batch event carries. Only result events change the session.
    pub fn apply(&mut self, event: &BatchEvent) {
        if let BatchEvent::Result(report) = event {
            self.results
                .insert(report.image_path.clone(), Arc::clone(&report.result));
        }
    }

    pub fn result(&self, image_path: &Path) -> Option<&Arc<ImageResult>> {
        self.results.get(image_path)
    }

    pub fn results(&self) -> impl Iterator<Item = (&PathBuf, &Arc<ImageResult>)> {
        self.results.iter()
    }

    pub fn set_class_filter(&mut self, class_name: Option<String>) {
        self.class_filter = class_name;
    }

    /// Detections of one image that pass the current class filter.
    pub fn visible_detections(&self, image_path: &Path) -> Vec<&Detection> {
        match self.results.get(image_path) {
            Some(result) => result
                .detections
                .iter()
                .filter(|d| {
                    self.class_filter
                        .as_ref()
                        .is_none_or(|class| &d.class_name == class)
                })
                .collect(),
            None => vec![],
        }
    }
}
