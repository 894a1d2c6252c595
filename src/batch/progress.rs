//! Batch progress, ETA and resource usage.

use crate::batch::events::ProgressSnapshot;
use std::fmt;
use std::time::{Duration, Instant};
use sysinfo::System;

pub const ETA_PLACEHOLDER: &str = "--:--";

/// How often CPU and memory readings are refreshed.
const RESOURCE_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Overall batch progress for image `image_index` (0-based) of `total_images`, with
/// `tiles_completed` of `tiles_total` tiles of that image done.
///
/// `floor(100 * (i + c / t) / N)`, computed in integers so tile counts that do not divide
/// evenly never round up early.
pub fn overall_percent(
    image_index: usize,
    tiles_completed: usize,
    tiles_total: usize,
    total_images: usize,
) -> u8 {
    if total_images == 0 {
        return 100;
    }
    let (c, t) = if tiles_total == 0 {
        (0, 1)
    } else {
        (tiles_completed.min(tiles_total), tiles_total)
    };
    let numerator = 100 * (image_index as u128 * t as u128 + c as u128);
    let percent = numerator / (total_images as u128 * t as u128);
    percent.min(100) as u8
}

/// Linear extrapolation of the time left on one image. `None` until a tile has finished.
pub fn estimate_remaining(elapsed: Duration, completed: usize, total: usize) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed) as u32;
    Some(elapsed / completed as u32 * remaining)
}

/// `MM:SS`. Minutes keep counting past an hour.
pub fn format_eta(remaining: Option<Duration>) -> String {
    match remaining {
        Some(d) => {
            let secs = d.as_secs();
            format!("{:02}:{:02}", secs / 60, secs % 60)
        }
        None => ETA_PLACEHOLDER.to_string(),
    }
}

/// The state the orchestrator keeps for progress reporting.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    total_images: usize,
    image_index: usize,
    image_started: Instant,
    tiles_completed: usize,
    tiles_total: usize,
    last_percent: u8,
}

impl BatchProgress {
    pub fn new(total_images: usize) -> Self {
        BatchProgress {
            total_images,
            image_index: 0,
            image_started: Instant::now(),
            tiles_completed: 0,
            tiles_total: 0,
            last_percent: 0,
        }
    }

    pub fn start_image(&mut self, image_index: usize) {
        self.image_index = image_index;
        self.image_started = Instant::now();
        self.tiles_completed = 0;
        self.tiles_total = 0;
    }

    pub fn set_tile_count(&mut self, tiles_total: usize) {
        self.tiles_total = tiles_total;
        self.tiles_completed = 0;
    }

    pub fn complete_tile(&mut self) {
        self.tiles_completed = (self.tiles_completed + 1).min(self.tiles_total);
    }

    /// Marks the current image as fully accounted for, whether it succeeded or failed.
    pub fn finish_image(&mut self) {
        self.image_index += 1;
        self.tiles_completed = 0;
        self.tiles_total = 0;
    }

    /// Never lower than a percentage already reported.
    pub fn percent(&mut self) -> u8 {
        let percent = overall_percent(
            self.image_index,
            self.tiles_completed,
            self.tiles_total,
            self.total_images,
        )
        .max(self.last_percent);
        self.last_percent = percent;
        percent
    }

    pub fn eta(&self) -> String {
        let remaining = estimate_remaining(
            self.image_started.elapsed(),
            self.tiles_completed,
            self.tiles_total,
        );
        let file = (self.image_index + 1).min(self.total_images);
        format!("{} (File {}/{})", format_eta(remaining), file, self.total_images)
    }

    pub fn snapshot(&mut self, resource_usage: String) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent(),
            eta: self.eta(),
            resource_usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU: {:.1}% | MEM: {:.1}%", self.cpu_percent, self.memory_percent)
    }
}

/// Samples host CPU and memory load with `sysinfo`.
pub struct ResourceMonitor {
    system: System,
    last_refresh: Option<Instant>,
    last_usage: ResourceUsage,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        ResourceMonitor {
            system: System::new(),
            last_refresh: None,
            last_usage: ResourceUsage {
                cpu_percent: 0.0,
                memory_percent: 0.0,
            },
        }
    }

    /// Current usage. Readings are refreshed at most every `RESOURCE_REFRESH_INTERVAL`;
    /// in between the previous reading is returned.
    pub fn sample(&mut self) -> ResourceUsage {
        if self
            .last_refresh
            .is_some_and(|at| at.elapsed() < RESOURCE_REFRESH_INTERVAL)
        {
            return self.last_usage;
        }
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let cpus = self.system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        self.last_refresh = Some(Instant::now());
        self.last_usage = ResourceUsage {
            cpu_percent,
            memory_percent,
        };
        self.last_usage
    }
}
