//! Object detection over large georeferenced rasters.
//!
//! Images are cut into overlapping tiles, each tile is scored by a detection model, and the
//! results are moved back into image pixels and then into the raster's coordinate reference
//! system before being written out as vector features.

pub mod aggregate;
pub mod annotations;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod image_utils;
pub mod object_detection;
pub mod raster;
pub mod remap;
