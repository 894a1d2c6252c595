//! Running detection over a list of images.

pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod session;
