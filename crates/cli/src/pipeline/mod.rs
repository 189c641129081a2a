//! Pipeline orchestration module.

mod input;
mod orchestrator;
mod stats;

pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;
