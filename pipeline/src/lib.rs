//! Fetch, deduplicate, classify and persist loop over a content feed.

mod orchestrator;
mod state;
mod summary;

pub use orchestrator::{Pipeline, RunReport};
pub use state::PipelineState;
pub use summary::{CycleSummary, ItemFailure};
