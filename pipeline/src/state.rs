use serde::Serialize;
use std::fmt;

/// Where the orchestrator is in its cycle, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Filtering,
    Classifying,
    Persisting,
    /// Cooling down after a failed cycle.
    Backoff,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Filtering => "filtering",
            PipelineState::Classifying => "classifying",
            PipelineState::Persisting => "persisting",
            PipelineState::Backoff => "backoff",
            PipelineState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
