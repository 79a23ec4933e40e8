use chrono::{DateTime, Utc};
use sentiment_core::{SentimentLabel, StreamCheckpoints};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// One item whose classification failed this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub reason: String,
    /// Failed cycles recorded for this item so far.
    pub failures: u32,
    /// No further retries will be made.
    pub abandoned: bool,
}

/// What one cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub feed_key: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pages: u32,
    pub fetched: usize,
    pub pending_retried: usize,
    pub skipped: usize,
    pub classified: usize,
    pub failed: usize,
    pub truncated_inputs: usize,
    pub resynced: bool,
    pub feed_truncated: bool,
    /// Per-stream checkpoints after this cycle.
    pub checkpoints: StreamCheckpoints,
    pub checkpoint_advanced: bool,
    pub labels: HashMap<SentimentLabel, usize>,
    pub failures: Vec<ItemFailure>,
}

impl CycleSummary {
    pub(crate) fn new(feed_key: &str, checkpoints: StreamCheckpoints) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            feed_key: feed_key.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            pages: 0,
            fetched: 0,
            pending_retried: 0,
            skipped: 0,
            classified: 0,
            failed: 0,
            truncated_inputs: 0,
            resynced: false,
            feed_truncated: false,
            checkpoints,
            checkpoint_advanced: false,
            labels: HashMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn abandoned(&self) -> usize {
        self.failures.iter().filter(|f| f.abandoned).count()
    }

    pub fn is_idle(&self) -> bool {
        self.fetched == 0 && self.pending_retried == 0
    }

    pub fn log(&self) {
        info!(
            cycle_id = %self.cycle_id,
            feed = %self.feed_key,
            fetched = self.fetched,
            pending_retried = self.pending_retried,
            skipped = self.skipped,
            classified = self.classified,
            failed = self.failed,
            truncated = self.truncated_inputs,
            duration_ms = self.duration_ms,
            "Cycle complete"
        );

        if self.resynced {
            warn!(
                cycle_id = %self.cycle_id,
                "Checkpoint fell out of the listing window, items between it and the oldest retained item were missed"
            );
        }
        if self.feed_truncated {
            warn!(
                cycle_id = %self.cycle_id,
                "Page budget ran out before the checkpoint, some items were skipped"
            );
        }
        for failure in &self.failures {
            warn!(
                cycle_id = %self.cycle_id,
                item_id = %failure.item_id,
                failures = failure.failures,
                abandoned = failure.abandoned,
                "Classification failed: {}",
                failure.reason
            );
        }
    }
}
