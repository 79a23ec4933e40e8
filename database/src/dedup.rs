use crate::{CommitOutcome, Database};
use sentiment_core::{ContentItem, DatabaseError, SentimentResult};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct DedupState {
    seen: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Durable set of processed item ids with an in-memory index.
///
/// Ids move from unseen to in-flight (`claim`) to seen (`commit`). A claimed id
/// is never handed out twice, so concurrent workers cannot classify the same
/// item, and a seen id is never claimed again.
#[derive(Debug)]
pub struct DedupStore {
    db: Arc<Database>,
    state: Mutex<DedupState>,
}

impl DedupStore {
    /// Build the index from the processed ids already in `db`.
    pub async fn load(db: Arc<Database>) -> Result<Self, DatabaseError> {
        let seen: HashSet<String> = db.processed_ids().await?.into_iter().collect();
        info!(processed = seen.len(), "Loaded processed item index");
        Ok(Self {
            db,
            state: Mutex::new(DedupState {
                seen,
                in_flight: HashSet::new(),
            }),
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn contains(&self, item_id: &str) -> bool {
        self.state.lock().await.seen.contains(item_id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids currently claimed and not yet committed or released.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Persist `item_id` as processed without storing a result. The mark
    /// survives restarts and reconciliation.
    pub async fn mark_seen(&self, item_id: &str) -> Result<bool, DatabaseError> {
        let inserted = self.db.mark_processed(item_id).await?;
        let mut state = self.state.lock().await;
        state.in_flight.remove(item_id);
        state.seen.insert(item_id.to_string());
        Ok(inserted)
    }

    /// Reserve `item_id` for classification. Returns false if it is already
    /// processed or another worker holds it.
    pub async fn claim(&self, item_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.seen.contains(item_id) || state.in_flight.contains(item_id) {
            return false;
        }
        state.in_flight.insert(item_id.to_string())
    }

    /// Give back a claim without marking the id processed.
    pub async fn release(&self, item_id: &str) {
        self.state.lock().await.in_flight.remove(item_id);
    }

    /// Store the result and mark the item seen. The claim is released whether
    /// or not the write succeeds.
    pub async fn commit(
        &self,
        item: &ContentItem,
        result: &SentimentResult,
    ) -> Result<CommitOutcome, DatabaseError> {
        let outcome = self.db.commit_classification(item, result).await;
        let mut state = self.state.lock().await;
        state.in_flight.remove(&item.id);
        let outcome = outcome?;
        if outcome == CommitOutcome::AlreadyProcessed {
            debug!(item_id = %item.id, "Duplicate result discarded");
        }
        state.seen.insert(item.id.clone());
        Ok(outcome)
    }
}
