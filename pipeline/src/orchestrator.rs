use crate::state::PipelineState;
use crate::summary::{CycleSummary, ItemFailure};
use database::{CommitOutcome, Database, DedupStore, PendingStatus};
use futures::stream::{self, StreamExt};
use llm_interface::Classifier;
use reddit_client::ContentFeed;
use sentiment_core::{
    calculate_delay, Classification, ContentItem, CoreError, ErrorReporter, FailureKind,
    PipelineSettings, RetryConfig, SentimentResult, StreamCheckpoints,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Totals over a `run` until shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub classified: u64,
}

/// Drives one feed through fetch, dedup, classify and persist.
pub struct Pipeline<F, C> {
    feed: F,
    classifier: C,
    db: Arc<Database>,
    dedup: DedupStore,
    feed_key: String,
    settings: PipelineSettings,
    cycle_backoff: RetryConfig,
    reporter: ErrorReporter,
    state: watch::Sender<PipelineState>,
}

impl<F: ContentFeed, C: Classifier> Pipeline<F, C> {
    pub async fn new(
        feed: F,
        classifier: C,
        db: Arc<Database>,
        feed_key: impl Into<String>,
        settings: PipelineSettings,
    ) -> Result<Self, CoreError> {
        let dedup = DedupStore::load(db.clone()).await?;
        let (state, _) = watch::channel(PipelineState::Idle);
        Ok(Self {
            feed,
            classifier,
            db,
            dedup,
            feed_key: feed_key.into(),
            settings,
            cycle_backoff: RetryConfig::cycle(),
            reporter: ErrorReporter::new(),
            state,
        })
    }

    pub fn with_cycle_backoff(mut self, config: RetryConfig) -> Self {
        self.cycle_backoff = config;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn feed_key(&self) -> &str {
        &self.feed_key
    }

    fn set_state(&self, state: PipelineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Pipeline state");
        }
    }

    /// Key a stream's checkpoint is stored under.
    pub fn checkpoint_key(&self, stream: &str) -> String {
        format!("{}/{}", self.feed_key, stream)
    }

    /// One fetch-classify-persist pass. Checkpoints are written last, and only
    /// if every item in the batch was either stored or queued for retry.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CoreError> {
        let started = Instant::now();
        let result = self.cycle().await;
        self.set_state(PipelineState::Idle);

        result.map(|mut summary| {
            summary.duration_ms = started.elapsed().as_millis() as u64;
            summary
        })
    }

    async fn cycle(&self) -> Result<CycleSummary, CoreError> {
        self.set_state(PipelineState::Fetching);
        let mut checkpoints = StreamCheckpoints::new();
        for stream in self.feed.streams() {
            let checkpoint = self.db.load_checkpoint(&self.checkpoint_key(stream)).await?;
            checkpoints.set(stream, checkpoint);
        }
        let pending = self.db.load_pending(&self.feed_key).await?;
        let abandoned = self.db.abandoned_ids(&self.feed_key).await?;
        let batch = self.feed.fetch_since(&checkpoints).await?;

        let mut summary = CycleSummary::new(&self.feed_key, checkpoints.clone());
        summary.pages = batch.pages;
        summary.fetched = batch.items.len();
        summary.pending_retried = pending.len();
        summary.resynced = batch.resynced;
        summary.feed_truncated = batch.truncated;

        self.set_state(PipelineState::Filtering);
        let candidates = pending
            .into_iter()
            .map(|entry| entry.item)
            .chain(batch.items.iter().cloned());
        let mut work = Vec::new();
        for item in candidates {
            if !abandoned.contains(&item.id) && self.dedup.claim(&item.id).await {
                work.push(item);
            } else {
                summary.skipped += 1;
            }
        }
        debug!(
            claimed = work.len(),
            skipped = summary.skipped,
            "Filtered batch against processed items"
        );

        self.set_state(PipelineState::Classifying);
        let outcomes = self.classify_all(work).await;

        self.set_state(PipelineState::Persisting);
        self.persist(outcomes, &mut summary).await?;

        for (stream, next) in batch.watermarks.iter() {
            if *next > checkpoints.get(stream) {
                let advanced = self.db.save_checkpoint(&self.checkpoint_key(stream), next).await?;
                summary.checkpoint_advanced |= advanced;
                summary.checkpoints.set(stream, next.clone());
            }
        }

        Ok(summary)
    }

    /// Classify claimed items with at most `classify_concurrency` requests in
    /// flight. Results come back in input order.
    async fn classify_all(
        &self,
        work: Vec<ContentItem>,
    ) -> Vec<(ContentItem, Result<Classification, CoreError>)> {
        let classifier = &self.classifier;
        stream::iter(work)
            .map(|item| async move {
                let outcome = classifier.classify(&item.classification_text()).await;
                (item, outcome)
            })
            .buffered(self.settings.classify_concurrency.max(1))
            .collect()
            .await
    }

    /// Store results and queue failures in batch order. A storage failure or an
    /// unavailable classifier stops the pass: remaining claims are released
    /// without charging their items, and the error fails the cycle.
    async fn persist(
        &self,
        outcomes: Vec<(ContentItem, Result<Classification, CoreError>)>,
        summary: &mut CycleSummary,
    ) -> Result<(), CoreError> {
        let mut abort: Option<CoreError> = None;

        for (item, outcome) in outcomes {
            if abort.is_some() {
                self.dedup.release(&item.id).await;
                continue;
            }

            match outcome {
                Ok(classification) => {
                    let result = SentimentResult::new(&item, classification);
                    match self.dedup.commit(&item, &result).await {
                        Ok(CommitOutcome::Committed) => {
                            summary.classified += 1;
                            if result.truncated {
                                summary.truncated_inputs += 1;
                            }
                            *summary.labels.entry(result.label).or_default() += 1;
                        }
                        Ok(CommitOutcome::AlreadyProcessed) => summary.skipped += 1,
                        Err(e) => abort = Some(e.into()),
                    }
                }
                Err(error) if error.failure_kind() == FailureKind::ClassifierUnavailable => {
                    self.dedup.release(&item.id).await;
                    abort = Some(error);
                }
                Err(error) => {
                    self.dedup.release(&item.id).await;
                    if error.failure_kind() != FailureKind::ClassificationFailed {
                        warn!(item_id = %item.id, "Unexpected classifier error: {}", error);
                    }
                    summary.failed += 1;
                    let reason = error.to_string();
                    match self
                        .db
                        .record_failure(
                            &self.feed_key,
                            &item,
                            &reason,
                            self.settings.max_item_failures,
                        )
                        .await
                    {
                        Ok(entry) => summary.failures.push(ItemFailure {
                            item_id: item.id.clone(),
                            reason,
                            failures: entry.attempts,
                            abandoned: entry.status == PendingStatus::Abandoned,
                        }),
                        Err(e) => abort = Some(e.into()),
                    }
                }
            }
        }

        match abort {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Run cycles until `shutdown` turns true. Failed cycles back off
    /// exponentially; a successful cycle resets the backoff. Configuration
    /// errors stop the loop and are returned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<RunReport, CoreError> {
        let mut report = RunReport::default();
        let mut consecutive_failures = 0u32;
        info!(feed = %self.feed_key, "Pipeline started");

        while !*shutdown.borrow() {
            report.cycles += 1;
            let delay = match self.run_cycle().await {
                Ok(summary) => {
                    consecutive_failures = 0;
                    report.classified += summary.classified as u64;
                    summary.log();
                    self.settings.poll_interval()
                }
                Err(error) if error.failure_kind() == FailureKind::ConfigurationInvalid => {
                    self.reporter.report_error(&error);
                    self.set_state(PipelineState::Stopped);
                    return Err(error);
                }
                Err(error) => {
                    report.failed_cycles += 1;
                    self.reporter.report_error(&error);
                    let delay = self.backoff_delay(consecutive_failures, &error);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(
                        failure = ?error.failure_kind(),
                        consecutive_failures,
                        "Cycle failed, backing off for {:?}",
                        delay
                    );
                    self.set_state(PipelineState::Backoff);
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(PipelineState::Stopped);
        info!(
            cycles = report.cycles,
            failed_cycles = report.failed_cycles,
            classified = report.classified,
            "Pipeline stopped"
        );
        Ok(report)
    }

    fn backoff_delay(&self, consecutive_failures: u32, error: &CoreError) -> Duration {
        let backoff = calculate_delay(consecutive_failures, &self.cycle_backoff);
        match error {
            CoreError::RateLimited {
                retry_after: Some(retry_after),
                ..
            } => backoff.max(*retry_after),
            _ => backoff,
        }
    }
}
