use crate::api::{RedditApiClient, RedditCommentData, RedditListing, RedditPostData, RedditSubredditData};
use sentiment_core::{
    Checkpoint, ContentItem, CoreError, FeedSettings, RedditApiError, RetryConfig, RetryExecutor,
    RetryFailure, RetryFailureReason, StreamCheckpoints,
};
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info, warn};

/// Stream name for the subreddit's post listing.
pub const POSTS_STREAM: &str = "posts";
/// Stream name for the subreddit's comment listing.
pub const COMMENTS_STREAM: &str = "comments";

/// Items fetched since a set of stream checkpoints, oldest first.
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub items: Vec<ContentItem>,
    /// Newest position reached on each stream that was read. Never behind the
    /// checkpoint that stream was fetched from.
    pub watermarks: StreamCheckpoints,
    /// Some stream's checkpoint was older than anything its listing still retains.
    pub resynced: bool,
    /// The page budget ran out before some stream's checkpoint was reached.
    pub truncated: bool,
    pub pages: u32,
}

impl FeedBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A restartable source of content items, read as one or more independently
/// paged streams.
pub trait ContentFeed {
    /// Streams this feed reads. Each one is checkpointed on its own.
    fn streams(&self) -> Vec<&'static str>;

    /// Fetch a finite batch of items at or after each stream's checkpoint,
    /// oldest first.
    async fn fetch_since(&self, checkpoints: &StreamCheckpoints) -> Result<FeedBatch, CoreError>;
}

#[derive(Debug)]
struct Page {
    items: Vec<ContentItem>,
    after: Option<String>,
}

impl Page {
    fn from_posts(listing: RedditListing<RedditPostData>) -> Self {
        Self {
            items: listing
                .data
                .children
                .into_iter()
                .map(|child| child.data.into())
                .collect(),
            after: listing.data.after,
        }
    }

    fn from_comments(listing: RedditListing<RedditCommentData>) -> Self {
        Self {
            items: listing
                .data
                .children
                .into_iter()
                .map(|child| child.data)
                .filter(|comment| !comment.is_removed())
                .map(ContentItem::from)
                .collect(),
            after: listing.data.after,
        }
    }
}

#[derive(Debug, Default)]
struct StreamScan {
    items: Vec<ContentItem>,
    pages: u32,
    reached_watermark: bool,
    exhausted: bool,
    budget_hit: bool,
}

/// Subreddit feed over the Reddit API.
#[derive(Debug)]
pub struct RedditFeed {
    api: RedditApiClient,
    settings: FeedSettings,
    executor: RetryExecutor,
}

impl RedditFeed {
    pub fn new(api: RedditApiClient, settings: FeedSettings, retry: RetryConfig) -> Self {
        Self {
            api,
            settings,
            executor: RetryExecutor::new(retry),
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn api(&self) -> &RedditApiClient {
        &self.api
    }

    /// Confirm the community exists and adopt its canonical display name.
    pub async fn verify_subreddit(&mut self) -> Result<RedditSubredditData, CoreError> {
        let api = &self.api;
        let subreddit = self.settings.subreddit.as_str();
        let info = self
            .executor
            .execute("subreddit_about", move || async move {
                api.call_outcome(api.get_subreddit_info(subreddit).await)
                    .await
            })
            .await
            .map_err(|failure| match failure.error {
                CoreError::RedditApi(
                    e @ (RedditApiError::SubredditNotFound { .. }
                    | RedditApiError::Forbidden { .. }
                    | RedditApiError::AuthenticationFailed { .. }),
                ) => CoreError::RedditApi(e),
                _ => feed_unavailable(failure),
            })?;

        if info.display_name != self.settings.subreddit {
            info!(
                "Using canonical community name r/{} (configured as {})",
                info.display_name, self.settings.subreddit
            );
            self.settings.subreddit = info.display_name.clone();
        }
        Ok(info)
    }

    async fn scan<F, Fut>(
        &self,
        stream: &str,
        checkpoint: &Checkpoint,
        chronological: bool,
        fetch_page: F,
    ) -> Result<StreamScan, CoreError>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page, CoreError>>,
    {
        let use_watermark = chronological && !checkpoint.is_initial();
        let api = &self.api;
        let fetch_page = &fetch_page;
        let mut scan = StreamScan::default();
        let mut after: Option<String> = None;

        loop {
            if scan.pages >= self.settings.max_pages {
                scan.budget_hit = true;
                break;
            }

            let cursor = after.clone();
            let page = self
                .executor
                .execute(stream, move || {
                    let cursor = cursor.clone();
                    async move { api.call_outcome(fetch_page(cursor).await).await }
                })
                .await
                .map_err(feed_unavailable)?;
            scan.pages += 1;

            for item in page.items {
                if chronological && !checkpoint.admits(&item) {
                    if use_watermark {
                        scan.reached_watermark = true;
                    }
                    continue;
                }
                if use_watermark && checkpoint.item_id.as_deref() == Some(item.id.as_str()) {
                    scan.reached_watermark = true;
                }
                scan.items.push(item);
            }

            if scan.reached_watermark {
                break;
            }

            match page.after {
                Some(next) => after = Some(next),
                None => {
                    scan.exhausted = true;
                    break;
                }
            }
        }

        debug!(
            stream,
            pages = scan.pages,
            items = scan.items.len(),
            reached_watermark = scan.reached_watermark,
            exhausted = scan.exhausted,
            "Scanned Reddit listing"
        );
        Ok(scan)
    }
}

impl ContentFeed for RedditFeed {
    fn streams(&self) -> Vec<&'static str> {
        if self.settings.include_comments {
            vec![POSTS_STREAM, COMMENTS_STREAM]
        } else {
            vec![POSTS_STREAM]
        }
    }

    async fn fetch_since(&self, checkpoints: &StreamCheckpoints) -> Result<FeedBatch, CoreError> {
        let api = &self.api;
        let subreddit = self.settings.subreddit.as_str();
        let listing = self.settings.listing;
        let time_filter = self.settings.time_filter;
        let limit = self.settings.page_limit;

        let mut scans = Vec::with_capacity(2);
        let posts_checkpoint = checkpoints.get(POSTS_STREAM);
        scans.push((
            POSTS_STREAM,
            posts_checkpoint.clone(),
            listing.is_chronological(),
            self.scan(
                POSTS_STREAM,
                &posts_checkpoint,
                listing.is_chronological(),
                move |after| async move {
                    api.get_subreddit_posts(subreddit, listing, time_filter, limit, after.as_deref())
                        .await
                        .map(Page::from_posts)
                },
            )
            .await?,
        ));

        if self.settings.include_comments {
            let comments_checkpoint = checkpoints.get(COMMENTS_STREAM);
            scans.push((
                COMMENTS_STREAM,
                comments_checkpoint.clone(),
                true,
                self.scan(
                    COMMENTS_STREAM,
                    &comments_checkpoint,
                    true,
                    move |after| async move {
                        api.get_subreddit_comments(subreddit, limit, after.as_deref())
                            .await
                            .map(Page::from_comments)
                    },
                )
                .await?,
            ));
        }

        let mut batch = FeedBatch::default();
        let mut seen = HashSet::new();

        for (stream, checkpoint, chronological, scan) in scans {
            batch.pages += scan.pages;
            if chronological && !checkpoint.is_initial() && !scan.reached_watermark {
                if scan.exhausted {
                    batch.resynced = true;
                    warn!(
                        subreddit,
                        stream,
                        checkpoint_utc = checkpoint.created_utc,
                        "Checkpoint is outside the retained listing window, resyncing from the oldest available item"
                    );
                } else if scan.budget_hit {
                    batch.truncated = true;
                    warn!(
                        subreddit,
                        stream,
                        max_pages = self.settings.max_pages,
                        "Page budget exhausted before reaching the checkpoint, older items in the gap are skipped"
                    );
                }
            }
            batch.watermarks.set(stream, checkpoint.advance(&scan.items));
            batch
                .items
                .extend(scan.items.into_iter().filter(|item| seen.insert(item.id.clone())));
        }

        batch.items.sort_by(|a, b| a.position().cmp(&b.position()));

        self.api.log_metrics().await;
        debug!(
            subreddit,
            items = batch.items.len(),
            pages = batch.pages,
            "Fetched feed batch"
        );
        Ok(batch)
    }
}

fn feed_unavailable(failure: RetryFailure) -> CoreError {
    let reason = match failure.reason {
        RetryFailureReason::CircuitOpen => "circuit breaker open".to_string(),
        _ => failure.error.to_string(),
    };
    CoreError::FeedUnavailable {
        attempts: failure.attempts,
        reason,
    }
}
