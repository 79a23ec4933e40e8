use crate::auth::RedditAuthenticator;
use crate::metrics::{ApiMetrics, MetricsCollector, RequestOutcome, RequestRecord};
use crate::rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use sentiment_core::{
    CallOutcome, ContentItem, CoreError, ItemKind, ListingKind, RedditApiError, RedditSettings,
    TimeFilter,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Seconds to wait on a 429 that carries no usable cooldown header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    /// Fullname, `t3_` + id.
    #[serde(default)]
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub subreddit_id: Option<String>,
    #[serde(default)]
    pub permalink: String,
    pub created_utc: f64,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub over_18: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    pub subreddit: String,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub permalink: String,
    pub created_utc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditSubredditData {
    /// Fullname, `t5_` + id.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subscribers: Option<u64>,
    #[serde(default)]
    pub over18: bool,
    #[serde(default)]
    pub subreddit_type: Option<String>,
}

fn is_removed_text(text: &str) -> bool {
    matches!(text.trim(), "[deleted]" | "[removed]")
}

fn author_handle(author: Option<String>) -> Option<String> {
    author.filter(|a| !a.is_empty() && a != "[deleted]")
}

impl RedditCommentData {
    /// Whether the body was deleted or removed by moderators.
    pub fn is_removed(&self) -> bool {
        self.body.trim().is_empty() || is_removed_text(&self.body)
    }
}

impl From<RedditPostData> for ContentItem {
    fn from(post: RedditPostData) -> Self {
        let id = if post.name.is_empty() {
            format!("t3_{}", post.id)
        } else {
            post.name
        };
        let body = if is_removed_text(&post.selftext) {
            String::new()
        } else {
            post.selftext
        };

        Self {
            id,
            kind: ItemKind::Post,
            parent_id: post.subreddit_id,
            author: author_handle(post.author),
            subreddit: post.subreddit,
            title: Some(post.title),
            body,
            permalink: post.permalink,
            created_utc: post.created_utc as i64,
        }
    }
}

impl From<RedditCommentData> for ContentItem {
    fn from(comment: RedditCommentData) -> Self {
        let id = if comment.name.is_empty() {
            format!("t1_{}", comment.id)
        } else {
            comment.name
        };

        Self {
            id,
            kind: ItemKind::Comment,
            parent_id: comment.parent_id.or(comment.link_id),
            author: author_handle(comment.author),
            subreddit: comment.subreddit,
            title: None,
            body: comment.body,
            permalink: comment.permalink,
            created_utc: comment.created_utc as i64,
        }
    }
}

/// Pull the community name out of an `/r/{name}/...` endpoint.
fn subreddit_from_endpoint(endpoint: &str) -> String {
    endpoint
        .strip_prefix("/r/")
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(endpoint)
        .to_string()
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Cooldown requested by a 429: `Retry-After`, else `X-Ratelimit-Reset`.
fn retry_after_secs(headers: &HeaderMap) -> u64 {
    header_value::<f64>(headers, "retry-after")
        .or_else(|| header_value::<f64>(headers, "x-ratelimit-reset"))
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    auth: RedditAuthenticator,
    rate_limiter: RateLimiter,
    metrics: MetricsCollector,
    base_url: String,
}

impl RedditApiClient {
    pub fn new(settings: &RedditSettings) -> Result<Self, CoreError> {
        Self::with_rate_limit(settings, RateLimitConfig::reddit_oauth())
    }

    pub fn with_rate_limit(
        settings: &RedditSettings,
        rate_config: RateLimitConfig,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(settings.request_timeout())
            .build()?;
        let auth = RedditAuthenticator::new(settings, http_client.clone())?;

        Ok(Self {
            http_client,
            auth,
            rate_limiter: RateLimiter::new(rate_config),
            metrics: MetricsCollector::new(),
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn auth(&self) -> &RedditAuthenticator {
        &self.auth
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Response, CoreError> {
        let access_token = self.auth.access_token().await?;
        let url = format!("{}{}", self.base_url, endpoint);

        let waited = self.rate_limiter.acquire().await;
        debug!(%method, endpoint, waited_ms = waited.as_millis() as u64, "Sending Reddit request");

        let start_time = Instant::now();
        let result = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&access_token)
            .query(query_params)
            .send()
            .await;
        let latency = start_time.elapsed();

        let (outcome, result) = match result {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers();
                self.rate_limiter
                    .observe_headers(
                        header_value(headers, "x-ratelimit-remaining"),
                        header_value(headers, "x-ratelimit-reset"),
                    )
                    .await;

                if status.is_success() {
                    (RequestOutcome::Success, Ok(response))
                } else if status == StatusCode::TOO_MANY_REQUESTS {
                    self.rate_limiter.record_throttled().await;
                    let error = self.status_error(status, response.headers(), endpoint);
                    (RequestOutcome::Throttled, Err(error))
                } else {
                    let error = self.status_error(status, response.headers(), endpoint);
                    (RequestOutcome::HttpError(status.as_u16()), Err(error))
                }
            }
            Err(e) => {
                error!(%method, endpoint, error = %e, "Reddit request failed in transport");
                let error = if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                };
                (RequestOutcome::Transport, Err(error))
            }
        };

        self.metrics
            .record(RequestRecord {
                endpoint: endpoint.to_string(),
                latency,
                outcome,
            })
            .await;
        result
    }

    fn status_error(&self, status: StatusCode, headers: &HeaderMap, endpoint: &str) -> CoreError {
        let error = match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = retry_after_secs(headers);
                warn!("Rate limited on {}, retry after {} seconds", endpoint, retry_after);
                RedditApiError::RateLimitExceeded { retry_after }
            }
            StatusCode::UNAUTHORIZED => RedditApiError::InvalidToken,
            StatusCode::FORBIDDEN => RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            },
            StatusCode::NOT_FOUND => RedditApiError::SubredditNotFound {
                subreddit: subreddit_from_endpoint(endpoint),
            },
            s if s.is_server_error() => RedditApiError::ServerError {
                status_code: s.as_u16(),
            },
            s => RedditApiError::InvalidResponse {
                details: format!("Unexpected status {} for {}", s, endpoint),
            },
        };
        if !matches!(error, RedditApiError::RateLimitExceeded { .. }) {
            error!("Request failed with status: {} for {}", status, endpoint);
        }
        CoreError::RedditApi(error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, CoreError> {
        let response = self
            .make_request(Method::GET, endpoint, query_params)
            .await?;

        // A cut-off body surfaces here as a decode error; treat it as a malformed response.
        response.json::<T>().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse response from {}: {}", endpoint, e),
            })
        })
    }

    /// One page of a subreddit post listing, newest first for `new`.
    pub async fn get_subreddit_posts(
        &self,
        subreddit: &str,
        listing: ListingKind,
        time_filter: TimeFilter,
        limit: u32,
        after: Option<&str>,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let endpoint = format!("/r/{}/{}", subreddit, listing);
        let limit = limit.to_string();
        let mut params = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if listing == ListingKind::Top {
            params.push(("t", time_filter.as_str()));
        }
        if let Some(after) = after {
            params.push(("after", after));
        }

        let listing: RedditListing<RedditPostData> = self.get_json(&endpoint, &params).await?;
        debug!(
            "Retrieved {} posts from {}",
            listing.data.children.len(),
            endpoint
        );
        Ok(listing)
    }

    /// One page of the subreddit's newest-comments stream.
    pub async fn get_subreddit_comments(
        &self,
        subreddit: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<RedditListing<RedditCommentData>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddit);
        let limit = limit.to_string();
        let mut params = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if let Some(after) = after {
            params.push(("after", after));
        }

        let listing: RedditListing<RedditCommentData> = self.get_json(&endpoint, &params).await?;
        debug!(
            "Retrieved {} comments from {}",
            listing.data.children.len(),
            endpoint
        );
        Ok(listing)
    }

    pub async fn get_subreddit_info(
        &self,
        subreddit: &str,
    ) -> Result<RedditSubredditData, CoreError> {
        let endpoint = format!("/r/{}/about", subreddit);
        let thing: RedditListingChild<serde_json::Value> = self.get_json(&endpoint, &[]).await?;

        // Unknown communities come back as an empty listing rather than a 404.
        if thing.kind != "t5" {
            return Err(CoreError::RedditApi(RedditApiError::SubredditNotFound {
                subreddit: subreddit.to_string(),
            }));
        }

        let data: RedditSubredditData = serde_json::from_value(thing.data).map_err(|e| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse info for r/{}: {}", subreddit, e),
            })
        })?;
        debug!("Retrieved info for r/{}", data.display_name);
        Ok(data)
    }

    /// Classify a request result for the retry loop. A rejected token is
    /// dropped so the next attempt re-authenticates.
    pub async fn call_outcome<T>(&self, result: Result<T, CoreError>) -> CallOutcome<T> {
        match result {
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                self.auth.invalidate().await;
                CallOutcome::Transient(CoreError::RedditApi(RedditApiError::InvalidToken))
            }
            other => other.into(),
        }
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn log_metrics(&self) {
        self.metrics.log_summary().await;
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.status().await
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset_metrics().await;
    }
}
