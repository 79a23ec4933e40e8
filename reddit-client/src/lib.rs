pub mod api;
pub mod auth;
pub mod feed;
pub mod metrics;
pub mod rate_limiter;


pub use api::{RedditApiClient, RedditCommentData, RedditPostData, RedditSubredditData};
pub use auth::{GrantKind, RedditAuthenticator, RedditToken};
pub use feed::{ContentFeed, FeedBatch, RedditFeed, COMMENTS_STREAM, POSTS_STREAM};
pub use metrics::{ApiMetrics, EndpointMetrics, MetricsCollector};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
