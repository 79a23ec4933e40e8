//! Operator-facing metadata for errors: stable codes for log filtering, a
//! short hint for the terminal, and the retry view [`crate::retry`] acts on.

use crate::error::*;
use crate::retry::RetryStrategy;
use std::fmt;
use std::time::Duration;
use tracing::{error, warn};

/// Cooldown assumed when a rate-limit signal carries no explicit delay.
const UNSPECIFIED_COOLDOWN: Duration = Duration::from_secs(60);

pub trait ErrorExt: fmt::Display {
    /// Stable identifier, safe to grep for across releases.
    fn error_code(&self) -> &'static str;

    fn user_friendly_message(&self) -> String;

    fn retry_strategy(&self) -> RetryStrategy;

    fn is_retryable(&self) -> bool {
        self.retry_strategy() != RetryStrategy::NoRetry
    }

    /// Delay the upstream asked for, if it asked.
    fn retry_after(&self) -> Option<Duration> {
        match self.retry_strategy() {
            RetryStrategy::RetryWithDelay(delay) => Some(delay),
            _ => None,
        }
    }

    fn log_error(&self) -> &Self
    where
        Self: Sized,
    {
        error!(code = self.error_code(), "{}", self);
        self
    }

    fn log_warn(&self) -> &Self
    where
        Self: Sized,
    {
        warn!(code = self.error_code(), "{}", self);
        self
    }
}

impl CoreError {
    /// Map an error onto the pipeline's failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CoreError::FeedUnavailable { .. } | CoreError::RedditApi(_) => {
                FailureKind::FeedUnavailable
            }
            CoreError::ClassificationFailed { .. } | CoreError::Llm(_) => {
                FailureKind::ClassificationFailed
            }
            CoreError::ClassifierUnavailable { .. } => FailureKind::ClassifierUnavailable,
            CoreError::Config(_) => FailureKind::ConfigurationInvalid,
            CoreError::Database(_) => FailureKind::StorageFailure,
            CoreError::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Other,
        }
    }
}

impl ErrorExt for CoreError {
    fn error_code(&self) -> &'static str {
        match self {
            CoreError::RedditApi(_) => "REDDIT_API",
            CoreError::Database(_) => "STORAGE",
            CoreError::Llm(_) => "LLM",
            CoreError::Config(_) => "CONFIG",
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "JSON",
            CoreError::Network(_) => "TRANSPORT",
            CoreError::FeedUnavailable { .. } => "FEED_UNAVAILABLE",
            CoreError::ClassificationFailed { .. } => "CLASSIFICATION_FAILED",
            CoreError::ClassifierUnavailable { .. } => "CLASSIFIER_UNAVAILABLE",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::RedditApi(e) => e.user_friendly_message(),
            CoreError::Database(e) => e.user_friendly_message(),
            CoreError::Llm(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Could not reach the remote host; check connectivity and proxy settings.".into()
            }
            CoreError::FeedUnavailable { attempts, .. } => format!(
                "Reddit stayed unreachable for {attempts} attempts; the next cycle starts from the same checkpoint."
            ),
            CoreError::ClassificationFailed { attempts, .. } => format!(
                "The model gave no usable answer in {attempts} attempts; the item is queued for a later cycle."
            ),
            CoreError::ClassifierUnavailable { .. } => {
                "The model provider keeps failing; classification pauses until the next cycle.".into()
            }
            CoreError::RateLimited { message, .. } => format!("Throttled upstream ({message})."),
            other => other.to_string(),
        }
    }

    fn retry_strategy(&self) -> RetryStrategy {
        match self {
            CoreError::RedditApi(e) => e.retry_strategy(),
            CoreError::Llm(e) => e.retry_strategy(),
            CoreError::Database(e) => e.retry_strategy(),
            CoreError::Network(e) if is_transient_transport(e) => RetryStrategy::Retry,
            CoreError::RateLimited { retry_after, .. } => {
                RetryStrategy::RetryWithDelay(retry_after.unwrap_or(UNSPECIFIED_COOLDOWN))
            }
            // Feed and classification failures already spent their budget.
            _ => RetryStrategy::NoRetry,
        }
    }
}

fn is_transient_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
}

impl ErrorExt for RedditApiError {
    fn error_code(&self) -> &'static str {
        match self {
            RedditApiError::AuthenticationFailed { .. } => "REDDIT_AUTH_FAILED",
            RedditApiError::RateLimitExceeded { .. } => "REDDIT_RATE_LIMIT",
            RedditApiError::Forbidden { .. } => "REDDIT_FORBIDDEN",
            RedditApiError::SubredditNotFound { .. } => "REDDIT_SUBREDDIT_NOT_FOUND",
            RedditApiError::InvalidToken => "REDDIT_TOKEN_REJECTED",
            RedditApiError::RequestTimeout => "REDDIT_TIMEOUT",
            RedditApiError::InvalidResponse { .. } => "REDDIT_BAD_LISTING",
            RedditApiError::ServerError { .. } => "REDDIT_SERVER_ERROR",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            RedditApiError::AuthenticationFailed { .. } => {
                "Reddit refused the OAuth grant; check REDDIT_CLIENT_ID and REDDIT_CLIENT_SECRET.".into()
            }
            RedditApiError::RateLimitExceeded { retry_after } => {
                format!("Reddit is throttling this client; waiting {retry_after}s.")
            }
            RedditApiError::Forbidden { resource } => {
                format!("{resource} is private or quarantined for this account.")
            }
            RedditApiError::SubredditNotFound { subreddit } => {
                format!("r/{subreddit} does not exist; check the subreddit setting.")
            }
            RedditApiError::InvalidToken => {
                "The cached Reddit access token was rejected; a new one will be requested.".into()
            }
            RedditApiError::RequestTimeout | RedditApiError::ServerError { .. } => {
                "Reddit is slow or failing right now; the request will be retried.".into()
            }
            RedditApiError::InvalidResponse { .. } => {
                "Reddit sent a listing that could not be parsed; the page will be refetched.".into()
            }
        }
    }

    fn retry_strategy(&self) -> RetryStrategy {
        match self {
            RedditApiError::RateLimitExceeded { retry_after } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            // Truncated listings are usually a dropped connection.
            RedditApiError::ServerError { .. }
            | RedditApiError::RequestTimeout
            | RedditApiError::InvalidResponse { .. } => RetryStrategy::Retry,
            RedditApiError::AuthenticationFailed { .. }
            | RedditApiError::InvalidToken
            | RedditApiError::Forbidden { .. }
            | RedditApiError::SubredditNotFound { .. } => RetryStrategy::NoRetry,
        }
    }
}

impl ErrorExt for DatabaseError {
    fn error_code(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED",
            DatabaseError::MigrationFailed(_) => "DB_MIGRATION_FAILED",
            DatabaseError::TransactionFailed { .. } => "DB_TRANSACTION_FAILED",
            DatabaseError::CorruptRecord { .. } => "DB_CORRUPT_RECORD",
            DatabaseError::DatabaseLocked => "DB_LOCKED",
            DatabaseError::Sql(_) => "DB_SQL",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { reason } => {
                format!("The result store could not be opened ({reason}); check SENTIMENT_DATABASE_URL.")
            }
            DatabaseError::MigrationFailed(_) => {
                "The result store schema is newer or older than this build expects.".into()
            }
            DatabaseError::DatabaseLocked => {
                "Another process holds the SQLite lock; is a second pipeline running?".into()
            }
            DatabaseError::CorruptRecord { key, .. } => {
                format!("Stored row '{key}' no longer deserializes and was left untouched.")
            }
            DatabaseError::TransactionFailed { .. } | DatabaseError::Sql(_) => {
                "A write to the result store failed; the checkpoint was not advanced.".into()
            }
        }
    }

    fn retry_strategy(&self) -> RetryStrategy {
        match self {
            DatabaseError::DatabaseLocked => RetryStrategy::Retry,
            _ => RetryStrategy::NoRetry,
        }
    }
}

impl ErrorExt for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            LlmError::AuthenticationFailed { .. } => "LLM_AUTH_FAILED",
            LlmError::RateLimitExceeded { .. } => "LLM_RATE_LIMIT",
            LlmError::ModelNotAvailable { .. } => "LLM_UNKNOWN_MODEL",
            LlmError::InvalidPrompt { .. } => "LLM_REQUEST_REJECTED",
            LlmError::ContentFiltered { .. } => "LLM_CONTENT_FILTERED",
            LlmError::ServiceUnavailable { .. } => "LLM_SERVICE_UNAVAILABLE",
            LlmError::RequestTimeout { .. } => "LLM_TIMEOUT",
            LlmError::InsufficientCredits { .. } => "LLM_NO_CREDIT",
            LlmError::InvalidResponseFormat { .. } => "LLM_BAD_ENVELOPE",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LlmError::AuthenticationFailed { provider } => {
                format!("{provider} rejected the configured API key.")
            }
            LlmError::RateLimitExceeded { provider, retry_after } => {
                format!("{provider} is throttling requests; waiting {retry_after}s.")
            }
            LlmError::ModelNotAvailable { model } => {
                format!("Model '{model}' is not served by this provider; check the model setting.")
            }
            LlmError::ContentFiltered { .. } => {
                "The provider's safety filter withheld a verdict for this item.".into()
            }
            LlmError::InsufficientCredits { provider } => {
                format!("The {provider} account has no credit left.")
            }
            LlmError::ServiceUnavailable { provider, .. } | LlmError::RequestTimeout { provider } => {
                format!("{provider} is overloaded or down; the call will be retried.")
            }
            other => other.to_string(),
        }
    }

    fn retry_strategy(&self) -> RetryStrategy {
        match self {
            LlmError::RateLimitExceeded { retry_after, .. } => {
                RetryStrategy::RetryWithDelay(Duration::from_secs(*retry_after))
            }
            LlmError::ServiceUnavailable { .. }
            | LlmError::RequestTimeout { .. }
            | LlmError::InvalidResponseFormat { .. } => RetryStrategy::Retry,
            _ => RetryStrategy::NoRetry,
        }
    }
}

impl ErrorExt for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR",
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::MissingEnvironmentVariable { var_name } => {
                format!("Set {var_name} in the environment or in .env before starting.")
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Setting '{field}' has a value this build does not accept.")
            }
            other => format!("Configuration problem: {other}."),
        }
    }

    fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::NoRetry
    }
}

/// Emits one structured event per reported error.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    report_errors: bool,
    report_warnings: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            report_errors: true,
            report_warnings: true,
        }
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    pub fn with_warning_reporting(mut self, enabled: bool) -> Self {
        self.report_warnings = enabled;
        self
    }

    pub fn report_error(&self, err: &CoreError) {
        if !self.report_errors {
            return;
        }
        error!(
            code = err.error_code(),
            kind = ?err.failure_kind(),
            retry_after = ?err.retry_after(),
            hint = %err.user_friendly_message(),
            "{}",
            err
        );
    }

    pub fn report_warning(&self, err: &CoreError) {
        if self.report_warnings {
            err.log_warn();
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
