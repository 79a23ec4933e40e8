use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("reddit: {0}")]
    RedditApi(#[from] RedditApiError),

    #[error("storage: {0}")]
    Database(#[from] DatabaseError),

    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http transport: {0}")]
    Network(#[from] reqwest::Error),

    /// The listing could not be fetched within the retry budget.
    #[error("feed unavailable after {attempts} attempt(s): {reason}")]
    FeedUnavailable { attempts: u32, reason: String },

    /// A single item could not be classified within the retry budget.
    #[error("classification gave up after {attempts} attempt(s): {reason}")]
    ClassificationFailed { attempts: u32, reason: String },

    /// The classifier refused calls outright after repeated failures. No item
    /// reached the model, so none is charged for it.
    #[error("classifier unavailable: {reason}")]
    ClassifierUnavailable { reason: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("internal: {message}")]
    Internal { message: String },
}

#[derive(Error, Debug, Clone)]
pub enum RedditApiError {
    #[error("OAuth grant rejected: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("HTTP 429, cooldown {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("access to {resource} denied")]
    Forbidden { resource: String },

    #[error("r/{subreddit} does not exist or is banned")]
    SubredditNotFound { subreddit: String },

    /// Bearer token expired or revoked mid-session.
    #[error("bearer token rejected")]
    InvalidToken,

    #[error("request timed out")]
    RequestTimeout,

    #[error("unreadable listing: {details}")]
    InvalidResponse { details: String },

    #[error("HTTP {status_code} from Reddit")]
    ServerError { status_code: u16 },
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("cannot open database: {reason}")]
    ConnectionFailed { reason: String },

    #[error("schema migration: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("commit aborted: {reason}")]
    TransactionFailed { reason: String },

    #[error("row {key} is unreadable: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// SQLITE_BUSY or SQLITE_LOCKED.
    #[error("database is locked")]
    DatabaseLocked,

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{provider} rejected the API key")]
    AuthenticationFailed { provider: String },

    #[error("{provider} returned 429, cooldown {retry_after}s")]
    RateLimitExceeded { provider: String, retry_after: u64 },

    #[error("model {model} is unknown to the provider")]
    ModelNotAvailable { model: String },

    #[error("request rejected: {reason}")]
    InvalidPrompt { reason: String },

    #[error("output withheld by safety filter: {reason}")]
    ContentFiltered { reason: String },

    #[error("{provider} answered HTTP {status_code}")]
    ServiceUnavailable { provider: String, status_code: u16 },

    #[error("{provider} did not answer in time")]
    RequestTimeout { provider: String },

    #[error("{provider} account is out of credit")]
    InsufficientCredits { provider: String },

    #[error("unexpected {provider} envelope: {details}")]
    InvalidResponseFormat { provider: String, details: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config file at {path}")]
    FileNotFound { path: String },

    #[error("{field} = {value:?} is not allowed")]
    InvalidValue { field: String, value: String },

    #[error("${var_name} is not set")]
    MissingEnvironmentVariable { var_name: String },

    #[error("{reason}")]
    ValidationFailed { reason: String },

    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure taxonomy the orchestrator applies its policy to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream feed unreachable after retries. Fatal for the cycle only.
    FeedUnavailable,
    /// Handled inside the clients; never expected to reach the orchestrator.
    RateLimited,
    /// Single item failed after retry exhaustion. Logged and skipped.
    ClassificationFailed,
    /// The classifier is refusing calls. Fatal for the cycle only.
    ClassifierUnavailable,
    /// Fatal at startup.
    ConfigurationInvalid,
    /// Durable write failed. The checkpoint must not advance.
    StorageFailure,
    Other,
}
