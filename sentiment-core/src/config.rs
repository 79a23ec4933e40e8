use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::env::VarError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_REDDIT_API_BASE_URL: &str = "https://oauth.reddit.com";
pub const DEFAULT_REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://reddit_sentiment.db";

/// Reddit caps listing pages at 100 items.
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    New,
    Hot,
    Top,
    Rising,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::New => "new",
            ListingKind::Hot => "hot",
            ListingKind::Top => "top",
            ListingKind::Rising => "rising",
        }
    }

    /// Only `new` is ordered by creation time.
    pub fn is_chronological(&self) -> bool {
        matches!(self, ListingKind::New)
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(ListingKind::New),
            "hot" => Ok(ListingKind::Hot),
            "top" => Ok(ListingKind::Top),
            "rising" => Ok(ListingKind::Rising),
            other => Err(ConfigError::InvalidValue {
                field: "SENTIMENT_LISTING".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl FromStr for TimeFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(ConfigError::InvalidValue {
                field: "SENTIMENT_TIME_FILTER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Anthropic,
}

impl LlmProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProviderKind::OpenAi => "openai",
            LlmProviderKind::Anthropic => "anthropic",
        }
    }
}

impl FromStr for LlmProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(LlmProviderKind::Anthropic),
            other => Err(ConfigError::InvalidValue {
                field: "LLM_PROVIDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct RedditSettings {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_base_url: String,
    pub token_url: String,
    pub request_timeout_secs: u64,
}

impl RedditSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for RedditSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Community name without any `r/` prefix.
    pub subreddit: String,
    pub listing: ListingKind,
    pub time_filter: TimeFilter,
    pub include_comments: bool,
    pub page_limit: u32,
    pub max_pages: u32,
}

impl FeedSettings {
    /// Prefix for this feed's per-stream checkpoints and its retry queue key.
    pub fn feed_key(&self) -> String {
        format!("r/{}/{}", self.subreddit.to_ascii_lowercase(), self.listing)
    }
}

#[derive(Clone)]
pub struct LlmSettings {
    pub provider: LlmProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_input_chars", &self.max_input_chars)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub classify_concurrency: usize,
    pub poll_interval_secs: u64,
    pub max_item_failures: u32,
}

impl PipelineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classify_concurrency: 1,
            poll_interval_secs: 300,
            max_item_failures: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub reddit: RedditSettings,
    pub feed: FeedSettings,
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub database_url: String,
}

/// Optional TOML configuration file. Every key is optional; environment
/// variables take precedence over anything set here.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub reddit: FileRedditSection,
    #[serde(default)]
    pub llm: FileLlmSection,
    #[serde(default)]
    pub pipeline: FilePipelineSection,
    pub database_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRedditSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_base_url: Option<String>,
    pub token_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLlmSection {
    pub provider: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub max_input_chars: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePipelineSection {
    pub subreddit: Option<String>,
    pub listing: Option<ListingKind>,
    pub time_filter: Option<TimeFilter>,
    pub include_comments: Option<bool>,
    pub page_limit: Option<u32>,
    pub max_pages: Option<u32>,
    pub concurrency: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub max_item_failures: Option<u32>,
}

impl FileConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&raw)
    }

    /// Flatten into the same keys the environment uses.
    pub fn into_vars(self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(key.to_string(), value);
            }
        };

        put("REDDIT_CLIENT_ID", self.reddit.client_id);
        put("REDDIT_CLIENT_SECRET", self.reddit.client_secret);
        put("REDDIT_USER_AGENT", self.reddit.user_agent);
        put("REDDIT_USERNAME", self.reddit.username);
        put("REDDIT_PASSWORD", self.reddit.password);
        put("REDDIT_API_BASE_URL", self.reddit.api_base_url);
        put("REDDIT_TOKEN_URL", self.reddit.token_url);
        put(
            "REDDIT_REQUEST_TIMEOUT_SECS",
            self.reddit.request_timeout_secs.map(|v| v.to_string()),
        );

        put("LLM_PROVIDER", self.llm.provider);
        put("OPENAI_API_KEY", self.llm.openai_api_key);
        put("ANTHROPIC_API_KEY", self.llm.anthropic_api_key);
        put("OPENAI_MODEL", self.llm.openai_model);
        put("ANTHROPIC_MODEL", self.llm.anthropic_model);
        put("OPENAI_BASE_URL", self.llm.openai_base_url);
        put("ANTHROPIC_BASE_URL", self.llm.anthropic_base_url);
        put(
            "SENTIMENT_MAX_INPUT_CHARS",
            self.llm.max_input_chars.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_LLM_TIMEOUT_SECS",
            self.llm.timeout_secs.map(|v| v.to_string()),
        );

        put("SENTIMENT_SUBREDDIT", self.pipeline.subreddit);
        put(
            "SENTIMENT_LISTING",
            self.pipeline.listing.map(|v| v.as_str().to_string()),
        );
        put(
            "SENTIMENT_TIME_FILTER",
            self.pipeline.time_filter.map(|v| v.as_str().to_string()),
        );
        put(
            "SENTIMENT_INCLUDE_COMMENTS",
            self.pipeline.include_comments.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_PAGE_LIMIT",
            self.pipeline.page_limit.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_MAX_PAGES",
            self.pipeline.max_pages.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_CONCURRENCY",
            self.pipeline.concurrency.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_POLL_INTERVAL_SECS",
            self.pipeline.poll_interval_secs.map(|v| v.to_string()),
        );
        put(
            "SENTIMENT_MAX_ITEM_FAILURES",
            self.pipeline.max_item_failures.map(|v| v.to_string()),
        );

        put("SENTIMENT_DATABASE_URL", self.database_url);
        vars
    }
}

/// Strip an optional `r/` or `/r/` prefix and surrounding slashes.
pub fn normalize_subreddit(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    let stripped = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("R/"))
        .unwrap_or(trimmed);
    stripped.trim_matches('/').to_string()
}

/// Load configuration from the process environment, layered over an optional
/// TOML file and under explicit overrides (CLI flags).
///
/// Does not read `.env` files; the binary does that first.
pub fn load_app_config(
    file: Option<&Path>,
    overrides: &HashMap<String, String>,
) -> Result<AppConfig, ConfigError> {
    let file_vars = match file {
        Some(path) => FileConfig::load(path)?.into_vars(),
        None => HashMap::new(),
    };

    build_app_config(|key| {
        if let Some(value) = overrides.get(key) {
            return Ok(value.clone());
        }
        std::env::var(key).or_else(|err| file_vars.get(key).cloned().ok_or(err))
    })
}

/// Build and validate configuration from a key lookup.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|value| !value.trim().is_empty())
    };

    let require = |var: &str| -> Result<String, ConfigError> {
        optional(var).ok_or_else(|| ConfigError::MissingEnvironmentVariable {
            var_name: var.to_string(),
        })
    };

    let or_default =
        |var: &str, default: &str| -> String { optional(var).unwrap_or_else(|| default.to_string()) };

    fn parse_as<T: FromStr>(var: &str, raw: String) -> Result<T, ConfigError> {
        raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            field: var.to_string(),
            value: raw,
        })
    }

    let client_id = require("REDDIT_CLIENT_ID")?;
    let client_secret = require("REDDIT_CLIENT_SECRET")?;
    let user_agent = require("REDDIT_USER_AGENT")?;
    let username = optional("REDDIT_USERNAME");
    let password = optional("REDDIT_PASSWORD");
    if username.is_some() != password.is_some() {
        return Err(ConfigError::ValidationFailed {
            reason: "REDDIT_USERNAME and REDDIT_PASSWORD must be set together".to_string(),
        });
    }

    let reddit = RedditSettings {
        client_id,
        client_secret,
        user_agent,
        username,
        password,
        api_base_url: or_default("REDDIT_API_BASE_URL", DEFAULT_REDDIT_API_BASE_URL),
        token_url: or_default("REDDIT_TOKEN_URL", DEFAULT_REDDIT_TOKEN_URL),
        request_timeout_secs: parse_as(
            "REDDIT_REQUEST_TIMEOUT_SECS",
            or_default("REDDIT_REQUEST_TIMEOUT_SECS", "30"),
        )?,
    };

    let subreddit = normalize_subreddit(&require("SENTIMENT_SUBREDDIT")?);
    if subreddit.is_empty() || subreddit.contains('/') {
        return Err(ConfigError::InvalidValue {
            field: "SENTIMENT_SUBREDDIT".to_string(),
            value: subreddit,
        });
    }

    let feed = FeedSettings {
        subreddit,
        listing: or_default("SENTIMENT_LISTING", "new").parse()?,
        time_filter: or_default("SENTIMENT_TIME_FILTER", "day").parse()?,
        include_comments: parse_as(
            "SENTIMENT_INCLUDE_COMMENTS",
            or_default("SENTIMENT_INCLUDE_COMMENTS", "false").to_ascii_lowercase(),
        )?,
        page_limit: parse_as("SENTIMENT_PAGE_LIMIT", or_default("SENTIMENT_PAGE_LIMIT", "100"))?,
        max_pages: parse_as("SENTIMENT_MAX_PAGES", or_default("SENTIMENT_MAX_PAGES", "5"))?,
    };

    let provider: LlmProviderKind = or_default("LLM_PROVIDER", "openai").parse()?;
    let (api_key, model, base_url) = match provider {
        LlmProviderKind::OpenAi => (
            require("OPENAI_API_KEY")?,
            or_default("OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
            or_default("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
        ),
        LlmProviderKind::Anthropic => (
            require("ANTHROPIC_API_KEY")?,
            or_default("ANTHROPIC_MODEL", DEFAULT_ANTHROPIC_MODEL),
            or_default("ANTHROPIC_BASE_URL", DEFAULT_ANTHROPIC_BASE_URL),
        ),
    };

    let llm = LlmSettings {
        provider,
        api_key,
        model,
        base_url,
        max_input_chars: parse_as(
            "SENTIMENT_MAX_INPUT_CHARS",
            or_default("SENTIMENT_MAX_INPUT_CHARS", "4000"),
        )?,
        timeout_secs: parse_as(
            "SENTIMENT_LLM_TIMEOUT_SECS",
            or_default("SENTIMENT_LLM_TIMEOUT_SECS", "60"),
        )?,
    };

    let pipeline = PipelineSettings {
        classify_concurrency: parse_as(
            "SENTIMENT_CONCURRENCY",
            or_default("SENTIMENT_CONCURRENCY", "1"),
        )?,
        poll_interval_secs: parse_as(
            "SENTIMENT_POLL_INTERVAL_SECS",
            or_default("SENTIMENT_POLL_INTERVAL_SECS", "300"),
        )?,
        max_item_failures: parse_as(
            "SENTIMENT_MAX_ITEM_FAILURES",
            or_default("SENTIMENT_MAX_ITEM_FAILURES", "5"),
        )?,
    };

    let config = AppConfig {
        reddit,
        feed,
        llm,
        pipeline,
        database_url: or_default("SENTIMENT_DATABASE_URL", DEFAULT_DATABASE_URL),
    };
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |field: &str, value: u64, min: u64, max: u64| {
            if value < min || value > max {
                Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                })
            } else {
                Ok(())
            }
        };

        in_range(
            "SENTIMENT_PAGE_LIMIT",
            self.feed.page_limit as u64,
            1,
            MAX_PAGE_LIMIT as u64,
        )?;
        in_range("SENTIMENT_MAX_PAGES", self.feed.max_pages as u64, 1, 1000)?;
        in_range(
            "SENTIMENT_MAX_INPUT_CHARS",
            self.llm.max_input_chars as u64,
            1,
            1_000_000,
        )?;
        in_range("SENTIMENT_LLM_TIMEOUT_SECS", self.llm.timeout_secs, 1, 3600)?;
        in_range(
            "REDDIT_REQUEST_TIMEOUT_SECS",
            self.reddit.request_timeout_secs,
            1,
            3600,
        )?;
        in_range(
            "SENTIMENT_CONCURRENCY",
            self.pipeline.classify_concurrency as u64,
            1,
            64,
        )?;
        in_range(
            "SENTIMENT_MAX_ITEM_FAILURES",
            self.pipeline.max_item_failures as u64,
            1,
            1000,
        )?;

        for (field, value) in [
            ("REDDIT_API_BASE_URL", &self.reddit.api_base_url),
            ("REDDIT_TOKEN_URL", &self.reddit.token_url),
            ("LLM base URL", &self.llm.base_url),
        ] {
            url::Url::parse(value).map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.clone(),
            })?;
        }

        if !self.database_url.starts_with("sqlite:") {
            return Err(ConfigError::InvalidValue {
                field: "SENTIMENT_DATABASE_URL".to_string(),
                value: self.database_url.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from_map<'a>(
        map: &'a HashMap<&'a str, &'a str>,
    ) -> impl Fn(&str) -> Result<String, VarError> + 'a {
        move |key| {
            map.get(key)
                .map(|v| (*v).to_string())
                .ok_or(VarError::NotPresent)
        }
    }

    fn full_env<'a>() -> HashMap<&'a str, &'a str> {
        let mut m = HashMap::new();
        m.insert("REDDIT_CLIENT_ID", "client-id");
        m.insert("REDDIT_CLIENT_SECRET", "client-secret");
        m.insert("REDDIT_USER_AGENT", "reddit-sentiment/0.1 by tester");
        m.insert("SENTIMENT_SUBREDDIT", "rust");
        m.insert("OPENAI_API_KEY", "sk-test");
        m
    }

    #[test]
    fn test_defaults_applied() {
        let map = full_env();
        let config = build_app_config(lookup_from_map(&map)).unwrap();

        assert_eq!(config.feed.subreddit, "rust");
        assert_eq!(config.feed.listing, ListingKind::New);
        assert_eq!(config.feed.time_filter, TimeFilter::Day);
        assert!(!config.feed.include_comments);
        assert_eq!(config.feed.page_limit, 100);
        assert_eq!(config.feed.max_pages, 5);
        assert_eq!(config.llm.provider, LlmProviderKind::OpenAi);
        assert_eq!(config.llm.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.llm.max_input_chars, 4000);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.feed.feed_key(), "r/rust/new");
    }

    #[test]
    fn test_missing_client_id() {
        let mut map = full_env();
        map.remove("REDDIT_CLIENT_ID");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::MissingEnvironmentVariable { ref var_name }) if var_name == "REDDIT_CLIENT_ID"),
            "got: {result:?}"
        );
    }

    #[test]
    fn test_provider_key_required() {
        let mut map = full_env();
        map.insert("LLM_PROVIDER", "anthropic");
        let result = build_app_config(lookup_from_map(&map));
        assert!(
            matches!(result, Err(ConfigError::MissingEnvironmentVariable { ref var_name }) if var_name == "ANTHROPIC_API_KEY"),
            "got: {result:?}"
        );

        map.insert("ANTHROPIC_API_KEY", "ak-test");
        let config = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(config.llm.provider, LlmProviderKind::Anthropic);
        assert_eq!(config.llm.model, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(config.llm.api_key, "ak-test");
    }

    #[test]
    fn test_username_without_password_rejected() {
        let mut map = full_env();
        map.insert("REDDIT_USERNAME", "bot");
        let result = build_app_config(lookup_from_map(&map));
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("SENTIMENT_LISTING", "controversial"),
            ("SENTIMENT_TIME_FILTER", "decade"),
            ("SENTIMENT_PAGE_LIMIT", "250"),
            ("SENTIMENT_PAGE_LIMIT", "many"),
            ("SENTIMENT_CONCURRENCY", "0"),
            ("SENTIMENT_INCLUDE_COMMENTS", "sometimes"),
            ("LLM_PROVIDER", "llama"),
            ("SENTIMENT_DATABASE_URL", "postgres://localhost/db"),
            ("REDDIT_API_BASE_URL", "not a url"),
        ] {
            let mut map = full_env();
            map.insert(key, value);
            let result = build_app_config(lookup_from_map(&map));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{key}={value} should be rejected, got: {result:?}"
            );
        }
    }

    #[test]
    fn test_subreddit_prefix_stripped() {
        assert_eq!(normalize_subreddit("r/rust"), "rust");
        assert_eq!(normalize_subreddit("/r/rust/"), "rust");
        assert_eq!(normalize_subreddit(" AskReddit "), "AskReddit");

        let mut map = full_env();
        map.insert("SENTIMENT_SUBREDDIT", "r/Rust");
        let config = build_app_config(lookup_from_map(&map)).unwrap();
        assert_eq!(config.feed.subreddit, "Rust");
        assert_eq!(config.feed.feed_key(), "r/rust/new");
    }

    #[test]
    fn test_file_config_layers_under_env() {
        let file = FileConfig::from_toml(
            r#"
            database_url = "sqlite://from-file.db"

            [pipeline]
            subreddit = "programming"
            listing = "top"
            time_filter = "week"
            concurrency = 4
            "#,
        )
        .unwrap();
        let file_vars = file.into_vars();

        let mut env = full_env();
        env.remove("SENTIMENT_SUBREDDIT");
        env.insert("SENTIMENT_CONCURRENCY", "2");

        let config = build_app_config(|key| {
            env.get(key)
                .map(|v| (*v).to_string())
                .or_else(|| file_vars.get(key).cloned())
                .ok_or(VarError::NotPresent)
        })
        .unwrap();

        assert_eq!(config.feed.subreddit, "programming");
        assert_eq!(config.feed.listing, ListingKind::Top);
        assert_eq!(config.feed.time_filter, TimeFilter::Week);
        assert_eq!(config.pipeline.classify_concurrency, 2);
        assert_eq!(config.database_url, "sqlite://from-file.db");
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        let result = FileConfig::from_toml("[pipeline]\nsubbreddit = \"typo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let map = full_env();
        let config = build_app_config(lookup_from_map(&map)).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-test"));
        assert!(!rendered.contains("client-secret"));
    }
}
