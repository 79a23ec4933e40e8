use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use sentiment_core::{
    CallOutcome, Classification, CoreError, LlmError, LlmProviderKind, LlmSettings,
};

mod anthropic;
mod classifier;
mod openai;
pub mod prompt;

pub use anthropic::AnthropicProvider;
pub use classifier::SentimentClassifier;
pub use openai::OpenAiProvider;

/// Cooldown assumed when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 20;

/// Upper bound on completion length; the reply is a small JSON object.
pub(crate) const MAX_OUTPUT_TOKENS: u32 = 256;

/// Text returned by a provider for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    /// Model that actually served the request, as reported by the provider.
    pub model: String,
}

pub trait LlmProvider {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// One completion request. Never retries; the outcome says whether the
    /// caller should.
    async fn complete(&self, system: &str, user: &str) -> CallOutcome<LlmResponse>;
}

pub trait Classifier {
    async fn classify(&self, text: &str) -> Result<Classification, CoreError>;
}

/// Provider chosen at runtime from configuration.
#[derive(Debug)]
pub enum ConfiguredProvider {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
}

impl ConfiguredProvider {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, CoreError> {
        Ok(match settings.provider {
            LlmProviderKind::OpenAi => ConfiguredProvider::OpenAi(OpenAiProvider::new(settings)?),
            LlmProviderKind::Anthropic => {
                ConfiguredProvider::Anthropic(AnthropicProvider::new(settings)?)
            }
        })
    }
}

impl LlmProvider for ConfiguredProvider {
    fn name(&self) -> &str {
        match self {
            ConfiguredProvider::OpenAi(provider) => provider.name(),
            ConfiguredProvider::Anthropic(provider) => provider.name(),
        }
    }

    fn model(&self) -> &str {
        match self {
            ConfiguredProvider::OpenAi(provider) => provider.model(),
            ConfiguredProvider::Anthropic(provider) => provider.model(),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> CallOutcome<LlmResponse> {
        match self {
            ConfiguredProvider::OpenAi(provider) => provider.complete(system, user).await,
            ConfiguredProvider::Anthropic(provider) => provider.complete(system, user).await,
        }
    }
}

pub(crate) fn http_client(settings: &LlmSettings) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(settings.timeout())
        .build()
        .map_err(CoreError::Network)
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

pub(crate) fn send_error(provider: &str, error: reqwest::Error) -> CoreError {
    if error.is_timeout() {
        CoreError::Llm(LlmError::RequestTimeout {
            provider: provider.to_string(),
        })
    } else {
        CoreError::Network(error)
    }
}

/// Map a non-success HTTP status to the provider error taxonomy. `message` is
/// the provider's error text when the body carried one.
pub(crate) fn status_error(
    provider: &str,
    model: &str,
    status: StatusCode,
    headers: &HeaderMap,
    message: String,
) -> LlmError {
    let provider = provider.to_string();
    match status.as_u16() {
        429 if message.contains("insufficient_quota") || message.contains("credit balance") => {
            LlmError::InsufficientCredits { provider }
        }
        429 => LlmError::RateLimitExceeded {
            provider,
            retry_after: retry_after_secs(headers),
        },
        401 | 403 => LlmError::AuthenticationFailed { provider },
        402 => LlmError::InsufficientCredits { provider },
        404 => LlmError::ModelNotAvailable {
            model: model.to_string(),
        },
        408 => LlmError::RequestTimeout { provider },
        code @ 500..=599 => LlmError::ServiceUnavailable {
            provider,
            status_code: code,
        },
        _ => LlmError::InvalidPrompt {
            reason: format!("{} {}", status, message),
        },
    }
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|secs| secs.max(0.0).ceil() as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use sentiment_core::{get_retry_strategy, RetryStrategy};
    use std::time::Duration;

    fn strategy(status: u16, headers: &HeaderMap, message: &str) -> RetryStrategy {
        let error = status_error(
            "openai",
            "gpt-4.1-mini",
            StatusCode::from_u16(status).unwrap(),
            headers,
            message.to_string(),
        );
        get_retry_strategy(&CoreError::Llm(error))
    }

    #[test]
    fn test_status_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

        assert_eq!(
            strategy(429, &headers, "slow down"),
            RetryStrategy::RetryWithDelay(Duration::from_secs(7))
        );
        assert_eq!(
            strategy(429, &HeaderMap::new(), "slow down"),
            RetryStrategy::RetryWithDelay(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS))
        );
        assert_eq!(strategy(500, &headers, ""), RetryStrategy::Retry);
        assert_eq!(strategy(529, &headers, "overloaded"), RetryStrategy::Retry);
        assert_eq!(strategy(401, &headers, ""), RetryStrategy::NoRetry);
        assert_eq!(strategy(400, &headers, "bad request"), RetryStrategy::NoRetry);
        assert_eq!(
            strategy(429, &headers, "insufficient_quota"),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        assert_eq!(
            endpoint("https://api.openai.com/", "/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://127.0.0.1:9000", "/v1/messages"),
            "http://127.0.0.1:9000/v1/messages"
        );
    }
}
