use crate::prompt::{parse_model_output, truncate_chars, user_prompt, SYSTEM_PROMPT};
use crate::{Classifier, LlmProvider};
use sentiment_core::{
    Classification, CoreError, RetryConfig, RetryExecutor, RetryFailure, RetryFailureReason,
    SentimentLabel,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Sentiment classification over an [`LlmProvider`], with truncation, retries
/// and label normalisation.
#[derive(Debug)]
pub struct SentimentClassifier<P> {
    provider: P,
    executor: RetryExecutor,
    max_input_chars: usize,
}

impl<P: LlmProvider> SentimentClassifier<P> {
    pub fn new(provider: P, max_input_chars: usize, retry: RetryConfig) -> Self {
        Self {
            provider,
            executor: RetryExecutor::new(retry),
            max_input_chars,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }
}

impl<P: LlmProvider> Classifier for SentimentClassifier<P> {
    async fn classify(&self, text: &str) -> Result<Classification, CoreError> {
        let prepared = truncate_chars(text, self.max_input_chars);
        if prepared.truncated {
            debug!(
                original_chars = prepared.original_chars,
                max_input_chars = self.max_input_chars,
                "Truncating classifier input"
            );
        }

        if prepared.text.trim().is_empty() {
            return Ok(Classification {
                label: SentimentLabel::Unknown,
                confidence: None,
                rationale: Some("no text to classify".to_string()),
                truncated: prepared.truncated,
                original_chars: prepared.original_chars,
                provider: self.provider.name().to_string(),
                model: self.provider.model().to_string(),
                attempts: 0,
                raw_response: String::new(),
            });
        }

        let prompt = user_prompt(&prepared.text);
        let calls = AtomicU32::new(0);

        let provider = &self.provider;
        let prompt = prompt.as_str();
        let calls_ref = &calls;
        let response = self
            .executor
            .execute("classify", move || async move {
                calls_ref.fetch_add(1, Ordering::Relaxed);
                provider.complete(SYSTEM_PROMPT, prompt).await
            })
            .await
            .map_err(classification_failed)?;

        let parsed = parse_model_output(&response.text);
        if parsed.label == SentimentLabel::Unknown {
            warn!(
                model = %response.model,
                "Model reply did not contain a recognised sentiment label"
            );
        }

        Ok(Classification {
            label: parsed.label,
            confidence: parsed.confidence,
            rationale: parsed.rationale,
            truncated: prepared.truncated,
            original_chars: prepared.original_chars,
            provider: self.provider.name().to_string(),
            model: response.model,
            attempts: calls.load(Ordering::Relaxed),
            raw_response: response.text,
        })
    }
}

fn classification_failed(failure: RetryFailure) -> CoreError {
    match failure.reason {
        RetryFailureReason::CircuitOpen => CoreError::ClassifierUnavailable {
            reason: failure.error.to_string(),
        },
        _ => CoreError::ClassificationFailed {
            attempts: failure.attempts,
            reason: failure.error.to_string(),
        },
    }
}
