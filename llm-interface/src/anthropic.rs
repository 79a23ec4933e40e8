//! Anthropic messages API provider.

use crate::{
    endpoint, http_client, send_error, status_error, LlmProvider, LlmResponse, MAX_OUTPUT_TOKENS,
};
use reqwest::Client;
use sentiment_core::{CallOutcome, CoreError, LlmError, LlmSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER_NAME: &str = "anthropic";

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl AnthropicProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, CoreError> {
        Ok(Self {
            client: http_client(settings)?,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            url: endpoint(&settings.base_url, MESSAGES_PATH),
        })
    }

    async fn send(&self, system: &str, user: &str) -> Result<LlmResponse, CoreError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: 0.0,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(PROVIDER_NAME, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| send_error(PROVIDER_NAME, e))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<AnthropicErrorResponse>(&body) {
                Ok(error) => format!("{}: {}", error.error.error_type, error.error.message),
                Err(_) => body,
            };
            debug!(status = %status, error = %message, "Anthropic request failed");
            return Err(status_error(PROVIDER_NAME, &self.model, status, &headers, message).into());
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::InvalidResponseFormat {
                provider: PROVIDER_NAME.to_string(),
                details: e.to_string(),
            }
        })?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(LlmError::InvalidResponseFormat {
                provider: PROVIDER_NAME.to_string(),
                details: "response has no text content".to_string(),
            }
            .into());
        }

        Ok(LlmResponse {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> CallOutcome<LlmResponse> {
        self.send(system, user).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = AnthropicRequest {
            model: "claude-3-5-haiku-latest",
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: 0.0,
            system: "classify",
            messages: vec![AnthropicMessage {
                role: "user",
                content: "hello",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system"], "classify");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 256);
    }

    #[test]
    fn test_text_blocks_joined() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"{\"sentiment\":"},{"type":"text","text":"\"positive\"}"}],"model":"claude-3-5-haiku-20241022"}"#,
        )
        .unwrap();
        let text: String = response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();
        assert_eq!(text, r#"{"sentiment":"positive"}"#);
    }
}
