//! OpenAI chat completions provider.

use crate::{
    endpoint, http_client, send_error, status_error, LlmProvider, LlmResponse, MAX_OUTPUT_TOKENS,
};
use reqwest::Client;
use sentiment_core::{CallOutcome, CoreError, LlmError, LlmSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const PROVIDER_NAME: &str = "openai";

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, CoreError> {
        Ok(Self {
            client: http_client(settings)?,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            url: endpoint(&settings.base_url, CHAT_COMPLETIONS_PATH),
        })
    }

    async fn send(&self, system: &str, user: &str) -> Result<LlmResponse, CoreError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: system,
                },
                OpenAiMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
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
            let message = match serde_json::from_str::<OpenAiErrorResponse>(&body) {
                Ok(error) => match error.error.code {
                    Some(code) => format!("{}: {}", code, error.error.message),
                    None => error.error.message,
                },
                Err(_) => body,
            };
            debug!(status = %status, error = %message, "OpenAI request failed");
            return Err(status_error(PROVIDER_NAME, &self.model, status, &headers, message).into());
        }

        let parsed: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::InvalidResponseFormat {
                provider: PROVIDER_NAME.to_string(),
                details: e.to_string(),
            }
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            LlmError::InvalidResponseFormat {
                provider: PROVIDER_NAME.to_string(),
                details: "response has no choices".to_string(),
            }
        })?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(LlmError::ContentFiltered {
                reason: "completion stopped by content filter".to_string(),
            }
            .into());
        }

        let text = choice.message.content.ok_or_else(|| LlmError::InvalidResponseFormat {
            provider: PROVIDER_NAME.to_string(),
            details: "choice has no message content".to_string(),
        })?;

        Ok(LlmResponse {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

impl LlmProvider for OpenAiProvider {
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
