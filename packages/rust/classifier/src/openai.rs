//! OpenAI-compatible chat completions classifier.
//!
//! Works against `https://api.openai.com/v1/chat/completions` or any endpoint
//! that speaks the same protocol and supports `response_format` with a JSON
//! schema (OpenRouter, Azure OpenAI, local proxies).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use linksort_shared::{ClassifierConfig, Item, LinksortError, Result};

use crate::prompt::{SYSTEM_PROMPT, build_user_message};
use crate::response::{parse_categorization, response_schema};
use crate::{ClassificationResult, Classifier};

/// Request body for the chat completions API.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

/// Response from the chat completions API.
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Error response from the API.
#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Classifier backed by a chat completions model with structured output.
#[derive(Clone)]
pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    config: ClassifierConfig,
}

impl OpenAiClassifier {
    /// Create a classifier from runtime config and an API key.
    pub fn new(config: ClassifierConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LinksortError::Classifier(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    fn request_body(&self, batch: &[Item], vocabulary: &[String]) -> Result<ChatRequest<'_>> {
        Ok(ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_message(batch, vocabulary)?,
                },
            ],
            response_format: serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "categorization",
                    "strict": true,
                    "schema": response_schema(),
                }
            }),
        })
    }
}

impl Classifier for OpenAiClassifier {
    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, batch = batch.len()))]
    async fn classify(
        &self,
        batch: &[Item],
        vocabulary: &[String],
    ) -> Result<ClassificationResult> {
        let body = self.request_body(batch, vocabulary)?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LinksortError::Classifier(format!(
                        "request timed out after {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    LinksortError::Classifier(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| text.chars().take(200).collect());
            return Err(LinksortError::Classifier(format!("HTTP {status}: {message}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LinksortError::parse(format!("invalid chat completion response: {e}")))?;

        if let Some(usage) = &chat.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "classifier usage"
            );
        }

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LinksortError::Classifier("response contained no choices".into()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LinksortError::Classifier(format!("model refused: {refusal}")));
        }

        let content = choice.message.content.ok_or_else(|| {
            LinksortError::Classifier(format!(
                "response had no content (finish_reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        parse_categorization(&content)
    }
}
