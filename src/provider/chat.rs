//! OpenAI-compatible chat-completions client implementing all three services.

use super::prompts;
use super::{
    ContentRequest, ContentResponse, ContentService, OutlineRequest, OutlineResponse,
    OutlineService, SummaryRequest, SummaryResponse, SummaryService, UnitDraft,
};
use crate::config::ProviderConfig;
use crate::error::{ApiError, ServiceError};
use crate::types::count_words;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Map a non-success HTTP status to a classified error.
pub fn classify_status(status: u16, body: &str) -> ServiceError {
    match status {
        429 => ServiceError::RateLimited(body.to_string()),
        408 => ServiceError::Timeout(body.to_string()),
        500..=599 => ServiceError::Server {
            status,
            message: body.to_string(),
        },
        _ => ServiceError::Rejected(format!("HTTP {}: {}", status, body)),
    }
}

fn map_http_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        classify_status(status.as_u16(), &error.to_string())
    } else if error.is_connect() || error.is_request() {
        ServiceError::Unavailable(error.to_string())
    } else if error.is_decode() || error.is_body() {
        ServiceError::Malformed(error.to_string())
    } else {
        ServiceError::Rejected(format!("HTTP error: {}", error))
    }
}

fn build_http_client(config: &ProviderConfig) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| ApiError::ProviderNotConfigured(format!("Failed to create HTTP client: {}", e)))
}

/// Chat-completions client.
pub struct ChatCompletionsClient {
    client: Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatCompletionsClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ApiError> {
        config.validate().map_err(ApiError::ProviderNotConfigured)?;
        Ok(Self {
            client: build_http_client(config)?,
            model: config.model.clone(),
            api_key: config.resolve_api_key(),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Send one completion request and return the reply text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status.as_u16(), &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(format!("Failed to parse response: {}", e)))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::Malformed("No choices in response".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

/// Slice out the outermost `open`..`close` span, skipping code fences and
/// any chatter around the payload.
pub fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Parse an outline reply. Entries that are not objects with a title become `None`.
pub fn parse_outline(text: &str) -> Result<OutlineResponse, ServiceError> {
    let payload = extract_json(text, '[', ']')
        .ok_or_else(|| ServiceError::Malformed("Outline reply holds no JSON array".to_string()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(payload)
        .map_err(|e| ServiceError::Malformed(format!("Outline JSON: {}", e)))?;
    let units = values
        .into_iter()
        .map(|value| {
            if value.is_object() {
                serde_json::from_value::<UnitDraft>(value).ok()
            } else {
                None
            }
        })
        .collect();
    Ok(OutlineResponse { units })
}

pub fn parse_summary(text: &str) -> Result<SummaryResponse, ServiceError> {
    let payload = extract_json(text, '{', '}')
        .ok_or_else(|| ServiceError::Malformed("Summary reply holds no JSON object".to_string()))?;
    serde_json::from_str(payload).map_err(|e| ServiceError::Malformed(format!("Summary JSON: {}", e)))
}

#[async_trait]
impl OutlineService for ChatCompletionsClient {
    async fn generate_outline(
        &self,
        request: OutlineRequest,
    ) -> Result<OutlineResponse, ServiceError> {
        let reply = self.complete(&prompts::outline_messages(&request)).await?;
        parse_outline(&reply)
    }
}

#[async_trait]
impl ContentService for ChatCompletionsClient {
    async fn generate_content(
        &self,
        request: ContentRequest,
    ) -> Result<ContentResponse, ServiceError> {
        let text = self.complete(&prompts::content_messages(&request)).await?;
        let word_count = count_words(&text);
        Ok(ContentResponse { text, word_count })
    }
}

#[async_trait]
impl SummaryService for ChatCompletionsClient {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        let reply = self.complete(&prompts::summary_messages(&request)).await?;
        parse_summary(&reply)
    }
}
