use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ModelParams, Stage};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Failures of a single chat completion call
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("provider returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("provider returned no message content")]
    EmptyResponse,

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::EmptyResponse => true,
            LlmError::Status { code, .. } => *code == 408 || *code == 429 || *code >= 500,
            LlmError::MissingApiKey | LlmError::Decode(_) => false,
        }
    }
}

/// One prompt sent on behalf of a stage
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub stage: Stage,
    /// Prompt identifier within the stage (build prompt id, audit criterion, section)
    pub label: String,
    pub prompt: String,
    pub params: ModelParams,
}

/// Anything that can answer a chat completion request
pub trait ChatBackend: Send + Sync {
    fn complete(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

impl<B: ChatBackend> ChatBackend for Arc<B> {
    fn complete(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        (**self).complete(request)
    }
}

/// Configuration for the OpenAI client
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (from OPENAI_API_KEY env var)
    pub api_key: String,
    /// Chat completions endpoint
    pub endpoint: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: CHAT_COMPLETIONS_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI chat completions client
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: &request.params.model,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            frequency_penalty: request.params.frequency_penalty,
            presence_penalty: request.params.presence_penalty,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let response: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        // Extract text from the first choice
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

impl ChatBackend for OpenAiClient {
    fn complete(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        self.send(request)
    }
}

fn status_error(status: StatusCode, body: String) -> LlmError {
    LlmError::Status {
        code: status.as_u16(),
        body,
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::EmptyResponse.is_retryable());
        assert!(LlmError::Status { code: 429, body: String::new() }.is_retryable());
        assert!(LlmError::Status { code: 503, body: String::new() }.is_retryable());
        assert!(!LlmError::Status { code: 401, body: String::new() }.is_retryable());
        assert!(!LlmError::MissingApiKey.is_retryable());
    }

    #[test]
    fn test_parse_completion_response() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "  hello  "}, "finish_reason": "stop"}
            ]
        }"#;
        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("  hello  "));
    }

    #[test]
    fn test_request_serializes_sampling_params() {
        let params = ModelParams::default();
        let body = CompletionRequest {
            model: &params.model,
            messages: vec![Message { role: "user", content: "hi" }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["max_tokens"], 4096);
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
