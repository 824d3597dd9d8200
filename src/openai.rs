//! Minimal OpenAI-compatible chat backend.
//!
//! We only call chat.completions and return the first choice's text.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::llm::{ChatBackend, ChatRequest, LlmError};

const CLIENT_UA: &str = concat!("homework-gen/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct OpenAiBackend {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  json_mode: bool,
}

impl OpenAiBackend {
  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      api_key: api_key.into(),
      base_url: base_url.into().trim_end_matches('/').to_string(),
      json_mode: true,
    })
  }

  /// Request `response_format: {"type": "json_object"}`. Some compatible servers reject it.
  pub fn with_json_mode(mut self, json_mode: bool) -> Self {
    self.json_mode = json_mode;
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
  fn name(&self) -> &str {
    "openai"
  }

  #[instrument(level = "info", skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
  async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
    let url = format!("{}/chat/completions", self.base_url);
    let body = WireRequest {
      request,
      response_format: self.json_mode.then(|| ResponseFormat { r#type: "json_object".into() }),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, CLIENT_UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&body).send().await?;

    let status = res.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      let retry_after = res
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
      return Err(LlmError::RateLimited { retry_after });
    }
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(LlmError::Api { status: status.as_u16(), message });
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default().trim().to_string();

    if text.is_empty() {
      return Err(LlmError::InvalidResponse("completion contained no text".into()));
    }
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "OpenAI completion received");
    Ok(text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct WireRequest<'a> {
  #[serde(flatten)]
  request: &'a ChatRequest,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
