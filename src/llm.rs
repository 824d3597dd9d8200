//! Generation client: turns a prompt into raw model text.
//!
//! - `ChatBackend` is the seam to the hosted model (see `openai.rs`), with an
//!   offline backend that answers from seed data when no API key is configured.
//! - `LlmClient` adds request fingerprinting, the injected response cache, and
//!   retries with exponential backoff for transient transport failures.
//!
//! Validation of the returned text happens upstream and is never retried here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheError, CacheStore};
use crate::seeds::offline_response;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Errors from a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("API error (status {status}): {message}")]
  Api { status: u16, message: String },

  #[error("rate limited (retry after {retry_after:?}s)")]
  RateLimited { retry_after: Option<u64> },

  #[error("invalid response: {0}")]
  InvalidResponse(String),
}

impl LlmError {
  /// Network trouble, rate limits and server-side errors are worth another try.
  pub fn is_transient(&self) -> bool {
    match self {
      LlmError::Http(e) => !e.is_builder() && !e.is_decode(),
      LlmError::Api { status, .. } => *status >= 500 || *status == 408,
      LlmError::RateLimited { .. } => true,
      LlmError::InvalidResponse(_) => false,
    }
  }

  /// Wait the server asked for before the next attempt (`Retry-After`).
  pub fn retry_after(&self) -> Option<Duration> {
    match self {
      LlmError::RateLimited { retry_after: Some(secs) } => Some(Duration::from_secs(*secs)),
      _ => None,
    }
  }
}

/// A generation call that did not produce text.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
  #[error("prompt must not be empty")]
  EmptyPrompt,

  #[error("generation failed after {attempts} attempt(s): {source}")]
  Exhausted { attempts: u32, #[source] source: LlmError },

  #[error("generation failed: {source}")]
  Rejected { #[source] source: LlmError },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".into(), content: content.into() }
  }
}

/// What goes over the wire to the model, minus transport details.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
  pub model: String,
  pub messages: Vec<ChatMessage>,
  pub temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_tokens: Option<u32>,
  /// Options the client does not interpret, forwarded verbatim.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
  fn name(&self) -> &str;

  /// Whether responses from this backend may be cached.
  fn cacheable(&self) -> bool {
    true
  }

  async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Used when no API key is configured so the pipeline still runs end to end.
#[derive(Debug, Default)]
pub struct OfflineBackend;

#[async_trait]
impl ChatBackend for OfflineBackend {
  fn name(&self) -> &str {
    "offline"
  }

  fn cacheable(&self) -> bool {
    false
  }

  async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
    Ok(offline_response())
  }
}

/// Per-call generation options. Insertion order is kept for the request body
/// but never affects the fingerprint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationOptions {
  entries: Vec<(String, Value)>,
}

impl GenerationOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set `key`, replacing an earlier value for the same key.
  pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.entries.push((key, value)),
    }
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
  }

  pub fn temperature(&self) -> Option<f64> {
    self.get("temperature").and_then(Value::as_f64)
  }

  pub fn max_tokens(&self) -> Option<u32> {
    self.get("max_tokens").and_then(Value::as_u64).map(|v| v.min(u32::MAX as u64) as u32)
  }

  fn sorted(&self) -> Vec<(&str, &Value)> {
    let mut pairs: Vec<(&str, &Value)> = self.entries.iter().map(|(k, v)| (k.as_str(), v)).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
  }

  fn extra(&self) -> Map<String, Value> {
    self
      .entries
      .iter()
      .filter(|(k, _)| k != "temperature" && k != "max_tokens")
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}

/// Deterministic cache key: hex SHA-256 over model, prompt and the options
/// sorted by key.
pub fn fingerprint(model: &str, prompt: &str, options: &GenerationOptions) -> String {
  let canonical = json!({
    "model": model,
    "prompt": prompt,
    "params": options.sorted(),
  });
  hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub min_delay: Duration,
  pub max_delay: Duration,
  /// Upper bound of random extra delay added to each wait.
  pub jitter: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(1),
      min_delay: Duration::from_secs(4),
      max_delay: Duration::from_secs(10),
      jitter: Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  pub fn with_max_attempts(mut self, attempts: u32) -> Self {
    self.max_attempts = attempts.max(1);
    self
  }

  /// Wait after the `attempt`-th failure (1-based), before jitter.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let raw = self.base_delay.saturating_mul(factor);
    raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
  }

  /// Wait after the `attempt`-th failure with `error`: the jittered backoff, but
  /// never less than a server-requested `Retry-After`.
  pub fn wait_after(&self, attempt: u32, error: &LlmError) -> Duration {
    let backoff = self.jittered(attempt);
    error.retry_after().map_or(backoff, |requested| backoff.max(requested))
  }

  fn jittered(&self, attempt: u32) -> Duration {
    let jitter_ms = self.jitter.as_millis() as u64;
    let extra = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=jitter_ms) };
    self.delay_for(attempt) + Duration::from_millis(extra)
  }
}

pub struct LlmClient {
  backend: Box<dyn ChatBackend>,
  model: String,
  cache: Option<Box<dyn CacheStore>>,
  retry: RetryPolicy,
}

impl LlmClient {
  pub fn new(backend: Box<dyn ChatBackend>, model: impl Into<String>) -> Self {
    Self { backend, model: model.into(), cache: None, retry: RetryPolicy::default() }
  }

  pub fn with_cache(mut self, cache: Box<dyn CacheStore>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  pub fn backend_name(&self) -> &str {
    self.backend.name()
  }

  /// Send `prompt` and return the raw response text.
  #[instrument(level = "info", skip(self, prompt, options), fields(model = %self.model, backend = %self.backend.name(), prompt_len = prompt.len()))]
  pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, GenerationError> {
    if prompt.trim().is_empty() {
      return Err(GenerationError::EmptyPrompt);
    }

    let cache = self.cache.as_deref().filter(|_| self.backend.cacheable());
    let key = fingerprint(&self.model, prompt, options);

    if let Some(cache) = cache {
      match cache.get(&key).await {
        Ok(Some(hit)) => {
          info!(target: "homework_gen", key = %&key[..12], "Cache hit; skipping model call");
          return Ok(hit);
        }
        Ok(None) => debug!(target: "homework_gen", key = %&key[..12], "Cache miss"),
        Err(e) => warn!(target: "homework_gen", error = %e, "Cache read failed; calling model"),
      }
    }

    let request = ChatRequest {
      model: self.model.clone(),
      messages: vec![ChatMessage::user(prompt)],
      temperature: options.temperature().unwrap_or(DEFAULT_TEMPERATURE) as f32,
      max_tokens: Some(options.max_tokens().unwrap_or(DEFAULT_MAX_TOKENS)),
      extra: options.extra(),
    };

    let text = self.call_with_retry(&request).await?;

    if let Some(cache) = cache {
      if let Err(e) = cache.set(&key, &text).await {
        warn!(target: "homework_gen", error = %e, "Cache write failed; continuing");
      }
    }
    Ok(text)
  }

  async fn call_with_retry(&self, request: &ChatRequest) -> Result<String, GenerationError> {
    let max_attempts = self.retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      let start = Instant::now();
      match self.backend.complete(request).await {
        Ok(text) => {
          info!(target: "homework_gen", attempt, elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
          return Ok(text);
        }
        Err(e) if !e.is_transient() => {
          warn!(target: "homework_gen", attempt, error = %e, "Model call failed; not retryable");
          return Err(GenerationError::Rejected { source: e });
        }
        Err(e) if attempt >= max_attempts => {
          warn!(target: "homework_gen", attempt, error = %e, "Model call failed; retries exhausted");
          return Err(GenerationError::Exhausted { attempts: attempt, source: e });
        }
        Err(e) => {
          let delay = self.retry.wait_after(attempt, &e);
          warn!(target: "homework_gen", attempt, delay_ms = delay.as_millis() as u64, error = %e, "Model call failed; retrying");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
      }
    }
  }

  /// Remove every cached response. Returns 0 when caching is off.
  pub async fn clear_cache(&self) -> Result<usize, CacheError> {
    match &self.cache {
      Some(cache) => cache.clear().await,
      None => Ok(0),
    }
  }

  /// Tear down the client, closing the cache store.
  pub async fn close(self) -> Result<(), CacheError> {
    match self.cache {
      Some(cache) => cache.close().await,
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCache;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  /// Backend that replays scripted results and counts calls.
  struct Scripted {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ChatRequest>>>,
  }

  impl Scripted {
    fn new(replies: Vec<Result<String, LlmError>>) -> (Self, Arc<AtomicUsize>) {
      let calls = Arc::new(AtomicUsize::new(0));
      let backend = Self {
        replies: Mutex::new(replies.into()),
        calls: calls.clone(),
        seen: Arc::new(Mutex::new(Vec::new())),
      };
      (backend, calls)
    }
  }

  #[async_trait]
  impl ChatBackend for Scripted {
    fn name(&self) -> &str {
      "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(request.clone());
      self
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Ok("default".into()))
    }
  }

  fn no_wait() -> RetryPolicy {
    RetryPolicy {
      max_attempts: 3,
      base_delay: Duration::ZERO,
      min_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
      jitter: Duration::ZERO,
    }
  }

  fn unavailable() -> LlmError {
    LlmError::Api { status: 503, message: "overloaded".into() }
  }

  #[test]
  fn fingerprint_ignores_option_insertion_order() {
    let a = GenerationOptions::new().set("temperature", 0.2).set("max_tokens", 100);
    let b = GenerationOptions::new().set("max_tokens", 100).set("temperature", 0.2);
    assert_ne!(a, b);
    assert_eq!(fingerprint("m", "p", &a), fingerprint("m", "p", &b));

    let key = fingerprint("m", "p", &a);
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn fingerprint_changes_with_inputs() {
    let o = GenerationOptions::new().set("temperature", 0.2);
    let base = fingerprint("m", "p", &o);
    assert_ne!(base, fingerprint("other", "p", &o));
    assert_ne!(base, fingerprint("m", "p2", &o));
    assert_ne!(base, fingerprint("m", "p", &o.clone().set("temperature", 0.3)));
  }

  #[test]
  fn options_replace_existing_keys() {
    let o = GenerationOptions::new().set("temperature", 0.2).set("temperature", 0.7).set("seed", 7);
    assert_eq!(o.temperature(), Some(0.7));
    assert_eq!(o.extra().get("seed"), Some(&json!(7)));
    assert!(o.extra().get("temperature").is_none());
  }

  #[test]
  fn backoff_is_exponential_and_clamped() {
    let p = RetryPolicy::default();
    assert_eq!(p.delay_for(1), Duration::from_secs(4));
    assert_eq!(p.delay_for(3), Duration::from_secs(4));
    assert_eq!(p.delay_for(4), Duration::from_secs(8));
    assert_eq!(p.delay_for(5), Duration::from_secs(10));
    assert_eq!(p.delay_for(40), Duration::from_secs(10));
  }

  #[test]
  fn server_retry_after_extends_backoff() {
    let limited = LlmError::RateLimited { retry_after: Some(7) };
    assert_eq!(no_wait().wait_after(1, &limited), Duration::from_secs(7));

    let p = RetryPolicy { jitter: Duration::ZERO, ..RetryPolicy::default() };
    assert_eq!(p.wait_after(1, &limited), Duration::from_secs(7));
    assert_eq!(p.wait_after(1, &LlmError::RateLimited { retry_after: Some(1) }), Duration::from_secs(4));
    assert_eq!(p.wait_after(1, &LlmError::RateLimited { retry_after: None }), Duration::from_secs(4));
    assert_eq!(p.wait_after(1, &unavailable()), Duration::from_secs(4));
    assert_eq!(unavailable().retry_after(), None);
  }

  #[test]
  fn transient_classification() {
    assert!(unavailable().is_transient());
    assert!(LlmError::RateLimited { retry_after: Some(1) }.is_transient());
    assert!(!LlmError::Api { status: 401, message: "bad key".into() }.is_transient());
    assert!(!LlmError::InvalidResponse("empty".into()).is_transient());
  }

  #[tokio::test]
  async fn retries_transient_failures_then_succeeds() {
    let (backend, calls) = Scripted::new(vec![Err(unavailable()), Err(LlmError::RateLimited { retry_after: None }), Ok("ok".into())]);
    let client = LlmClient::new(Box::new(backend), "m").with_retry(no_wait());
    let out = client.generate("hello", &GenerationOptions::new()).await.unwrap();
    assert_eq!(out, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn gives_up_after_max_attempts() {
    let (backend, calls) = Scripted::new(vec![Err(unavailable()), Err(unavailable()), Err(unavailable()), Ok("late".into())]);
    let client = LlmClient::new(Box::new(backend), "m").with_retry(no_wait());
    let err = client.generate("hello", &GenerationOptions::new()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn does_not_retry_permanent_failures() {
    let (backend, calls) = Scripted::new(vec![Err(LlmError::Api { status: 401, message: "bad key".into() })]);
    let client = LlmClient::new(Box::new(backend), "m").with_retry(no_wait());
    let err = client.generate("hello", &GenerationOptions::new()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Rejected { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn empty_prompt_never_reaches_backend() {
    let (backend, calls) = Scripted::new(vec![]);
    let client = LlmClient::new(Box::new(backend), "m");
    let err = client.generate("   ", &GenerationOptions::new()).await.unwrap_err();
    assert!(matches!(err, GenerationError::EmptyPrompt));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn cache_hit_skips_backend() {
    let (backend, calls) = Scripted::new(vec![Ok("first".into()), Ok("second".into())]);
    let client = LlmClient::new(Box::new(backend), "m")
      .with_cache(Box::new(MemoryCache::default()))
      .with_retry(no_wait());
    let opts = GenerationOptions::new().set("temperature", 0.1);

    assert_eq!(client.generate("p", &opts).await.unwrap(), "first");
    assert_eq!(client.generate("p", &opts).await.unwrap(), "first");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Different options are a different request.
    let other = opts.clone().set("temperature", 0.9);
    assert_eq!(client.generate("p", &other).await.unwrap(), "second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(client.clear_cache().await.unwrap(), 2);
    client.close().await.unwrap();
  }

  #[tokio::test]
  async fn without_cache_every_call_reaches_backend() {
    let (backend, calls) = Scripted::new(vec![Ok("a".into()), Ok("b".into())]);
    let client = LlmClient::new(Box::new(backend), "m").with_retry(no_wait());
    assert_eq!(client.generate("p", &GenerationOptions::new()).await.unwrap(), "a");
    assert_eq!(client.generate("p", &GenerationOptions::new()).await.unwrap(), "b");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.clear_cache().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn failed_calls_are_not_cached() {
    let (backend, calls) = Scripted::new(vec![Err(LlmError::Api { status: 400, message: "bad".into() }), Ok("ok".into())]);
    let cache = MemoryCache::default();
    let client = LlmClient::new(Box::new(backend), "m").with_cache(Box::new(cache)).with_retry(no_wait());
    assert!(client.generate("p", &GenerationOptions::new()).await.is_err());
    assert_eq!(client.generate("p", &GenerationOptions::new()).await.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn request_carries_options() {
    let (backend, _calls) = Scripted::new(vec![Ok("ok".into())]);
    let seen = backend.seen.clone();
    let client = LlmClient::new(Box::new(backend), "gpt-test").with_retry(no_wait());
    let opts = GenerationOptions::new().set("max_tokens", 256).set("temperature", 0.5).set("top_p", 0.9);
    client.generate("prompt text", &opts).await.unwrap();

    let seen = seen.lock().unwrap();
    let req = &seen[0];
    assert_eq!(req.model, "gpt-test");
    assert_eq!(req.messages, vec![ChatMessage::user("prompt text")]);
    assert_eq!(req.max_tokens, Some(256));
    assert!((req.temperature - 0.5).abs() < 1e-6);
    assert_eq!(req.extra.get("top_p"), Some(&json!(0.9)));
  }

  #[tokio::test]
  async fn offline_backend_bypasses_cache() {
    let cache = Arc::new(MemoryCache::default());
    struct Shared(Arc<MemoryCache>);
    #[async_trait]
    impl CacheStore for Shared {
      async fn get(&self, key: &str) -> crate::cache::CacheResult<Option<String>> { self.0.get(key).await }
      async fn set(&self, key: &str, value: &str) -> crate::cache::CacheResult<()> { self.0.set(key, value).await }
      async fn clear(&self) -> crate::cache::CacheResult<usize> { self.0.clear().await }
    }

    let client = LlmClient::new(Box::new(OfflineBackend), "m").with_cache(Box::new(Shared(cache.clone())));
    let out = client.generate("anything", &GenerationOptions::new()).await.unwrap();
    assert!(out.contains("assignments"));
    assert_eq!(cache.len(), 0);
  }
}
