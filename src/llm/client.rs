//! Uniform call surface over the LLM provider: chat completion and
//! JSON-schema-constrained structured output. Every call is retried with
//! exponential backoff on transient failures and logged to the shared
//! [`crate::tracker::Tracker`]; cost is attributed via the published price
//! table in [`super::pricing`] and accumulated in a process-wide
//! [`CostAccumulator`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{LlmErrorKind, ResearchError, Result};
use crate::tracker::Tracker;

use super::pricing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cost_usd: Option<f64>,
}

/// Retry policy for transient LLM errors (rate limit, 5xx, connection
/// reset). Ported from the teacher's Grok reasoning client retry config.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub exponential_backoff: bool,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            exponential_backoff: true,
            max_delay_ms: 15_000,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms = if self.exponential_backoff {
            let exp_delay = self.initial_delay_ms.saturating_mul(1u64 << attempt.min(10));
            exp_delay.min(self.max_delay_ms)
        } else {
            self.initial_delay_ms
        };
        Duration::from_millis(delay_ms)
    }
}

/// Process-wide, in-memory cost accounting for LLM calls. Distinct from
/// [`crate::tracker::Tracker`]'s durable request log: this is the cheap,
/// always-available "how much have we spent" surface the orchestrator
/// checks before scheduling each task.
#[derive(Debug, Default)]
struct CostState {
    total_cost_usd: f64,
    per_model_cost_usd: HashMap<String, f64>,
    call_count: u64,
}

#[derive(Debug, Default)]
pub struct CostAccumulator(Mutex<CostState>);

impl CostAccumulator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, model: &str, cost: Option<f64>) {
        let mut state = self.0.lock().expect("cost accumulator mutex poisoned");
        state.call_count += 1;
        if let Some(cost) = cost {
            state.total_cost_usd += cost;
            *state.per_model_cost_usd.entry(model.to_string()).or_insert(0.0) += cost;
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.0.lock().expect("cost accumulator mutex poisoned").total_cost_usd
    }

    pub fn per_model_breakdown(&self) -> HashMap<String, f64> {
        self.0
            .lock()
            .expect("cost accumulator mutex poisoned")
            .per_model_cost_usd
            .clone()
    }

    pub fn call_count(&self) -> u64 {
        self.0.lock().expect("cost accumulator mutex poisoned").call_count
    }

    pub fn reset(&self) {
        *self.0.lock().expect("cost accumulator mutex poisoned") = CostState::default();
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryConfig,
    cost: Arc<CostAccumulator>,
    tracker: Option<Arc<Tracker>>,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(90))
                .build()
                .expect("reqwest client builder"),
            api_key: api_key.into(),
            base_url: base_url.into(),
            retry: RetryConfig::default(),
            cost: CostAccumulator::new(),
            tracker: None,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn cost_accumulator(&self) -> Arc<CostAccumulator> {
        self.cost.clone()
    }

    /// Plain chat completion. Returns the response text and its token
    /// usage/cost.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<(String, Usage)> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages_to_json(messages),
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = self.call_with_retry("chat.completions", &body).await?;
        let text = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ResearchError::llm(LlmErrorKind::Transport, "no content in response"))?
            .to_string();
        let usage = self.usage_from_response(model, &response);
        Ok((text, usage))
    }

    /// JSON-schema-constrained structured output. Retries once with a
    /// schema-emphasis message if the first attempt doesn't parse/validate,
    /// then fails with `StructuredOutput` — diagnostics (the raw response)
    /// are included in the error detail for the caller to preserve.
    pub async fn structured(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema_name: &str,
        json_schema: &Value,
        max_tokens: u32,
    ) -> Result<(Value, Usage)> {
        let mut attempt_messages = messages.to_vec();
        for attempt in 0..2 {
            let body = serde_json::json!({
                "model": model,
                "messages": messages_to_json(&attempt_messages),
                "max_tokens": max_tokens,
                "temperature": 0.2,
                "response_format": {
                    "type": "json_schema",
                    "json_schema": { "name": schema_name, "schema": json_schema },
                },
            });

            let response = self.call_with_retry("chat.completions", &body).await?;
            let text = response["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default();

            match extract_json(text) {
                Ok(parsed) => {
                    let usage = self.usage_from_response(model, &response);
                    return Ok((parsed, usage));
                }
                Err(detail) if attempt == 0 => {
                    warn!(schema = schema_name, %detail, "structured output did not parse, retrying with emphasis");
                    attempt_messages.push(ChatMessage::user(format!(
                        "Your previous response did not match the required JSON schema ({detail}). \
                         Respond with ONLY a single JSON object conforming exactly to the schema, no prose."
                    )));
                }
                Err(detail) => {
                    return Err(ResearchError::StructuredOutput {
                        call: schema_name.to_string(),
                        detail,
                    });
                }
            }
        }
        unreachable!("loop always returns within two attempts")
    }

    async fn call_with_retry(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let mut last_error = None;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                sleep(self.retry.delay_for_attempt(attempt - 1)).await;
            }

            let start = std::time::Instant::now();
            let send_result = self
                .http
                .post(format!("{}/{}", self.base_url, endpoint))
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let (status_code, outcome) = match send_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(json) => (status.as_u16(), Ok(json)),
                            Err(err) => (status.as_u16(), Err(ResearchError::Http(err))),
                        }
                    } else if status.as_u16() == 429 {
                        (
                            status.as_u16(),
                            Err(ResearchError::llm(LlmErrorKind::RateLimit, "rate limited")),
                        )
                    } else if status.is_server_error() {
                        (
                            status.as_u16(),
                            Err(ResearchError::llm(LlmErrorKind::Transport, format!("server error {status}"))),
                        )
                    } else {
                        let text = response.text().await.unwrap_or_default();
                        (
                            status.as_u16(),
                            Err(ResearchError::llm(LlmErrorKind::Transport, format!("http {status}: {text}"))),
                        )
                    }
                }
                Err(err) => (0, Err(ResearchError::Http(err))),
            };

            if let Some(tracker) = &self.tracker {
                tracker
                    .log_call(
                        "llm",
                        endpoint,
                        status_code,
                        start.elapsed(),
                        outcome.as_ref().err().map(|e| e.to_string()),
                        mask_params(body),
                    )
                    .await;
            }

            match outcome {
                Ok(json) => return Ok(json),
                Err(err) => {
                    let retryable = matches!(
                        &err,
                        ResearchError::Llm { kind: LlmErrorKind::Transport, .. }
                    ) || matches!(&err, ResearchError::Http(_));
                    // Rate limits are not retryable within the current run,
                    // mirroring integration error semantics.
                    if !retryable || attempt == self.retry.max_retries {
                        return Err(err);
                    }
                    debug!(attempt, "retrying llm call after transient error");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ResearchError::llm(LlmErrorKind::Transport, "exhausted retries")))
    }

    fn usage_from_response(&self, model: &str, response: &Value) -> Usage {
        let input_tokens = response["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = response["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        let cached_tokens = response["usage"]["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0);
        let cost_usd = pricing::cost_usd(model, input_tokens, output_tokens, cached_tokens);
        self.cost.record(model, cost_usd);
        Usage {
            input_tokens,
            output_tokens,
            cached_tokens,
            cost_usd,
        }
    }
}

fn messages_to_json(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

/// Parse a JSON object out of a model response, tolerating surrounding
/// prose the way the teacher's research worker does when the model ignores
/// "return ONLY JSON" instructions.
fn extract_json(text: &str) -> std::result::Result<Value, String> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => serde_json::from_str(&text[s..=e])
            .map_err(|err| format!("could not parse JSON from response: {err}")),
        _ => Err("response contained no JSON object or array".to_string()),
    }
}

/// Mask API keys and other obvious secrets before a request body reaches
/// the durable request log.
fn mask_params(body: &Value) -> Value {
    let mut masked = body.clone();
    if let Value::Object(map) = &mut masked {
        map.remove("api_key");
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_parses_bare_object() {
        assert_eq!(extract_json(r#"{"a":1}"#).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn extract_json_strips_surrounding_prose() {
        let text = "Sure, here you go:\n{\"a\": 1}\nHope that helps!";
        assert_eq!(extract_json(text).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn extract_json_fails_on_no_json() {
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            exponential_backoff: true,
            max_delay_ms: 1000,
        };
        assert_eq!(retry.delay_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.delay_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.delay_for_attempt(10).as_millis(), 1000);
    }

    #[test]
    fn cost_accumulator_tracks_totals_and_resets() {
        let acc = CostAccumulator::new();
        acc.record("grok-4-1-fast-reasoning", Some(0.10));
        acc.record("grok-4-1-fast-reasoning", Some(0.05));
        assert!((acc.total_cost_usd() - 0.15).abs() < 1e-9);
        assert_eq!(acc.call_count(), 2);
        acc.reset();
        assert_eq!(acc.total_cost_usd(), 0.0);
        assert_eq!(acc.call_count(), 0);
    }
}
