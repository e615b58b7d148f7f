//! Hugging Face text-generation client
//!
//! Fresh intents come from a hosted instruction model. The client retries
//! transient failures (network, model still loading) with a short fixed
//! delay, but gives up immediately when the API quota is exhausted so a
//! burst of questions cannot pile up doomed retries.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Produces the raw model answer for an analysis prompt.
#[async_trait]
pub trait IntentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

enum Attempt {
    Success(String),
    FailFast(EngineError),
    Retry(EngineError),
}

pub struct HfTextGenClient {
    client: reqwest::Client,
    model_url: String,
    api_key: String,
}

impl HfTextGenClient {
    pub fn new(model_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            model_url: model_url.to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn call_model(&self, prompt: &str) -> Attempt {
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": 1000,
                "temperature": 0.1,
                "return_full_text": false,
            }
        });

        let response = match self
            .client
            .post(&self.model_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry(EngineError::Generation(format!(
                    "Hugging Face request failed: {}",
                    e
                )))
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Attempt::Retry(EngineError::Generation(format!(
                    "Failed to read model response: {}",
                    e
                )))
            }
        };

        if is_quota_error(status, &text) {
            return Attempt::FailFast(EngineError::Generation(format!(
                "Hugging Face quota reached ({}): {}",
                status,
                truncate_body(&text)
            )));
        }
        if !(200..300).contains(&status) {
            return Attempt::Retry(EngineError::Generation(format!(
                "Model error ({}): {}",
                status,
                truncate_body(&text)
            )));
        }

        match extract_generated_text(&text) {
            Ok(generated) => Attempt::Success(generated),
            Err(e) => Attempt::FailFast(e),
        }
    }
}

#[async_trait]
impl IntentGenerator for HfTextGenClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.call_model(prompt).await {
                Attempt::Success(text) => {
                    debug!(attempt, chars = text.chars().count(), "model answered");
                    return Ok(text);
                }
                Attempt::FailFast(e) => return Err(e),
                Attempt::Retry(e) => {
                    warn!(attempt, error = %e, "model call failed, retrying");
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| EngineError::Generation("model unreachable".to_string())))
    }
}

/// Quota exhaustion must not be retried, unlike a model that is still
/// loading or a transient 5xx.
pub fn is_quota_error(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let lowered = body.to_lowercase();
    lowered.contains("rate limit") || lowered.contains("quota")
}

fn extract_generated_text(raw: &str) -> Result<String> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| EngineError::Generation(format!("Model response is not JSON: {}", e)))?;

    // Inference API answers with a one-element array; dedicated endpoints
    // sometimes answer with a bare object.
    if let Some(text) = value
        .as_array()
        .and_then(|a| a.first())
        .and_then(|entry| entry.get("generated_text"))
        .and_then(|t| t.as_str())
    {
        return Ok(text.to_string());
    }
    if let Some(text) = value.get("generated_text").and_then(|t| t.as_str()) {
        return Ok(text.to_string());
    }
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(EngineError::Generation(format!(
            "Model returned an error: {}",
            error
        )));
    }
    Err(EngineError::Generation(
        "No generated_text in model response".to_string(),
    ))
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
