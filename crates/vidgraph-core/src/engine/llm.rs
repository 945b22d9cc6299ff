// Vidgraph Engine — LLM Client
//
// Chat-completion and text-embedding client for OpenAI-compatible REST APIs.
// Non-streaming: the extraction passes need whole JSON bodies, not deltas.
// Some backends put the payload in `reasoning_content` instead of `content`;
// the non-empty one wins.

use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};

use crate::atoms::constants::{EMBEDDING_DIMENSIONS, LLM_MAX_TOKENS};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{ChatModel, Embedder};
use crate::atoms::types::LlmConfig;
use crate::engine::http::{is_retryable_status, parse_retry_after, retry_delay, MAX_RETRIES};

pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    temperature: f64,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        LlmClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
        }
    }

    /// POST one request with the shared retry loop. Auth errors are never
    /// retried; retryable statuses back off with jitter and Retry-After.
    async fn post_with_retry(&self, url: &str, body: &Value) -> EngineResult<Value> {
        let mut last_error = String::new();
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!(
                    "[llm] Retry {}/{} after {}ms",
                    attempt,
                    MAX_RETRIES,
                    delay.as_millis()
                );
            }

            let response = match self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = format!("HTTP request failed: {}", e);
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(EngineError::llm(&self.model, last_error));
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, truncate(&body_text, 200));
                error!("[llm] {} {}", url, last_error);

                // Auth errors are never retried
                if status == 401 || status == 403 {
                    return Err(EngineError::llm(&self.model, last_error));
                }
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return Err(EngineError::llm(&self.model, last_error));
            }

            return Ok(response.json::<Value>().await?);
        }

        Err(EngineError::llm(&self.model, last_error))
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_json(&self, system: &str, user: &str) -> EngineResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "max_tokens": LLM_MAX_TOKENS,
        });

        info!("[llm] Chat request model={}", self.model);
        let response = self.post_with_retry(&url, &body).await?;

        match extract_message_text(&response) {
            Some(text) => Ok(text),
            None => Err(EngineError::llm(
                &self.model,
                "empty response: neither content nor reasoning_content present",
            )),
        }
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.embedding_model,
            "input": text,
            "dimensions": EMBEDDING_DIMENSIONS,
        });

        let response = self.post_with_retry(&url, &body).await?;

        let embedding = response["data"][0]["embedding"].as_array().ok_or_else(|| {
            EngineError::llm(
                &self.embedding_model,
                "no 'data[0].embedding' array in response",
            )
        })?;

        let vec: Vec<f32> = embedding
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vec.is_empty() {
            return Err(EngineError::llm(&self.embedding_model, "empty embedding vector"));
        }
        Ok(vec)
    }
}

// ── Response handling ──────────────────────────────────────────────────────

/// Pull the message text from a chat-completion response, preferring
/// `content` and falling back to `reasoning_content` when content is empty.
fn extract_message_text(response: &Value) -> Option<String> {
    let message = &response["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("");
    if !content.trim().is_empty() {
        return Some(content.to_string());
    }
    let reasoning = message["reasoning_content"].as_str().unwrap_or("");
    if !reasoning.trim().is_empty() {
        warn!(
            "[llm] Model returned reasoning_content instead of content (finish_reason: {})",
            response["choices"][0]["finish_reason"]
                .as_str()
                .unwrap_or("unknown")
        );
        return Some(reasoning.to_string());
    }
    None
}

/// Truncate a string to `max` bytes on a char boundary, for log messages.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let response = json!({
            "choices": [{"message": {"content": "{\"concepts\": []}"}}]
        });
        assert_eq!(
            extract_message_text(&response).unwrap(),
            "{\"concepts\": []}"
        );
    }

    #[test]
    fn test_reasoning_content_fallback() {
        let response = json!({
            "choices": [{
                "message": {"content": "", "reasoning_content": "{\"concepts\": [1]}"},
                "finish_reason": "length",
            }]
        });
        assert_eq!(
            extract_message_text(&response).unwrap(),
            "{\"concepts\": [1]}"
        );
    }

    #[test]
    fn test_empty_response_is_none() {
        let response = json!({"choices": [{"message": {"content": ""}}]});
        assert!(extract_message_text(&response).is_none());
        assert!(extract_message_text(&json!({})).is_none());
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // Multibyte char straddling the cut is dropped whole
        let s = "héllo";
        let cut = truncate(s, 2);
        assert!(s.starts_with(cut));
        assert!(cut.len() <= 2);
    }
}
