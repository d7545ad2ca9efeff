//! Bedrock-style hosted model client
//!
//! Speaks a minimal messages-API JSON contract: the endpoint, model id
//! and key are opaque configuration. Enforces the per-call timeout and
//! the pipeline-wide token budget; every failure path returns `None`.

use super::{AiCollaborator, CallRecord, PromptContext};
use crate::config::AiConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rough chars-per-token divisor used for budget accounting
const CHARS_PER_TOKEN: u64 = 4;

pub struct BedrockCollaborator {
    http: reqwest::Client,
    config: AiConfig,
    tokens_spent: AtomicU64,
    records: Mutex<Vec<CallRecord>>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl BedrockCollaborator {
    pub fn new(config: AiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens_spent: AtomicU64::new(0),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Tokens spent so far against the pipeline-wide budget
    pub fn tokens_spent(&self) -> u64 {
        self.tokens_spent.load(Ordering::Relaxed)
    }

    fn record(&self, attempted: bool, succeeded: bool, latency_ms: u64) {
        self.records.lock().expect("records lock").push(CallRecord {
            attempted,
            succeeded,
            latency_ms,
            model_id: self.config.model_id.clone(),
        });
    }

    /// Reserve budget for a call. Returns false when the call would
    /// exceed the pipeline-wide cap.
    fn reserve_budget(&self, prompt: &str) -> bool {
        let estimate = prompt.len() as u64 / CHARS_PER_TOKEN + self.config.max_tokens as u64;
        let mut current = self.tokens_spent.load(Ordering::Relaxed);
        loop {
            if current + estimate > self.config.token_budget {
                return false;
            }
            match self.tokens_spent.compare_exchange_weak(
                current,
                current + estimate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    async fn invoke(&self, prompt: &str) -> crate::Result<String> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| crate::Error::Ai("no endpoint configured".to_string()))?;

        let body = serde_json::json!({
            "model": self.config.model_id,
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = self.http.post(endpoint).json(&body);
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.header("x-api-key", key);
        }

        let response = request
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .send()
            .await?
            .error_for_status()?;

        let parsed: MessagesResponse = response.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(crate::Error::Ai("empty model response".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl AiCollaborator for BedrockCollaborator {
    async fn analyze(&self, prompt: &str, context: &PromptContext) -> Option<String> {
        if !self.config.enabled {
            self.record(false, false, 0);
            return None;
        }
        if !self.reserve_budget(prompt) {
            tracing::warn!(
                correlation_id = %context.correlation_id,
                caller = %context.caller,
                budget = self.config.token_budget,
                "token budget exhausted, declining AI call"
            );
            self.record(false, false, 0);
            return None;
        }

        let started = Instant::now();
        match self.invoke(prompt).await {
            Ok(text) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::debug!(
                    correlation_id = %context.correlation_id,
                    caller = %context.caller,
                    latency_ms,
                    "AI call succeeded"
                );
                self.record(true, true, latency_ms);
                Some(text)
            }
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(
                    correlation_id = %context.correlation_id,
                    caller = %context.caller,
                    latency_ms,
                    "AI call failed, falling back: {}",
                    e
                );
                self.record(true, false, latency_ms);
                None
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn call_records(&self) -> Vec<CallRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, endpoint: Option<&str>) -> AiConfig {
        AiConfig {
            enabled,
            endpoint: endpoint.map(String::from),
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_declines_without_attempt() {
        let ai = BedrockCollaborator::new(config(false, None));
        let result = ai.analyze("prompt", &PromptContext::default()).await;
        assert!(result.is_none());
        let records = ai.call_records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].attempted);
    }

    #[tokio::test]
    async fn test_missing_endpoint_declines_without_raising() {
        let ai = BedrockCollaborator::new(config(true, None));
        let result = ai.analyze("prompt", &PromptContext::default()).await;
        assert!(result.is_none());
        let records = ai.call_records();
        assert!(records[0].attempted);
        assert!(!records[0].succeeded);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_declines() {
        let mut cfg = config(true, Some("http://127.0.0.1:1/v1/messages"));
        cfg.timeout_ms = 200;
        let ai = BedrockCollaborator::new(cfg);
        let result = ai.analyze("prompt", &PromptContext::default()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_declines() {
        let mut cfg = config(true, Some("http://127.0.0.1:1/v1/messages"));
        cfg.token_budget = 10;
        let ai = BedrockCollaborator::new(cfg);
        let result = ai.analyze("prompt", &PromptContext::default()).await;
        assert!(result.is_none());
        // Budget refusal is recorded as not attempted
        assert!(!ai.call_records()[0].attempted);
    }

    #[test]
    fn test_budget_reservation_accumulates() {
        let mut cfg = config(true, None);
        cfg.max_tokens = 100;
        cfg.token_budget = 250;
        let ai = BedrockCollaborator::new(cfg);
        assert!(ai.reserve_budget("xxxx"));
        assert!(ai.reserve_budget("xxxx"));
        // Third reservation exceeds 250
        assert!(!ai.reserve_budget("xxxx"));
    }
}
