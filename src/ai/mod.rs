//! AI collaborator adapter
//!
//! The hosted model is an optional collaborator, never a dependency: the
//! single operation returns `Some(text)` or `None`, and no failure class
//! raises. Callers own response parsing (see [`parse`]) and must carry a
//! deterministic fallback for the `None` arm.

pub mod bedrock;
pub mod parse;

pub use bedrock::BedrockCollaborator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Context attached to an adapter call, used for logging and metrics
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub correlation_id: String,
    /// Calling stage or rule, e.g. "enhance" or "R10"
    pub caller: String,
}

/// Per-call metrics record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub attempted: bool,
    pub succeeded: bool,
    pub latency_ms: u64,
    pub model_id: String,
}

/// The one-operation collaborator seam
#[async_trait]
pub trait AiCollaborator: Send + Sync {
    /// Analyze a prompt and return raw response text.
    ///
    /// Any transport, auth, quota or precondition failure returns `None`
    /// without raising; the caller's fallback path runs.
    async fn analyze(&self, prompt: &str, context: &PromptContext) -> Option<String>;

    /// Opaque model identifier for result attribution
    fn model_id(&self) -> &str;

    /// Snapshot of per-call metrics recorded so far
    fn call_records(&self) -> Vec<CallRecord>;
}

/// Collaborator that always declines. Used when AI is disabled so every
/// stage exercises its deterministic fallback.
#[derive(Debug, Default)]
pub struct OfflineCollaborator;

#[async_trait]
impl AiCollaborator for OfflineCollaborator {
    async fn analyze(&self, _prompt: &str, _context: &PromptContext) -> Option<String> {
        None
    }

    fn model_id(&self) -> &str {
        "offline"
    }

    fn call_records(&self) -> Vec<CallRecord> {
        Vec::new()
    }
}

/// Collaborator that replays scripted responses in order; `None` entries
/// simulate failures. Deterministic, for tests and dry runs.
#[derive(Debug, Default)]
pub struct ScriptedCollaborator {
    responses: Mutex<Vec<Option<String>>>,
    records: Mutex<Vec<CallRecord>>,
}

impl ScriptedCollaborator {
    pub fn new(responses: Vec<Option<String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AiCollaborator for ScriptedCollaborator {
    async fn analyze(&self, _prompt: &str, _context: &PromptContext) -> Option<String> {
        let response = {
            let mut responses = self.responses.lock().expect("scripted responses lock");
            if responses.is_empty() {
                None
            } else {
                responses.remove(0)
            }
        };
        self.records.lock().expect("records lock").push(CallRecord {
            attempted: true,
            succeeded: response.is_some(),
            latency_ms: 0,
            model_id: self.model_id().to_string(),
        });
        response
    }

    fn model_id(&self) -> &str {
        "scripted"
    }

    fn call_records(&self) -> Vec<CallRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_always_declines() {
        let ai = OfflineCollaborator;
        let ctx = PromptContext::default();
        assert!(ai.analyze("anything", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let ai = ScriptedCollaborator::new(vec![Some("one".into()), None, Some("three".into())]);
        let ctx = PromptContext::default();
        assert_eq!(ai.analyze("a", &ctx).await.as_deref(), Some("one"));
        assert_eq!(ai.analyze("b", &ctx).await, None);
        assert_eq!(ai.analyze("c", &ctx).await.as_deref(), Some("three"));
        // Exhausted scripts decline
        assert_eq!(ai.analyze("d", &ctx).await, None);

        let records = ai.call_records();
        assert_eq!(records.len(), 4);
        assert!(records[0].succeeded);
        assert!(!records[1].succeeded);
    }
}
