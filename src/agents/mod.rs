//! Agent stage framework
//!
//! Every stage runs the same shape: validate → compute → enrich via AI
//! or fall back → persist → emit metrics. A stage always returns a
//! structurally valid `StageResult`, whatever failed underneath
//! (fail-open). Persistence happens after the output is computed and is
//! best-effort; a failed put lands in `errors`, never aborts.

mod compliance;
mod enhance;
mod fix;
mod report;
mod scan;

pub use compliance::{ComplianceAgent, ComplianceAnalysis, RiskAssessment, RiskLevel};
pub use enhance::{AiEnhanceAgent, EnhanceOutput};
pub use fix::{Effort, FixOutput, FixSuggestAgent, FixSuggestion};
pub use report::{
    ComplianceSection, ComplianceStatus, ExecutiveSummary, Report, ReportAgent, ReportInput,
    ReportMetadata, ReportOutput,
};
pub use scan::{ScanAgent, ScanOutput};

use crate::ai::{AiCollaborator, PromptContext};
use crate::store::{self, ResultStore};
use crate::types::{AiUsage, ErrorClass, StageError, StageResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Shared collaborators handed to every stage
#[derive(Clone)]
pub struct AgentContext {
    pub correlation_id: String,
    pub store: Arc<dyn ResultStore>,
    pub ai: Arc<dyn AiCollaborator>,
    pub ai_enabled: bool,
}

impl AgentContext {
    /// Call the AI collaborator, honoring the run-level toggle.
    ///
    /// `None` means the caller's deterministic fallback must run; that
    /// fallback produces a semantically valid output of the same shape.
    pub async fn ai_call(&self, caller: &str, prompt: &str) -> Option<String> {
        if !self.ai_enabled {
            return None;
        }
        let context = PromptContext {
            correlation_id: self.correlation_id.clone(),
            caller: caller.to_string(),
        };
        self.ai.analyze(prompt, &context).await
    }
}

/// A pipeline stage. `process` is the only public entry point.
#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send + 'static;
    type Output: Serialize + Send;

    fn stage_id(&self) -> &'static str;

    async fn process(&self, ctx: &AgentContext, input: Self::Input)
        -> StageResult<Self::Output>;
}

/// Book-keeping for one `process` invocation: entry metrics, timing,
/// persistence and exit metrics live here so stages stay declarative.
pub(crate) struct StageRun {
    stage_id: &'static str,
    correlation_id: String,
    started: Instant,
    input_size: usize,
}

impl StageRun {
    pub(crate) fn begin(stage_id: &'static str, ctx: &AgentContext, input_size: usize) -> Self {
        tracing::info!(
            target: "privguard::metrics",
            stage_id,
            correlation_id = %ctx.correlation_id,
            input_size,
            "stage entry"
        );
        Self {
            stage_id,
            correlation_id: ctx.correlation_id.clone(),
            started: Instant::now(),
            input_size,
        }
    }

    /// Seal the stage: persist best-effort, then emit exit metrics.
    pub(crate) async fn finish<T: Serialize>(
        self,
        ctx: &AgentContext,
        input_summary: String,
        output: T,
        ai: AiUsage,
        mut errors: Vec<StageError>,
    ) -> StageResult<T> {
        let result = StageResult {
            correlation_id: self.correlation_id.clone(),
            stage_id: self.stage_id.to_string(),
            produced_at: chrono::Utc::now(),
            input_summary,
            output,
            ai,
            errors: Vec::new(),
        };

        // Persist after compute, never before; failures are recorded.
        let output_size = match serde_json::to_value(&result) {
            Ok(payload) => {
                let size = payload.to_string().len();
                let put = store::with_retry(|| {
                    ctx.store
                        .put_stage_result(&self.correlation_id, self.stage_id, &payload)
                })
                .await;
                if let Err(e) = put {
                    tracing::warn!(
                        stage_id = self.stage_id,
                        correlation_id = %self.correlation_id,
                        "stage result persistence failed: {}",
                        e
                    );
                    errors.push(StageError::new(
                        ErrorClass::IoTransient,
                        format!("persistence failed: {}", e),
                    ));
                }
                size
            }
            Err(e) => {
                errors.push(StageError::new(
                    ErrorClass::IoTransient,
                    format!("stage result not serializable: {}", e),
                ));
                0
            }
        };

        let duration_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(
            target: "privguard::metrics",
            stage_id = self.stage_id,
            correlation_id = %self.correlation_id,
            duration_ms,
            input_size = self.input_size,
            output_size,
            ai_used = result.ai.used,
            ai_confidence = result.ai.confidence.unwrap_or(0.0),
            errors = errors.len(),
            "stage exit"
        );

        StageResult { errors, ..result }
    }
}

/// Cheap structural size for metrics: serialized JSON byte length.
pub(crate) fn json_size<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OfflineCollaborator;
    use crate::store::MemoryResultStore;

    fn context() -> (AgentContext, Arc<MemoryResultStore>) {
        let store = Arc::new(MemoryResultStore::new());
        let ctx = AgentContext {
            correlation_id: "corr-test".to_string(),
            store: store.clone(),
            ai: Arc::new(OfflineCollaborator),
            ai_enabled: true,
        };
        (ctx, store)
    }

    #[tokio::test]
    async fn test_stage_run_persists_result() {
        let (ctx, store) = context();
        let run = StageRun::begin("demo", &ctx, 10);
        let result = run
            .finish(
                &ctx,
                "demo input".to_string(),
                serde_json::json!({"v": 1}),
                AiUsage::default(),
                Vec::new(),
            )
            .await;
        assert_eq!(result.stage_id, "demo");
        assert!(result.errors.is_empty());

        let stored = store.get_stage_result("corr-test", "demo").await.unwrap();
        assert_eq!(stored["output"]["v"], 1);
        assert_eq!(stored["correlation_id"], "corr-test");
    }

    #[tokio::test]
    async fn test_ai_call_disabled_returns_none() {
        let (mut ctx, _) = context();
        ctx.ai_enabled = false;
        assert!(ctx.ai_call("demo", "prompt").await.is_none());
    }

    /// Store that refuses every write, for fail-open checks.
    struct BrokenStore;

    #[async_trait]
    impl ResultStore for BrokenStore {
        async fn put_stage_result(
            &self,
            _correlation_id: &str,
            _stage_id: &str,
            _payload: &serde_json::Value,
        ) -> crate::Result<()> {
            Err(crate::Error::Store("backend unreachable".to_string()))
        }

        async fn put_report(
            &self,
            _correlation_id: &str,
            _payload: &serde_json::Value,
            _content_type: &str,
        ) -> crate::Result<String> {
            Err(crate::Error::Store("backend unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let ctx = AgentContext {
            correlation_id: "corr-broken".to_string(),
            store: Arc::new(BrokenStore),
            ai: Arc::new(OfflineCollaborator),
            ai_enabled: false,
        };
        let run = StageRun::begin("demo", &ctx, 1);
        let result = run
            .finish(
                &ctx,
                "input".to_string(),
                serde_json::json!({"v": 2}),
                AiUsage::default(),
                Vec::new(),
            )
            .await;
        // Output intact, persistence failure recorded, nothing raised
        assert_eq!(result.output["v"], 2);
        assert!(result
            .errors
            .iter()
            .any(|e| e.class == ErrorClass::IoTransient));
    }
}
