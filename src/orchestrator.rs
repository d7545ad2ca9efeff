//! Pipeline orchestrator
//!
//! Invokes the five stages strictly in order, threading the correlation
//! id and a cumulative dossier. Stages are fail-open, so the orchestrator
//! only sequences: it never retries a stage, and a tripped global
//! deadline refuses to start the next stage rather than preempting the
//! current one. The report stage always runs so the caller always gets
//! a structurally complete report.

use crate::agents::{
    Agent, AgentContext, AiEnhanceAgent, ComplianceAgent, FixSuggestAgent, ReportAgent,
    ReportInput, ReportOutput, ScanAgent,
};
use crate::ai::{AiCollaborator, BedrockCollaborator, OfflineCollaborator};
use crate::config::{PrivGuardConfig, StorageBackend};
use crate::engine::RuleEngine;
use crate::store::{FsResultStore, MemoryResultStore, ResultStore};
use crate::types::{ErrorClass, ScanRequest, StageError};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Orchestrator {
    config: PrivGuardConfig,
    engine: Arc<RuleEngine>,
    store: Arc<dyn ResultStore>,
    ai: Arc<dyn AiCollaborator>,
}

impl Orchestrator {
    /// Build the full collaborator set from configuration.
    pub fn new(config: PrivGuardConfig) -> Self {
        let store: Arc<dyn ResultStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryResultStore::new()),
            StorageBackend::Filesystem => Arc::new(FsResultStore::new(config.storage.root.clone())),
        };
        let ai: Arc<dyn AiCollaborator> =
            if config.ai.enabled && config.ai.endpoint.is_some() {
                Arc::new(BedrockCollaborator::new(config.ai.clone()))
            } else {
                Arc::new(OfflineCollaborator)
            };
        Self::with_parts(config, store, ai)
    }

    /// Wire explicit collaborators (tests, embedding callers).
    pub fn with_parts(
        config: PrivGuardConfig,
        store: Arc<dyn ResultStore>,
        ai: Arc<dyn AiCollaborator>,
    ) -> Self {
        let mut engine = RuleEngine::new(config.engine.clone(), config.ai.clone());
        engine.set_collaborator(Arc::clone(&ai));
        Self {
            config,
            engine: Arc::new(engine),
            store,
            ai,
        }
    }

    /// Run the pipeline. Always returns a report; callers distinguish
    /// success by `report.executive_summary.status` and per-stage errors.
    pub async fn run(&self, request: ScanRequest) -> ReportOutput {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let deadline =
            Instant::now() + Duration::from_millis(self.config.pipeline.global_deadline_ms);
        let started = Instant::now();

        let ctx = AgentContext {
            correlation_id: correlation_id.clone(),
            store: Arc::clone(&self.store),
            ai: Arc::clone(&self.ai),
            ai_enabled: self.config.ai.enabled && request.options.ai_enabled,
        };

        tracing::info!(correlation_id = %correlation_id, "pipeline starting");

        let mut dossier = ReportInput::default();
        let mut stage_durations: Vec<(&'static str, u64)> = Vec::new();

        // S1 — scan
        'stages: {
            if expired(deadline, &mut dossier) {
                break 'stages;
            }
            let stage_start = Instant::now();
            let scan_agent = ScanAgent::new(Arc::clone(&self.engine));
            let result = scan_agent.process(&ctx, request.clone()).await;
            stage_durations.push(("scan", stage_start.elapsed().as_millis() as u64));
            absorb_errors(&result.errors, &mut dossier);
            dossier.any_stage_ai |= result.ai.used;
            dossier.completed_stages.push("scan".to_string());
            let input_invalid = result
                .errors
                .iter()
                .any(|e| e.class == ErrorClass::InputInvalid);
            dossier.scan = Some(result.output);
            if input_invalid {
                // Nothing downstream can improve an invalid request.
                break 'stages;
            }

            // S2 — AI enhance
            if expired(deadline, &mut dossier) {
                break 'stages;
            }
            let stage_start = Instant::now();
            let result = AiEnhanceAgent::new(self.config.ai.batch_size)
                .process(&ctx, dossier.scan.clone().expect("scan output set"))
                .await;
            stage_durations.push(("enhance", stage_start.elapsed().as_millis() as u64));
            absorb_errors(&result.errors, &mut dossier);
            dossier.any_stage_ai |= result.ai.used;
            dossier.completed_stages.push("enhance".to_string());
            dossier.enhance = Some(result.output);

            // S3 — compliance
            if expired(deadline, &mut dossier) {
                break 'stages;
            }
            let stage_start = Instant::now();
            let result = ComplianceAgent::new()
                .process(&ctx, dossier.enhance.clone().expect("enhance output set"))
                .await;
            stage_durations.push(("compliance", stage_start.elapsed().as_millis() as u64));
            absorb_errors(&result.errors, &mut dossier);
            dossier.any_stage_ai |= result.ai.used;
            dossier.completed_stages.push("compliance".to_string());
            dossier.compliance = Some(result.output);

            // S4 — fix suggestions
            if expired(deadline, &mut dossier) {
                break 'stages;
            }
            let stage_start = Instant::now();
            let result = FixSuggestAgent::new()
                .process(&ctx, dossier.compliance.clone().expect("compliance output set"))
                .await;
            stage_durations.push(("fix", stage_start.elapsed().as_millis() as u64));
            absorb_errors(&result.errors, &mut dossier);
            dossier.any_stage_ai |= result.ai.used;
            dossier.completed_stages.push("fix".to_string());
            dossier.fixes = Some(result.output);
        }

        // S5 — report, always
        let stage_start = Instant::now();
        let result = ReportAgent::new().process(&ctx, dossier).await;
        stage_durations.push(("report", stage_start.elapsed().as_millis() as u64));

        let records = self.ai.call_records();
        let ai_calls = records.iter().filter(|r| r.attempted).count();
        let ai_failures = records
            .iter()
            .filter(|r| r.attempted && !r.succeeded)
            .count();
        tracing::info!(
            target: "privguard::metrics",
            correlation_id = %correlation_id,
            total_duration_ms = started.elapsed().as_millis() as u64,
            stage_durations = ?stage_durations,
            ai_calls,
            ai_failures,
            status = %result.output.report.executive_summary.status,
            "pipeline complete"
        );

        result.output
    }
}

/// Check the global deadline; record the trip once.
fn expired(deadline: Instant, dossier: &mut ReportInput) -> bool {
    if Instant::now() < deadline {
        return false;
    }
    if !dossier
        .degraded_reasons
        .contains(&ErrorClass::DeadlineExceeded)
    {
        dossier.degraded_reasons.push(ErrorClass::DeadlineExceeded);
    }
    true
}

/// Union stage error classes into the degraded-reason list.
fn absorb_errors(errors: &[StageError], dossier: &mut ReportInput) {
    for error in errors {
        if !dossier.degraded_reasons.contains(&error.class) {
            dossier.degraded_reasons.push(error.class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ComplianceStatus;
    use crate::ai::ScriptedCollaborator;
    use crate::config::PrivGuardConfig;
    use crate::store::MemoryResultStore;
    use crate::types::{InlineSource, ScanOptions, Severity};

    fn offline_config() -> PrivGuardConfig {
        let mut config = PrivGuardConfig::default();
        config.ai.enabled = false;
        config
    }

    fn inline_request(content: &str, file_type: &str) -> ScanRequest {
        ScanRequest {
            correlation_id: Some("corr-orch".to_string()),
            project_path: None,
            inline_source: Some(InlineSource {
                content: content.to_string(),
                file_type: file_type.to_string(),
            }),
            options: ScanOptions {
                ai_enabled: false,
                ..Default::default()
            },
        }
    }

    fn orchestrator(config: PrivGuardConfig) -> (Orchestrator, Arc<MemoryResultStore>) {
        let store = Arc::new(MemoryResultStore::new());
        let orch = Orchestrator::with_parts(
            config,
            store.clone(),
            Arc::new(crate::ai::OfflineCollaborator),
        );
        (orch, store)
    }

    #[tokio::test]
    async fn test_e1_hardcoded_email_in_java() {
        let (orch, _) = orchestrator(offline_config());
        let output = orch
            .run(inline_request(
                "public class T { String e = \"test@example.com\"; }",
                "java",
            ))
            .await;
        let report = &output.report;

        assert!(report.metadata.total_violations >= 1);
        let r1 = report
            .detailed_findings
            .iter()
            .find(|f| f.rule_id == "R1")
            .expect("R1 fires");
        assert_eq!(r1.line, 1);
        assert!(r1.match_excerpt.contains("test@example.com"));
        assert!(report.executive_summary.compliance_score <= 98);
        assert!(matches!(
            report.executive_summary.status,
            ComplianceStatus::NeedsImprovement | ComplianceStatus::NonCompliant
        ));
        assert!(output.locator.is_some());
    }

    #[tokio::test]
    async fn test_e2_suppression_marker() {
        let (orch, _) = orchestrator(offline_config());
        let output = orch
            .run(inline_request(
                "@consent_required\nconst data_capture = \"email\";\n",
                "js",
            ))
            .await;
        assert_eq!(output.report.metadata.total_violations, 0);
        assert_eq!(
            output.report.executive_summary.status,
            ComplianceStatus::Compliant
        );
    }

    #[tokio::test]
    async fn test_e3_insecure_protocol() {
        let (orch, _) = orchestrator(offline_config());
        let output = orch
            .run(inline_request("fetch('http://api.example.com/u')", "js"))
            .await;
        let r5 = output
            .report
            .detailed_findings
            .iter()
            .find(|f| f.rule_id == "R5")
            .expect("R5 fires");
        assert!(r5.match_excerpt.starts_with("Insecure HTTP Protocol"));
        assert_eq!(r5.severity, Severity::High);
        assert!(output
            .report
            .detailed_findings
            .iter()
            .all(|f| f.rule_id != "R1"));
    }

    #[tokio::test]
    async fn test_e4_mixed_critical_pii() {
        let content = "ssn = \"123-45-6789\"\ncard = \"4111-1111-1111-1111\"\napi_key = \"A1b2C3d4E5f6G7h8I9j0K1L2\"\n";
        let (orch, _) = orchestrator(offline_config());
        let output = orch.run(inline_request(content, "py")).await;
        let report = &output.report;

        let r2: Vec<_> = report
            .detailed_findings
            .iter()
            .filter(|f| f.rule_id == "R2")
            .collect();
        let pairs: std::collections::HashSet<(u32, &str)> = r2
            .iter()
            .map(|f| (f.line, f.match_excerpt.split(':').next().unwrap_or("")))
            .collect();
        assert!(pairs.len() >= 3, "distinct (line, subtype) pairs expected");
        assert!(report
            .detailed_findings
            .iter()
            .any(|f| f.severity == Severity::Critical));
        assert!(matches!(
            report.risk_assessment.business_risk,
            crate::agents::RiskLevel::High | crate::agents::RiskLevel::Critical
        ));
    }

    #[tokio::test]
    async fn test_e5_ai_disabled_deterministic() {
        let (orch, _) = orchestrator(offline_config());
        let request = inline_request("email = \"a@b.io\"\nssn = \"123-45-6789\"\n", "py");
        let first = orch.run(request.clone()).await;
        let second = orch.run(request).await;

        assert!(!first.report.bedrock_enhanced);
        assert!(first
            .report
            .detailed_findings
            .iter()
            .all(|f| !f.ai_enhanced));
        assert_eq!(
            first.report.executive_summary.compliance_score,
            second.report.executive_summary.compliance_score
        );
        let ids_a: Vec<&String> = first
            .report
            .detailed_findings
            .iter()
            .map(|f| &f.finding_id)
            .collect();
        let ids_b: Vec<&String> = second
            .report
            .detailed_findings
            .iter()
            .map(|f| &f.finding_id)
            .collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_e5_ai_declining_matches_disabled() {
        // AI enabled but every call declines: score must match a
        // disabled run on the same input.
        let mut config = PrivGuardConfig::default();
        config.ai.enabled = true;
        let store = Arc::new(MemoryResultStore::new());
        let declining = Arc::new(ScriptedCollaborator::new(vec![]));
        let orch = Orchestrator::with_parts(config, store, declining);
        let mut request = inline_request("email = \"a@b.io\"\n", "py");
        request.options.ai_enabled = true;
        let with_ai = orch.run(request).await;

        let (offline_orch, _) = orchestrator(offline_config());
        let without_ai = offline_orch
            .run(inline_request("email = \"a@b.io\"\n", "py"))
            .await;

        assert_eq!(
            with_ai.report.executive_summary.compliance_score,
            without_ai.report.executive_summary.compliance_score
        );
        assert!(!with_ai.report.bedrock_enhanced);
    }

    #[tokio::test]
    async fn test_e6_deadline_tripped() {
        let mut config = offline_config();
        config.pipeline.global_deadline_ms = 0;
        let (orch, _) = orchestrator(config);
        let output = orch.run(inline_request("x = 1", "py")).await;
        let report = &output.report;

        assert_eq!(report.executive_summary.status, ComplianceStatus::Partial);
        assert!(report
            .metadata
            .degraded_reasons
            .contains(&"DEADLINE_EXCEEDED".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_request_structural_report() {
        let (orch, _) = orchestrator(offline_config());
        let output = orch
            .run(ScanRequest {
                correlation_id: Some("corr-invalid".to_string()),
                ..Default::default()
            })
            .await;
        let report = &output.report;
        assert_eq!(report.metadata.total_violations, 0);
        assert_eq!(
            report.executive_summary.status,
            ComplianceStatus::NonCompliant
        );
        assert!(report
            .metadata
            .degraded_reasons
            .contains(&"INPUT_INVALID".to_string()));
        // Only scan ran before the short-circuit
        assert_eq!(report.metadata.completed_stages, vec!["scan".to_string()]);
    }

    #[tokio::test]
    async fn test_stage_results_persisted_per_stage() {
        let (orch, store) = orchestrator(offline_config());
        let _ = orch.run(inline_request("email = \"a@b.io\"\n", "py")).await;
        for stage in ["scan", "enhance", "compliance", "fix", "report"] {
            assert!(
                store.get_stage_result("corr-orch", stage).await.is_some(),
                "missing stage result for {}",
                stage
            );
        }
    }

    #[tokio::test]
    async fn test_generated_correlation_id_when_absent() {
        let (orch, _) = orchestrator(offline_config());
        let mut request = inline_request("x = 1", "py");
        request.correlation_id = None;
        let output = orch.run(request).await;
        assert!(!output.report.metadata.correlation_id.is_empty());
    }
}
