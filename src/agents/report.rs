//! S5 — report composition stage
//!
//! Compiles (never rewrites) the upstream stage outputs into the final
//! report, derives the executive status from the compliance score, and
//! persists the blob. Missing upstream outputs (deadline, degraded runs)
//! produce a structurally complete report from whatever finished.

use super::compliance::{ComplianceAnalysis, RiskAssessment, RiskLevel};
use super::{json_size, Agent, AgentContext, EnhanceOutput, FixOutput, ScanOutput, StageRun};
use crate::store;
use crate::types::{
    AiUsage, ErrorClass, Finding, Severity, StageError, StageResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_ID: &str = "report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    #[serde(rename = "COMPLIANT")]
    Compliant,
    #[serde(rename = "NEEDS_IMPROVEMENT")]
    NeedsImprovement,
    #[serde(rename = "NON_COMPLIANT")]
    NonCompliant,
    #[serde(rename = "PARTIAL")]
    Partial,
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplianceStatus::Compliant => write!(f, "COMPLIANT"),
            ComplianceStatus::NeedsImprovement => write!(f, "NEEDS_IMPROVEMENT"),
            ComplianceStatus::NonCompliant => write!(f, "NON_COMPLIANT"),
            ComplianceStatus::Partial => write!(f, "PARTIAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub correlation_id: String,
    pub total_violations: usize,
    pub agents_used: Vec<String>,
    pub ai_enhanced: bool,
    /// Error classes encountered anywhere in the run
    pub degraded_reasons: Vec<String>,
    /// Good-practice markers carried through the run
    pub positive_practices: usize,
    pub completed_stages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub status: ComplianceStatus,
    pub message: String,
    pub compliance_score: u32,
    pub risk_level: RiskLevel,
    pub total_violations: usize,
    pub high_severity_count: usize,
}

/// Compliance section without the finding list (that lives once, in
/// `detailed_findings`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSection {
    pub violations_by_regulation: BTreeMap<String, Vec<String>>,
    pub compliance_score: u32,
    pub recommendations: Vec<String>,
    pub total_findings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub executive_summary: ExecutiveSummary,
    pub detailed_findings: Vec<Finding>,
    pub compliance_analysis: Option<ComplianceSection>,
    pub fix_recommendations: Option<FixOutput>,
    pub risk_assessment: RiskAssessment,
    pub action_items: Vec<String>,
    pub bedrock_enhanced: bool,
}

impl Report {
    /// Human-readable summary for CLI output; JSON stays canonical.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Privacy scan report — {}\n",
            self.metadata.correlation_id
        ));
        out.push_str(&format!(
            "Status: {} (score {}/100)\n",
            self.executive_summary.status, self.executive_summary.compliance_score
        ));
        out.push_str(&format!("{}\n", self.executive_summary.message));
        out.push_str(&format!(
            "Violations: {} total, {} high severity or above\n",
            self.executive_summary.total_violations, self.executive_summary.high_severity_count
        ));
        if !self.metadata.degraded_reasons.is_empty() {
            out.push_str(&format!(
                "Degraded: {}\n",
                self.metadata.degraded_reasons.join(", ")
            ));
        }
        for finding in self
            .detailed_findings
            .iter()
            .filter(|f| !f.is_positive && !f.suppressed)
            .take(10)
        {
            out.push_str(&format!(
                "  [{}] {} {}:{} — {}\n",
                finding.severity,
                finding.rule_id,
                finding.file_path,
                finding.line,
                finding.description
            ));
        }
        if !self.action_items.is_empty() {
            out.push_str("Action items:\n");
            for item in &self.action_items {
                out.push_str(&format!("  - {}\n", item));
            }
        }
        out
    }
}

/// Cumulative dossier the orchestrator builds stage by stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportInput {
    pub scan: Option<ScanOutput>,
    pub enhance: Option<EnhanceOutput>,
    pub compliance: Option<ComplianceAnalysis>,
    pub fixes: Option<FixOutput>,
    /// True when any upstream stage used the collaborator
    pub any_stage_ai: bool,
    pub degraded_reasons: Vec<ErrorClass>,
    pub completed_stages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutput {
    pub report: Report,
    /// Opaque locator for the persisted blob, when persistence succeeded
    pub locator: Option<String>,
}

#[derive(Default)]
pub struct ReportAgent;

impl ReportAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ReportAgent {
    type Input = ReportInput;
    type Output = ReportOutput;

    fn stage_id(&self) -> &'static str {
        STAGE_ID
    }

    async fn process(&self, ctx: &AgentContext, input: ReportInput) -> StageResult<ReportOutput> {
        let run = StageRun::begin(STAGE_ID, ctx, json_size(&input));
        let mut errors = Vec::new();

        // Latest finding list wins: compliance > enhance > scan.
        let detailed_findings: Vec<Finding> = input
            .compliance
            .as_ref()
            .map(|c| c.findings.clone())
            .or_else(|| input.enhance.as_ref().map(|e| e.findings.clone()))
            .or_else(|| input.scan.as_ref().map(|s| s.findings.clone()))
            .unwrap_or_default();

        let counted: Vec<&Finding> = detailed_findings
            .iter()
            .filter(|f| !f.is_positive && !f.suppressed)
            .collect();
        let total_violations = counted.len();
        let high_severity_count = counted
            .iter()
            .filter(|f| f.severity >= Severity::High)
            .count();
        let positive_practices = detailed_findings.iter().filter(|f| f.is_positive).count();

        let compliance_score = input
            .compliance
            .as_ref()
            .map(|c| c.compliance_score)
            .unwrap_or_else(|| if total_violations == 0 { 100 } else { 0 });

        let degraded: Vec<String> = input
            .degraded_reasons
            .iter()
            .map(|r| r.to_string())
            .collect();
        let status = derive_status(&input.degraded_reasons, compliance_score);
        let risk_assessment = input
            .compliance
            .as_ref()
            .map(|c| c.risk_assessment.clone())
            .unwrap_or_else(|| RiskAssessment {
                business_risk: RiskLevel::Low,
                legal_risk: RiskLevel::Low,
                reputation_risk: RiskLevel::Low,
                financial_impact: "$0 estimated — no exposure detected".to_string(),
            });
        let risk_level = risk_assessment.business_risk;

        let bedrock_enhanced =
            input.any_stage_ai || detailed_findings.iter().any(|f| f.ai_enhanced);

        let message = match status {
            ComplianceStatus::Compliant => {
                "No privacy violations detected; current practices hold.".to_string()
            }
            ComplianceStatus::NeedsImprovement => format!(
                "{} privacy violation(s) need attention before the posture degrades.",
                total_violations
            ),
            ComplianceStatus::NonCompliant => format!(
                "{} privacy violation(s) put the project out of compliance.",
                total_violations
            ),
            ComplianceStatus::Partial => {
                "Run ended early; results cover completed stages only.".to_string()
            }
        };

        let action_items = build_action_items(total_violations, &counted, &input);

        let mut agents_used = input.completed_stages.clone();
        agents_used.push(STAGE_ID.to_string());

        let report = Report {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                correlation_id: ctx.correlation_id.clone(),
                total_violations,
                agents_used,
                ai_enhanced: bedrock_enhanced,
                degraded_reasons: degraded,
                positive_practices,
                completed_stages: input.completed_stages.clone(),
            },
            executive_summary: ExecutiveSummary {
                status,
                message,
                compliance_score,
                risk_level,
                total_violations,
                high_severity_count,
            },
            detailed_findings,
            compliance_analysis: input.compliance.as_ref().map(|c| ComplianceSection {
                violations_by_regulation: c.violations_by_regulation.clone(),
                compliance_score: c.compliance_score,
                recommendations: c.recommendations.clone(),
                total_findings: c.total_findings,
            }),
            fix_recommendations: input.fixes.clone(),
            risk_assessment,
            action_items,
            bedrock_enhanced,
        };

        // Persist the blob; a failed put degrades to an in-memory report.
        let locator = match serde_json::to_value(&report) {
            Ok(payload) => {
                let put = store::with_retry(|| {
                    ctx.store
                        .put_report(&ctx.correlation_id, &payload, "application/json")
                })
                .await;
                match put {
                    Ok(locator) => Some(locator),
                    Err(e) => {
                        tracing::warn!(
                            correlation_id = %ctx.correlation_id,
                            "report persistence failed: {}",
                            e
                        );
                        errors.push(StageError::new(
                            ErrorClass::IoTransient,
                            format!("report persistence failed: {}", e),
                        ));
                        None
                    }
                }
            }
            Err(e) => {
                errors.push(StageError::new(
                    ErrorClass::IoTransient,
                    format!("report not serializable: {}", e),
                ));
                None
            }
        };

        let ai = AiUsage {
            used: false,
            model: None,
            confidence: None,
        };
        let input_summary = format!(
            "{} findings across {} completed stages",
            report.detailed_findings.len(),
            input.completed_stages.len()
        );
        let output = ReportOutput { report, locator };
        run.finish(ctx, input_summary, output, ai, errors).await
    }
}

/// Status precedence: DEADLINE_EXCEEDED > INPUT_INVALID > score bands.
fn derive_status(degraded: &[ErrorClass], score: u32) -> ComplianceStatus {
    if degraded.contains(&ErrorClass::DeadlineExceeded) {
        return ComplianceStatus::Partial;
    }
    if degraded.contains(&ErrorClass::InputInvalid) {
        // Zero findings from invalid input must not read as success.
        return ComplianceStatus::NonCompliant;
    }
    match score {
        90..=100 => ComplianceStatus::Compliant,
        60..=89 => ComplianceStatus::NeedsImprovement,
        _ => ComplianceStatus::NonCompliant,
    }
}

fn build_action_items(
    total_violations: usize,
    counted: &[&Finding],
    input: &ReportInput,
) -> Vec<String> {
    let mut items = Vec::new();
    if total_violations > 0 {
        items.push("Implement suggested fixes for all violations".to_string());
    }
    if counted.iter().any(|f| f.severity == Severity::Critical) {
        items.push("Address CRITICAL findings before the next release".to_string());
    }
    if input
        .degraded_reasons
        .contains(&ErrorClass::DeadlineExceeded)
    {
        items.push("Re-run the scan with a longer deadline to cover skipped stages".to_string());
    }
    if input.degraded_reasons.contains(&ErrorClass::AiUnavailable) {
        items.push("Re-run with the AI collaborator reachable for enriched context".to_string());
    }
    if items.is_empty() {
        items.push("No action required — maintain current practices".to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OfflineCollaborator;
    use crate::store::MemoryResultStore;
    use crate::types::{Category, Language};
    use std::sync::Arc;

    fn finding(severity: Severity, seed: u32) -> Finding {
        let excerpt = format!("excerpt-{}", seed);
        Finding {
            finding_id: Finding::compute_id("/a.py", seed, "R2", &excerpt),
            file_path: "/a.py".to_string(),
            line: seed,
            language: Language::Python,
            rule_id: "R2".to_string(),
            rule_description: String::new(),
            category: Category::Pii,
            severity,
            match_excerpt: excerpt,
            description: "d".to_string(),
            fix_hint: String::new(),
            regulation_refs: Vec::new(),
            is_positive: false,
            suppressed: false,
            suppression_reason: None,
            truncated: false,
            ai_enhanced: false,
            ai_confidence: 0.0,
            ai_model: None,
        }
    }

    fn context() -> (AgentContext, Arc<MemoryResultStore>) {
        let store = Arc::new(MemoryResultStore::new());
        (
            AgentContext {
                correlation_id: "corr-report".to_string(),
                store: store.clone(),
                ai: Arc::new(OfflineCollaborator),
                ai_enabled: false,
            },
            store,
        )
    }

    fn enhance(findings: Vec<Finding>) -> EnhanceOutput {
        EnhanceOutput {
            findings,
            enhanced_count: 0,
            discovered_count: 0,
        }
    }

    #[tokio::test]
    async fn test_clean_run_is_compliant() {
        let (ctx, _) = context();
        let input = ReportInput {
            enhance: Some(enhance(vec![])),
            completed_stages: vec!["scan".into(), "enhance".into()],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        let report = &result.output.report;
        assert_eq!(report.executive_summary.status, ComplianceStatus::Compliant);
        assert_eq!(report.executive_summary.compliance_score, 100);
        assert_eq!(
            report.action_items,
            vec!["No action required — maintain current practices".to_string()]
        );
    }

    #[tokio::test]
    async fn test_deadline_forces_partial() {
        let (ctx, _) = context();
        let input = ReportInput {
            enhance: Some(enhance(vec![finding(Severity::Low, 1)])),
            degraded_reasons: vec![ErrorClass::DeadlineExceeded],
            completed_stages: vec!["scan".into()],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        let report = &result.output.report;
        assert_eq!(report.executive_summary.status, ComplianceStatus::Partial);
        assert!(report
            .metadata
            .degraded_reasons
            .contains(&"DEADLINE_EXCEEDED".to_string()));
    }

    #[tokio::test]
    async fn test_input_invalid_is_non_compliant() {
        let (ctx, _) = context();
        let input = ReportInput {
            degraded_reasons: vec![ErrorClass::InputInvalid],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        let report = &result.output.report;
        assert_eq!(report.metadata.total_violations, 0);
        assert_eq!(
            report.executive_summary.status,
            ComplianceStatus::NonCompliant
        );
    }

    #[tokio::test]
    async fn test_report_persisted_with_locator() {
        let (ctx, store) = context();
        let input = ReportInput {
            enhance: Some(enhance(vec![finding(Severity::Medium, 1)])),
            completed_stages: vec!["scan".into(), "enhance".into()],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        assert!(result.output.locator.is_some());
        assert!(store.get_report("corr-report").await.is_some());
    }

    #[tokio::test]
    async fn test_positive_findings_reported_not_counted() {
        let (ctx, _) = context();
        let mut positive = finding(Severity::Low, 1);
        positive.is_positive = true;
        let input = ReportInput {
            enhance: Some(enhance(vec![positive, finding(Severity::Medium, 2)])),
            completed_stages: vec!["scan".into()],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        let report = &result.output.report;
        assert_eq!(report.metadata.total_violations, 1);
        assert_eq!(report.metadata.positive_practices, 1);
        assert_eq!(report.detailed_findings.len(), 2, "positives stay in the list");
    }

    #[tokio::test]
    async fn test_render_text_contains_status() {
        let (ctx, _) = context();
        let input = ReportInput {
            enhance: Some(enhance(vec![finding(Severity::High, 1)])),
            completed_stages: vec!["scan".into()],
            ..Default::default()
        };
        let result = ReportAgent::new().process(&ctx, input).await;
        let text = result.output.report.render_text();
        assert!(text.contains("corr-report"));
        assert!(text.contains("score"));
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(derive_status(&[], 95), ComplianceStatus::Compliant);
        assert_eq!(derive_status(&[], 90), ComplianceStatus::Compliant);
        assert_eq!(derive_status(&[], 89), ComplianceStatus::NeedsImprovement);
        assert_eq!(derive_status(&[], 60), ComplianceStatus::NeedsImprovement);
        assert_eq!(derive_status(&[], 59), ComplianceStatus::NonCompliant);
        assert_eq!(
            derive_status(&[ErrorClass::DeadlineExceeded], 95),
            ComplianceStatus::Partial
        );
    }
}
