//! S3 — compliance mapping stage
//!
//! Groups findings by regulation (finding refs merged with a hardcoded
//! rule/category map), computes the compliance score from the fixed
//! severity weights, and derives the risk assessment from the highest
//! severity present. AI may rewrite the recommendation texts but can
//! never alter the score or the grouping.

use super::{json_size, Agent, AgentContext, EnhanceOutput, StageRun};
use crate::ai::parse;
use crate::types::{
    AiUsage, Category, ErrorClass, Finding, Regulation, RegulationRef, Severity, StageError,
    StageResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_ID: &str = "compliance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub business_risk: RiskLevel,
    pub legal_risk: RiskLevel,
    pub reputation_risk: RiskLevel,
    /// Illustrative label, not part of the scoring contract
    pub financial_impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAnalysis {
    /// Findings with the hardcoded regulation map merged in (append-only)
    pub findings: Vec<Finding>,
    /// Regulation name → finding ids, deterministically ordered
    pub violations_by_regulation: BTreeMap<String, Vec<String>>,
    /// Integer in [0, 100]; 100 iff there are no counted violations
    pub compliance_score: u32,
    pub risk_assessment: RiskAssessment,
    /// Priority-sorted, highest severity first
    pub recommendations: Vec<String>,
    pub total_findings: usize,
}

#[derive(Default)]
pub struct ComplianceAgent;

impl ComplianceAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    type Input = EnhanceOutput;
    type Output = ComplianceAnalysis;

    fn stage_id(&self) -> &'static str {
        STAGE_ID
    }

    async fn process(
        &self,
        ctx: &AgentContext,
        input: EnhanceOutput,
    ) -> StageResult<ComplianceAnalysis> {
        let run = StageRun::begin(STAGE_ID, ctx, json_size(&input));
        let mut findings = input.findings;
        let mut errors = Vec::new();

        // Merge the hardcoded regulation map into each finding.
        for finding in findings.iter_mut() {
            for reference in default_regulations(&finding.rule_id, finding.category) {
                finding.add_regulation_ref(reference);
            }
        }

        let counted: Vec<&Finding> = findings
            .iter()
            .filter(|f| !f.is_positive && !f.suppressed)
            .collect();

        let mut violations_by_regulation: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for finding in &counted {
            for reference in &finding.regulation_refs {
                let ids = violations_by_regulation
                    .entry(reference.regulation.to_string())
                    .or_default();
                if !ids.contains(&finding.finding_id) {
                    ids.push(finding.finding_id.clone());
                }
            }
        }

        let compliance_score = compute_score(&counted);
        let highest = counted.iter().map(|f| f.severity).max();
        let risk_assessment = risk_for(highest);
        let mut recommendations = build_recommendations(&counted);

        let mut ai = AiUsage::default();
        if ctx.ai_enabled && !recommendations.is_empty() {
            let prompt = format!(
                "Rewrite these remediation recommendations to be specific and \
                 actionable for an engineering team. Keep the priority order. \
                 Respond with a JSON array of strings only.\n{}",
                recommendations
                    .iter()
                    .map(|r| format!("- {}\n", r))
                    .collect::<String>()
            );
            match ctx.ai_call(STAGE_ID, &prompt).await {
                Some(response) => {
                    if let Some(items) = parse::extract_json_array(&response) {
                        let rewritten: Vec<String> = items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect();
                        if !rewritten.is_empty() {
                            recommendations = rewritten;
                            ai.used = true;
                            ai.model = Some(ctx.ai.model_id().to_string());
                        }
                    }
                }
                None => {
                    errors.push(StageError::new(
                        ErrorClass::AiUnavailable,
                        "recommendation rewrite declined, deterministic texts kept",
                    ));
                }
            }
        }

        let total_findings = counted.len();
        let input_summary = format!("{} counted findings", total_findings);
        let output = ComplianceAnalysis {
            findings,
            violations_by_regulation,
            compliance_score,
            risk_assessment,
            recommendations,
            total_findings,
        };
        run.finish(ctx, input_summary, output, ai, errors).await
    }
}

/// `round(100 − sum(weight)/max_possible × 100)` with
/// `max_possible = total × 10`; an empty run scores 100.
fn compute_score(counted: &[&Finding]) -> u32 {
    if counted.is_empty() {
        return 100;
    }
    let sum: u32 = counted.iter().map(|f| f.severity.weight()).sum();
    let max_possible = (counted.len() as f64) * 10.0;
    let score = 100.0 - (sum as f64 / max_possible) * 100.0;
    score.round().clamp(0.0, 100.0) as u32
}

/// Hardcoded regulation map keyed on rule id and category.
fn default_regulations(rule_id: &str, category: Category) -> Vec<RegulationRef> {
    let mut refs = match rule_id {
        "R1" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 4(1)")],
        "R2" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 9")],
        "R3" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 17")],
        "R4" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 7")],
        "R5" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
        "R6" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)")],
        "R7" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
        "R8" => vec![RegulationRef::new(Regulation::Ccpa, "§1798.100")],
        "R9" => vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
        _ => Vec::new(),
    };
    if matches!(category, Category::Pii) {
        refs.push(RegulationRef::new(Regulation::Ccpa, "§1798.140(o)"));
    }
    refs
}

/// Fixed lookup keyed on the highest severity present.
fn risk_for(highest: Option<Severity>) -> RiskAssessment {
    match highest {
        Some(Severity::Critical) => RiskAssessment {
            business_risk: RiskLevel::Critical,
            legal_risk: RiskLevel::Critical,
            reputation_risk: RiskLevel::High,
            financial_impact: "severe — regulatory fines likely ($100k+ exposure)".to_string(),
        },
        Some(Severity::High) => RiskAssessment {
            business_risk: RiskLevel::High,
            legal_risk: RiskLevel::High,
            reputation_risk: RiskLevel::Medium,
            financial_impact: "substantial — remediation plus potential fines".to_string(),
        },
        Some(Severity::Medium) => RiskAssessment {
            business_risk: RiskLevel::Medium,
            legal_risk: RiskLevel::Medium,
            reputation_risk: RiskLevel::Low,
            financial_impact: "moderate — remediation cost only".to_string(),
        },
        Some(Severity::Low) => RiskAssessment {
            business_risk: RiskLevel::Low,
            legal_risk: RiskLevel::Low,
            reputation_risk: RiskLevel::Low,
            financial_impact: "minimal — hygiene cleanup".to_string(),
        },
        None => RiskAssessment {
            business_risk: RiskLevel::Low,
            legal_risk: RiskLevel::Low,
            reputation_risk: RiskLevel::Low,
            financial_impact: "$0 estimated — no exposure detected".to_string(),
        },
    }
}

/// One recommendation per (severity, rule), highest severity first.
fn build_recommendations(counted: &[&Finding]) -> Vec<String> {
    let mut groups: BTreeMap<(std::cmp::Reverse<Severity>, String), (usize, String)> =
        BTreeMap::new();
    for finding in counted {
        let entry = groups
            .entry((
                std::cmp::Reverse(finding.severity),
                finding.rule_id.clone(),
            ))
            .or_insert((0, finding.rule_description.clone()));
        entry.0 += 1;
    }
    groups
        .into_iter()
        .map(|((severity, _), (count, description))| {
            format!(
                "[{}] Address {} finding(s): {}",
                severity.0, count, description
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{OfflineCollaborator, ScriptedCollaborator};
    use crate::store::MemoryResultStore;
    use crate::types::Language;
    use std::sync::Arc;

    fn finding(rule_id: &str, severity: Severity, seed: u32) -> Finding {
        let excerpt = format!("excerpt-{}", seed);
        Finding {
            finding_id: Finding::compute_id("/a.py", seed, rule_id, &excerpt),
            file_path: "/a.py".to_string(),
            line: seed,
            language: Language::Python,
            rule_id: rule_id.to_string(),
            rule_description: format!("{} description", rule_id),
            category: if rule_id == "R2" {
                Category::Pii
            } else {
                Category::Security
            },
            severity,
            match_excerpt: excerpt,
            description: String::new(),
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

    fn input(findings: Vec<Finding>) -> EnhanceOutput {
        EnhanceOutput {
            findings,
            enhanced_count: 0,
            discovered_count: 0,
        }
    }

    fn context(ai: Arc<dyn crate::ai::AiCollaborator>, enabled: bool) -> AgentContext {
        AgentContext {
            correlation_id: "corr-compliance".to_string(),
            store: Arc::new(MemoryResultStore::new()),
            ai,
            ai_enabled: enabled,
        }
    }

    async fn analyze(findings: Vec<Finding>) -> ComplianceAnalysis {
        let ctx = context(Arc::new(OfflineCollaborator), false);
        ComplianceAgent::new()
            .process(&ctx, input(findings))
            .await
            .output
    }

    #[tokio::test]
    async fn test_empty_scores_100() {
        let analysis = analyze(vec![]).await;
        assert_eq!(analysis.compliance_score, 100);
        assert_eq!(analysis.risk_assessment.business_risk, RiskLevel::Low);
    }

    #[tokio::test]
    async fn test_score_formula() {
        // One CRITICAL: 100 - 10/10*100 = 0
        let analysis = analyze(vec![finding("R2", Severity::Critical, 1)]).await;
        assert_eq!(analysis.compliance_score, 0);

        // One MEDIUM: 100 - 2/10*100 = 80
        let analysis = analyze(vec![finding("R1", Severity::Medium, 1)]).await;
        assert_eq!(analysis.compliance_score, 80);

        // MEDIUM + LOW: 100 - 3/20*100 = 85
        let analysis = analyze(vec![
            finding("R1", Severity::Medium, 1),
            finding("R6", Severity::Low, 2),
        ])
        .await;
        assert_eq!(analysis.compliance_score, 85);
    }

    #[tokio::test]
    async fn test_score_bounds() {
        let findings: Vec<Finding> = (0..25)
            .map(|i| finding("R2", Severity::Critical, i + 1))
            .collect();
        let analysis = analyze(findings).await;
        assert_eq!(analysis.compliance_score, 0);
    }

    #[tokio::test]
    async fn test_positives_not_counted() {
        let mut positive = finding("R4", Severity::Low, 1);
        positive.is_positive = true;
        let analysis = analyze(vec![positive]).await;
        assert_eq!(analysis.compliance_score, 100);
        assert_eq!(analysis.total_findings, 0);
    }

    #[tokio::test]
    async fn test_suppressed_not_counted() {
        let mut suppressed = finding("R2", Severity::Critical, 1);
        suppressed.suppressed = true;
        let analysis = analyze(vec![suppressed]).await;
        assert_eq!(analysis.compliance_score, 100);
    }

    #[tokio::test]
    async fn test_regulation_map_merged_append_only() {
        let mut f = finding("R2", Severity::High, 1);
        f.regulation_refs
            .push(RegulationRef::new(Regulation::Hipaa, "§164.514"));
        let before = f.regulation_refs.clone();
        let analysis = analyze(vec![f]).await;
        let refs = &analysis.findings[0].regulation_refs;
        for r in &before {
            assert!(refs.contains(r), "existing ref dropped: {:?}", r);
        }
        assert!(refs.len() > before.len());
        assert!(analysis.violations_by_regulation.contains_key("HIPAA"));
        assert!(analysis.violations_by_regulation.contains_key("GDPR"));
    }

    #[tokio::test]
    async fn test_risk_lookup_critical() {
        let analysis = analyze(vec![finding("R2", Severity::Critical, 1)]).await;
        assert!(matches!(
            analysis.risk_assessment.business_risk,
            RiskLevel::High | RiskLevel::Critical
        ));
        assert_eq!(analysis.risk_assessment.legal_risk, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_recommendations_priority_sorted() {
        let analysis = analyze(vec![
            finding("R6", Severity::Low, 1),
            finding("R2", Severity::Critical, 2),
            finding("R5", Severity::High, 3),
        ])
        .await;
        assert!(analysis.recommendations[0].starts_with("[CRITICAL]"));
        assert!(analysis
            .recommendations
            .last()
            .unwrap()
            .starts_with("[LOW]"));
    }

    #[tokio::test]
    async fn test_ai_rewrites_text_but_not_score() {
        let response = r#"["Rotate the exposed key immediately", "Add consent gates"]"#;
        let ctx = context(
            Arc::new(ScriptedCollaborator::new(vec![Some(response.to_string())])),
            true,
        );
        let result = ComplianceAgent::new()
            .process(&ctx, input(vec![finding("R2", Severity::Medium, 1)]))
            .await;
        assert_eq!(result.output.compliance_score, 80, "score must not change");
        assert_eq!(
            result.output.recommendations,
            vec![
                "Rotate the exposed key immediately".to_string(),
                "Add consent gates".to_string()
            ]
        );
        assert!(result.ai.used);
    }
}
