//! S2 — AI enhancement stage
//!
//! Batches findings to the collaborator for enriched descriptions,
//! business-impact notes, regulation additions and confidences. May
//! append newly discovered findings under `rule_id = "AI_DISCOVERED"`;
//! never removes or re-identifies existing findings. With AI
//! unavailable the findings pass through unchanged.

use super::{json_size, Agent, AgentContext, ScanOutput, StageRun};
use crate::ai::parse;
use crate::types::{
    AiUsage, Category, ErrorClass, Finding, Language, Regulation, RegulationRef, Severity,
    StageError, StageResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const STAGE_ID: &str = "enhance";

/// Findings per collaborator call
const DEFAULT_BATCH: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceOutput {
    pub findings: Vec<Finding>,
    pub enhanced_count: usize,
    pub discovered_count: usize,
}

pub struct AiEnhanceAgent {
    batch_size: usize,
}

impl AiEnhanceAgent {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, DEFAULT_BATCH),
        }
    }
}

impl Default for AiEnhanceAgent {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH)
    }
}

#[async_trait]
impl Agent for AiEnhanceAgent {
    type Input = ScanOutput;
    type Output = EnhanceOutput;

    fn stage_id(&self) -> &'static str {
        STAGE_ID
    }

    async fn process(&self, ctx: &AgentContext, input: ScanOutput) -> StageResult<EnhanceOutput> {
        let run = StageRun::begin(STAGE_ID, ctx, json_size(&input));
        let mut findings = input.findings;
        let mut errors = Vec::new();
        let mut enhanced_count = 0usize;
        let mut discovered: Vec<Finding> = Vec::new();
        let mut any_ai = false;
        let mut confidences: Vec<f64> = Vec::new();

        if ctx.ai_enabled && !findings.is_empty() {
            let batches: Vec<Vec<usize>> = findings
                .iter()
                .enumerate()
                .filter(|(_, f)| !f.is_positive)
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
                .chunks(self.batch_size)
                .map(|chunk| chunk.to_vec())
                .collect();

            for batch in batches {
                let prompt = build_prompt(&findings, &batch);
                match ctx.ai_call(STAGE_ID, &prompt).await {
                    Some(response) => {
                        any_ai = true;
                        apply_response(
                            &response,
                            &mut findings,
                            &mut discovered,
                            &mut enhanced_count,
                            &mut confidences,
                            ctx.ai.model_id(),
                        );
                    }
                    None => {
                        errors.push(StageError::new(
                            ErrorClass::AiUnavailable,
                            "enhancement batch declined, findings pass through unchanged",
                        ));
                    }
                }
            }
        }

        let discovered_count = discovered.len();
        findings.extend(discovered);

        let confidence = (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64);
        let ai = AiUsage {
            used: any_ai,
            model: any_ai.then(|| ctx.ai.model_id().to_string()),
            confidence,
        };
        let input_summary = format!("{} findings from scan", findings.len());
        let output = EnhanceOutput {
            findings,
            enhanced_count,
            discovered_count,
        };
        run.finish(ctx, input_summary, output, ai, errors).await
    }
}

fn build_prompt(findings: &[Finding], batch: &[usize]) -> String {
    let mut listing = String::new();
    for &i in batch {
        let f = &findings[i];
        listing.push_str(&format!(
            "- id={} rule={} severity={} file={}:{} excerpt={:?} description={:?}\n",
            f.finding_id, f.rule_id, f.severity, f.file_path, f.line, f.match_excerpt, f.description
        ));
    }
    format!(
        "You are a privacy compliance analyst. For each finding below, return \
         enriched context.\nRespond with a JSON object only:\n\
         {{\"enhancements\": [{{\"finding_id\": <id>, \"description\": <enriched>, \
         \"business_impact\": <one sentence>, \
         \"regulation_refs\": [{{\"regulation\": \"gdpr|ccpa|hipaa|pci-dss\", \"article\": <ref>}}], \
         \"confidence\": <0..1>}}], \
         \"new_findings\": [{{\"file_path\": <path>, \"line\": <n>, \"description\": <text>, \
         \"severity\": \"CRITICAL\"|\"HIGH\"|\"MEDIUM\"|\"LOW\"}}]}}\n\nFindings:\n{}",
        listing
    )
}

fn apply_response(
    response: &str,
    findings: &mut [Finding],
    discovered: &mut Vec<Finding>,
    enhanced_count: &mut usize,
    confidences: &mut Vec<f64>,
    model_id: &str,
) {
    let Some(envelope) = parse::extract_json_object(response) else {
        tracing::debug!("enhancement response had no JSON object, skipping batch");
        return;
    };

    if let Some(enhancements) = envelope.get("enhancements").and_then(|v| v.as_array()) {
        for item in enhancements {
            let Some(finding_id) = item.get("finding_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(finding) = findings.iter_mut().find(|f| f.finding_id == finding_id)
            else {
                continue;
            };
            // Only enrichment fields merge; identity fields never change.
            if let Some(description) = item.get("description").and_then(|v| v.as_str()) {
                finding.description = description.to_string();
            }
            if let Some(impact) = item.get("business_impact").and_then(|v| v.as_str()) {
                if !impact.is_empty() {
                    finding.description =
                        format!("{} Business impact: {}", finding.description, impact);
                }
            }
            if let Some(refs) = item.get("regulation_refs").and_then(|v| v.as_array()) {
                for r in refs {
                    if let Some(reference) = parse_regulation_ref(r) {
                        finding.add_regulation_ref(reference);
                    }
                }
            }
            let confidence = item
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            finding.ai_enhanced = true;
            finding.ai_confidence = confidence;
            finding.ai_model = Some(model_id.to_string());
            confidences.push(confidence);
            *enhanced_count += 1;
        }
    }

    if let Some(new_findings) = envelope.get("new_findings").and_then(|v| v.as_array()) {
        for item in new_findings {
            if let Some(finding) = build_discovered(item, model_id) {
                discovered.push(finding);
            }
        }
    }
}

fn parse_regulation_ref(value: &serde_json::Value) -> Option<RegulationRef> {
    let regulation = match value
        .get("regulation")?
        .as_str()?
        .to_ascii_lowercase()
        .as_str()
    {
        "gdpr" => Regulation::Gdpr,
        "ccpa" => Regulation::Ccpa,
        "hipaa" => Regulation::Hipaa,
        "pci-dss" | "pci_dss" | "pcidss" => Regulation::PciDss,
        _ => return None,
    };
    let article = value.get("article")?.as_str()?.trim().to_string();
    if article.is_empty() {
        return None;
    }
    Some(RegulationRef::new(regulation, article))
}

/// Build an AI-discovered finding; malformed records drop silently.
fn build_discovered(item: &serde_json::Value, model_id: &str) -> Option<Finding> {
    let file_path = item.get("file_path")?.as_str()?.to_string();
    let line = item.get("line")?.as_u64()? as u32;
    if line == 0 {
        return None;
    }
    let description = item.get("description")?.as_str()?.to_string();
    let severity = match item
        .get("severity")
        .and_then(|v| v.as_str())
        .unwrap_or("MEDIUM")
        .to_ascii_uppercase()
        .as_str()
    {
        "CRITICAL" => Severity::Critical,
        "HIGH" => Severity::High,
        "LOW" => Severity::Low,
        _ => Severity::Medium,
    };
    let language = Path::new(&file_path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Language::from_extension)?;

    let excerpt = crate::types::truncate_excerpt(&description);
    Some(Finding {
        finding_id: Finding::compute_id(&file_path, line, "AI_DISCOVERED", &excerpt),
        file_path,
        line,
        language,
        rule_id: "AI_DISCOVERED".to_string(),
        rule_description: "Discovered by AI enhancement".to_string(),
        category: Category::AiGuidance,
        severity,
        match_excerpt: excerpt,
        description,
        fix_hint: item
            .get("fix_hint")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        regulation_refs: Vec::new(),
        is_positive: false,
        suppressed: false,
        suppression_reason: None,
        truncated: false,
        ai_enhanced: true,
        ai_confidence: 0.5,
        ai_model: Some(model_id.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiCollaborator, OfflineCollaborator, ScriptedCollaborator};
    use crate::rules::RuleStats;
    use crate::store::MemoryResultStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn finding(id_seed: &str) -> Finding {
        let excerpt = format!("excerpt-{}", id_seed);
        Finding {
            finding_id: Finding::compute_id("/src/a.py", 3, "R2", &excerpt),
            file_path: "/src/a.py".to_string(),
            line: 3,
            language: Language::Python,
            rule_id: "R2".to_string(),
            rule_description: "Comprehensive PII detection".to_string(),
            category: Category::Pii,
            severity: Severity::High,
            match_excerpt: excerpt,
            description: "original".to_string(),
            fix_hint: String::new(),
            regulation_refs: vec![RegulationRef::new(Regulation::Gdpr, "Art. 9")],
            is_positive: false,
            suppressed: false,
            suppression_reason: None,
            truncated: false,
            ai_enhanced: false,
            ai_confidence: 0.0,
            ai_model: None,
        }
    }

    fn scan_output(findings: Vec<Finding>) -> ScanOutput {
        ScanOutput {
            findings,
            rule_stats: RuleStats {
                count: 10,
                rule_descriptions: Vec::new(),
            },
            counts_by_severity: BTreeMap::new(),
            counts_by_language: BTreeMap::new(),
        }
    }

    fn context(ai: Arc<dyn crate::ai::AiCollaborator>, enabled: bool) -> AgentContext {
        AgentContext {
            correlation_id: "corr-enhance".to_string(),
            store: Arc::new(MemoryResultStore::new()),
            ai,
            ai_enabled: enabled,
        }
    }

    #[tokio::test]
    async fn test_ai_unavailable_passes_through() {
        let input = scan_output(vec![finding("a"), finding("b")]);
        let original = input.findings.clone();
        let ctx = context(Arc::new(OfflineCollaborator), false);
        let result = AiEnhanceAgent::default().process(&ctx, input).await;
        assert_eq!(result.output.findings, original);
        assert!(!result.ai.used);
        assert_eq!(result.output.enhanced_count, 0);
    }

    #[tokio::test]
    async fn test_enhancement_merges_fields_only() {
        let f = finding("a");
        let id = f.finding_id.clone();
        let response = format!(
            r#"{{"enhancements": [{{"finding_id": "{}", "description": "enriched", "business_impact": "churn risk", "regulation_refs": [{{"regulation": "ccpa", "article": "§1798.150"}}], "confidence": 0.9}}], "new_findings": []}}"#,
            id
        );
        let ctx = context(Arc::new(ScriptedCollaborator::new(vec![Some(response)])), true);
        let result = AiEnhanceAgent::default()
            .process(&ctx, scan_output(vec![f]))
            .await;

        let enhanced = &result.output.findings[0];
        assert_eq!(enhanced.finding_id, id, "identity never changes");
        assert!(enhanced.description.starts_with("enriched"));
        assert!(enhanced.description.contains("churn risk"));
        assert!(enhanced.ai_enhanced);
        assert!((enhanced.ai_confidence - 0.9).abs() < f64::EPSILON);
        // Regulation refs are append-only: original plus the new one
        assert_eq!(enhanced.regulation_refs.len(), 2);
        assert!(result.ai.used);
    }

    #[tokio::test]
    async fn test_discovered_findings_carry_fresh_ids() {
        let response = r#"{"enhancements": [], "new_findings": [{"file_path": "/src/b.py", "line": 9, "description": "session fixation risk", "severity": "HIGH"}]}"#;
        let ctx = context(
            Arc::new(ScriptedCollaborator::new(vec![Some(response.to_string())])),
            true,
        );
        let result = AiEnhanceAgent::default()
            .process(&ctx, scan_output(vec![finding("a")]))
            .await;

        assert_eq!(result.output.discovered_count, 1);
        let discovered = result
            .output
            .findings
            .iter()
            .find(|f| f.rule_id == "AI_DISCOVERED")
            .unwrap();
        assert!(discovered.ai_enhanced);
        assert_eq!(discovered.line, 9);
        assert_ne!(discovered.finding_id, result.output.findings[0].finding_id);
    }

    #[tokio::test]
    async fn test_never_removes_findings() {
        let input = scan_output(vec![finding("a"), finding("b"), finding("c")]);
        let count = input.findings.len();
        // Malformed response: merge applies nothing, drops nothing
        let ctx = context(
            Arc::new(ScriptedCollaborator::new(vec![Some("garbage".to_string())])),
            true,
        );
        let result = AiEnhanceAgent::default().process(&ctx, input).await;
        assert_eq!(result.output.findings.len(), count);
    }

    #[tokio::test]
    async fn test_failed_batch_records_ai_unavailable() {
        let ctx = context(Arc::new(ScriptedCollaborator::new(vec![None])), true);
        let result = AiEnhanceAgent::default()
            .process(&ctx, scan_output(vec![finding("a")]))
            .await;
        assert!(result
            .errors
            .iter()
            .any(|e| e.class == ErrorClass::AiUnavailable));
        assert!(!result.output.findings[0].ai_enhanced);
    }

    #[tokio::test]
    async fn test_batching_respects_limit() {
        let findings: Vec<Finding> = (0..45).map(|i| {
            let excerpt = format!("excerpt-{}", i);
            let mut f = finding("x");
            f.line = i + 1;
            f.finding_id = Finding::compute_id("/src/a.py", i + 1, "R2", &excerpt);
            f
        }).collect();
        let ai = Arc::new(ScriptedCollaborator::new(vec![
            Some("{\"enhancements\": [], \"new_findings\": []}".to_string()),
            Some("{\"enhancements\": [], \"new_findings\": []}".to_string()),
            Some("{\"enhancements\": [], \"new_findings\": []}".to_string()),
        ]));
        let ctx = context(ai.clone(), true);
        let _ = AiEnhanceAgent::new(20)
            .process(&ctx, scan_output(findings))
            .await;
        // 45 findings / 20 per batch = 3 calls
        assert_eq!(ai.call_records().len(), 3);
    }
}
