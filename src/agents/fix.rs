//! S4 — fix suggestion stage
//!
//! Produces a concrete replacement, ordered steps and alternatives for
//! every counted finding. The deterministic fallback table is keyed on
//! rule id and language; AI enhancement, when available, substitutes
//! context-aware replacements. Fixes are grouped by file and by
//! priority derived from severity.

use super::{json_size, Agent, AgentContext, ComplianceAnalysis, StageRun};
use crate::ai::parse;
use crate::types::{
    AiUsage, ErrorClass, Finding, Language, Severity, StageError, StageResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STAGE_ID: &str = "fix";

/// Findings per collaborator call
const BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effort {
    Trivial,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub finding_id: String,
    pub rule_id: String,
    /// The offending excerpt
    pub before: String,
    /// Concrete replacement
    pub after: String,
    /// Ordered implementation steps
    pub steps: Vec<String>,
    pub alternatives: Vec<String>,
    pub effort: Effort,
    pub ai_enhanced: bool,
    pub ai_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutput {
    pub fixes: Vec<FixSuggestion>,
    /// File path → finding ids with fixes in that file
    pub by_file: BTreeMap<String, Vec<String>>,
    /// Priority (P1..P4 from severity) → finding ids
    pub by_priority: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct FixSuggestAgent;

impl FixSuggestAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for FixSuggestAgent {
    type Input = ComplianceAnalysis;
    type Output = FixOutput;

    fn stage_id(&self) -> &'static str {
        STAGE_ID
    }

    async fn process(
        &self,
        ctx: &AgentContext,
        input: ComplianceAnalysis,
    ) -> StageResult<FixOutput> {
        let run = StageRun::begin(STAGE_ID, ctx, json_size(&input));
        let mut errors = Vec::new();

        let targets: Vec<&Finding> = input
            .findings
            .iter()
            .filter(|f| !f.is_positive && !f.suppressed)
            .collect();

        let mut fixes: Vec<FixSuggestion> = targets.iter().map(|f| fallback_fix(f)).collect();

        let mut any_ai = false;
        if ctx.ai_enabled && !fixes.is_empty() {
            for chunk in (0..targets.len()).collect::<Vec<_>>().chunks(BATCH_SIZE) {
                let prompt = build_prompt(&targets, chunk);
                match ctx.ai_call(STAGE_ID, &prompt).await {
                    Some(response) => {
                        if apply_response(&response, &mut fixes) {
                            any_ai = true;
                        }
                    }
                    None => {
                        errors.push(StageError::new(
                            ErrorClass::AiUnavailable,
                            "fix enhancement declined, table-driven fixes kept",
                        ));
                    }
                }
            }
        }

        let mut by_file: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_priority: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (fix, finding) in fixes.iter().zip(targets.iter()) {
            by_file
                .entry(finding.file_path.clone())
                .or_default()
                .push(fix.finding_id.clone());
            by_priority
                .entry(priority_of(finding.severity).to_string())
                .or_default()
                .push(fix.finding_id.clone());
        }

        let ai = AiUsage {
            used: any_ai,
            model: any_ai.then(|| ctx.ai.model_id().to_string()),
            confidence: any_ai.then(|| {
                let enhanced: Vec<f64> = fixes
                    .iter()
                    .filter(|f| f.ai_enhanced)
                    .map(|f| f.ai_confidence)
                    .collect();
                if enhanced.is_empty() {
                    0.0
                } else {
                    enhanced.iter().sum::<f64>() / enhanced.len() as f64
                }
            }),
        };
        let input_summary = format!("{} findings needing fixes", fixes.len());
        let output = FixOutput {
            fixes,
            by_file,
            by_priority,
        };
        run.finish(ctx, input_summary, output, ai, errors).await
    }
}

fn priority_of(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "P1",
        Severity::High => "P2",
        Severity::Medium => "P3",
        Severity::Low => "P4",
    }
}

/// Deterministic fallback keyed on rule id and language.
fn fallback_fix(finding: &Finding) -> FixSuggestion {
    let (after, steps, alternatives, effort) = match finding.rule_id.as_str() {
        "R1" => (
            env_lookup(finding.language, "CONTACT_EMAIL"),
            vec![
                "Replace the literal with a configuration lookup".to_string(),
                "Add the address to deployment configuration".to_string(),
                "Confirm no test fixture depends on the literal".to_string(),
            ],
            vec!["Use a synthetic fixture address under example.com".to_string()],
            Effort::Trivial,
        ),
        "R2" => (
            "lookup_secret(\"<identifier>\")".to_string(),
            vec![
                "Remove the literal from source".to_string(),
                "Store the value in the secret manager or vault".to_string(),
                "Rotate the exposed value".to_string(),
                "Add a pre-commit scan to block reintroduction".to_string(),
            ],
            vec![
                "Tokenize the identifier via the privacy service".to_string(),
                "Move the value to environment-injected configuration".to_string(),
            ],
            Effort::Medium,
        ),
        "R3" => (
            "erasure_service.request_deletion(user_id)".to_string(),
            vec![
                "Route the operation through the erasure workflow".to_string(),
                "Record the deletion in the audit log".to_string(),
            ],
            vec!["Soft-delete with scheduled purge if audit requires".to_string()],
            Effort::Medium,
        ),
        "R4" => (
            format!("@consent_required\n{}", finding.match_excerpt),
            vec![
                "Add a consent marker on the line above the capture".to_string(),
                "Record the declared purpose with data_purpose=".to_string(),
            ],
            vec!["Gate the capture behind a consent check call".to_string()],
            Effort::Trivial,
        ),
        "R5" => (
            finding.match_excerpt.replace("http://", "https://"),
            vec![
                "Switch the endpoint to TLS".to_string(),
                "Enable certificate verification".to_string(),
                "Mark sensitive columns @encrypted".to_string(),
            ],
            vec!["Terminate TLS at the service mesh if available".to_string()],
            Effort::Small,
        ),
        "R6" => (
            "logger.info(\"user event\", user_id=hash(user_id))".to_string(),
            vec![
                "Redact or hash personal fields before the sink".to_string(),
                "Attach ttl/delete_after to retained data".to_string(),
                "Register writes with register_dsar()".to_string(),
            ],
            vec!["Route logs through a scrubbing middleware".to_string()],
            Effort::Small,
        ),
        "R7" => (
            format!("// @scope(read:pii)\n{}", finding.match_excerpt),
            vec![
                "Add the missing annotation for this pattern".to_string(),
                "Document the justification next to the annotation".to_string(),
            ],
            vec!["Move the data to an EEA region where applicable".to_string()],
            Effort::Small,
        ),
        "R8" => (
            "/* see cited provision */".to_string(),
            vec![
                "Review the cited GDPR article or CCPA section".to_string(),
                "Apply the provision-specific remediation".to_string(),
            ],
            Vec::new(),
            Effort::Medium,
        ),
        "R9" => (
            "PiiField::new(value)".to_string(),
            vec![
                "Wrap personal fields in the typed PII holder".to_string(),
                "Persist through the audited repository layer".to_string(),
            ],
            vec!["Cache surrogate keys instead of personal values".to_string()],
            Effort::Medium,
        ),
        _ => (
            "/* follow the finding description */".to_string(),
            vec!["Apply the remediation described in the finding".to_string()],
            Vec::new(),
            Effort::Medium,
        ),
    };

    FixSuggestion {
        finding_id: finding.finding_id.clone(),
        rule_id: finding.rule_id.clone(),
        before: finding.match_excerpt.clone(),
        after,
        steps,
        alternatives,
        effort,
        ai_enhanced: false,
        ai_confidence: 0.0,
    }
}

fn env_lookup(language: Language, key: &str) -> String {
    match language {
        Language::Java => format!("System.getenv(\"{}\")", key),
        Language::Python => format!("os.environ[\"{}\"]", key),
        Language::JavaScript | Language::TypeScript => format!("process.env.{}", key),
        Language::Go => format!("os.Getenv(\"{}\")", key),
        Language::CSharp => format!("Environment.GetEnvironmentVariable(\"{}\")", key),
        Language::Php => format!("getenv('{}')", key),
        Language::Ruby => format!("ENV['{}']", key),
        Language::Swift => format!("ProcessInfo.processInfo.environment[\"{}\"]", key),
        Language::Kotlin => format!("System.getenv(\"{}\")", key),
        Language::Rust => format!("std::env::var(\"{}\")", key),
        Language::Scala => format!("sys.env(\"{}\")", key),
    }
}

fn build_prompt(targets: &[&Finding], chunk: &[usize]) -> String {
    let mut listing = String::new();
    for &i in chunk {
        let f = targets[i];
        listing.push_str(&format!(
            "- id={} rule={} language={} excerpt={:?}\n",
            f.finding_id, f.rule_id, f.language, f.match_excerpt
        ));
    }
    format!(
        "Propose language-aware fixes for these privacy findings. Respond \
         with a JSON array only: [{{\"finding_id\": <id>, \"after\": <replacement>, \
         \"steps\": [<step>...], \"alternatives\": [<alt>...], \
         \"effort\": \"TRIVIAL\"|\"SMALL\"|\"MEDIUM\"|\"LARGE\", \
         \"confidence\": <0..1>}}]\n\nFindings:\n{}",
        listing
    )
}

/// Merge AI fixes over the fallback table. Returns true when anything
/// merged.
fn apply_response(response: &str, fixes: &mut [FixSuggestion]) -> bool {
    let Some(items) = parse::extract_json_array(response) else {
        return false;
    };
    let mut merged = false;
    for item in items {
        let Some(finding_id) = item.get("finding_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(fix) = fixes.iter_mut().find(|f| f.finding_id == finding_id) else {
            continue;
        };
        if let Some(after) = item.get("after").and_then(|v| v.as_str()) {
            if !after.is_empty() {
                fix.after = after.to_string();
            }
        }
        if let Some(steps) = item.get("steps").and_then(|v| v.as_array()) {
            let steps: Vec<String> = steps
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect();
            if !steps.is_empty() {
                fix.steps = steps;
            }
        }
        if let Some(alts) = item.get("alternatives").and_then(|v| v.as_array()) {
            fix.alternatives = alts
                .iter()
                .filter_map(|s| s.as_str().map(String::from))
                .collect();
        }
        if let Some(effort) = item.get("effort").and_then(|v| v.as_str()) {
            fix.effort = match effort.to_ascii_uppercase().as_str() {
                "TRIVIAL" => Effort::Trivial,
                "SMALL" => Effort::Small,
                "LARGE" => Effort::Large,
                _ => Effort::Medium,
            };
        }
        fix.ai_confidence = item
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        fix.ai_enhanced = true;
        merged = true;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::compliance::{RiskAssessment, RiskLevel};
    use crate::ai::{OfflineCollaborator, ScriptedCollaborator};
    use crate::store::MemoryResultStore;
    use crate::types::Category;
    use std::sync::Arc;

    fn finding(rule_id: &str, language: Language, severity: Severity, seed: u32) -> Finding {
        let excerpt = format!("bad_line_{}", seed);
        Finding {
            finding_id: Finding::compute_id("/a.py", seed, rule_id, &excerpt),
            file_path: "/a.py".to_string(),
            line: seed,
            language,
            rule_id: rule_id.to_string(),
            rule_description: String::new(),
            category: Category::Pii,
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

    fn analysis(findings: Vec<Finding>) -> ComplianceAnalysis {
        ComplianceAnalysis {
            findings,
            violations_by_regulation: BTreeMap::new(),
            compliance_score: 80,
            risk_assessment: RiskAssessment {
                business_risk: RiskLevel::Medium,
                legal_risk: RiskLevel::Medium,
                reputation_risk: RiskLevel::Low,
                financial_impact: String::new(),
            },
            recommendations: Vec::new(),
            total_findings: 0,
        }
    }

    fn context(ai: Arc<dyn crate::ai::AiCollaborator>, enabled: bool) -> AgentContext {
        AgentContext {
            correlation_id: "corr-fix".to_string(),
            store: Arc::new(MemoryResultStore::new()),
            ai,
            ai_enabled: enabled,
        }
    }

    #[tokio::test]
    async fn test_fallback_fix_is_language_aware() {
        let ctx = context(Arc::new(OfflineCollaborator), false);
        let result = FixSuggestAgent::new()
            .process(
                &ctx,
                analysis(vec![
                    finding("R1", Language::Java, Severity::Medium, 1),
                    finding("R1", Language::Python, Severity::Medium, 2),
                ]),
            )
            .await;
        assert!(result.output.fixes[0].after.contains("System.getenv"));
        assert!(result.output.fixes[1].after.contains("os.environ"));
        assert!(result.output.fixes.iter().all(|f| !f.ai_enhanced));
    }

    #[tokio::test]
    async fn test_http_rewrite() {
        let mut f = finding("R5", Language::JavaScript, Severity::High, 1);
        f.match_excerpt = "fetch('http://api.example.com')".to_string();
        let ctx = context(Arc::new(OfflineCollaborator), false);
        let result = FixSuggestAgent::new().process(&ctx, analysis(vec![f])).await;
        assert_eq!(
            result.output.fixes[0].after,
            "fetch('https://api.example.com')"
        );
    }

    #[tokio::test]
    async fn test_suppressed_and_positive_skipped() {
        let mut suppressed = finding("R2", Language::Python, Severity::High, 1);
        suppressed.suppressed = true;
        let mut positive = finding("R4", Language::Python, Severity::Low, 2);
        positive.is_positive = true;
        let counted = finding("R1", Language::Python, Severity::Medium, 3);

        let ctx = context(Arc::new(OfflineCollaborator), false);
        let result = FixSuggestAgent::new()
            .process(&ctx, analysis(vec![suppressed, positive, counted]))
            .await;
        assert_eq!(result.output.fixes.len(), 1);
    }

    #[tokio::test]
    async fn test_groupings() {
        let ctx = context(Arc::new(OfflineCollaborator), false);
        let result = FixSuggestAgent::new()
            .process(
                &ctx,
                analysis(vec![
                    finding("R2", Language::Python, Severity::Critical, 1),
                    finding("R1", Language::Python, Severity::Medium, 2),
                ]),
            )
            .await;
        assert_eq!(result.output.by_file["/a.py"].len(), 2);
        assert_eq!(result.output.by_priority["P1"].len(), 1);
        assert_eq!(result.output.by_priority["P3"].len(), 1);
    }

    #[tokio::test]
    async fn test_ai_merge_overrides_fallback() {
        let f = finding("R2", Language::Python, Severity::High, 1);
        let id = f.finding_id.clone();
        let response = format!(
            r#"[{{"finding_id": "{}", "after": "vault.get('db_ssn')", "steps": ["use vault"], "effort": "SMALL", "confidence": 0.8}}]"#,
            id
        );
        let ctx = context(Arc::new(ScriptedCollaborator::new(vec![Some(response)])), true);
        let result = FixSuggestAgent::new().process(&ctx, analysis(vec![f])).await;
        let fix = &result.output.fixes[0];
        assert_eq!(fix.after, "vault.get('db_ssn')");
        assert_eq!(fix.effort, Effort::Small);
        assert!(fix.ai_enhanced);
        assert!(result.ai.used);
    }

    #[tokio::test]
    async fn test_every_fix_has_before_and_steps() {
        let ctx = context(Arc::new(OfflineCollaborator), false);
        let findings: Vec<Finding> = ["R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9"]
            .iter()
            .enumerate()
            .map(|(i, r)| finding(r, Language::Go, Severity::Medium, i as u32 + 1))
            .collect();
        let result = FixSuggestAgent::new().process(&ctx, analysis(findings)).await;
        for fix in &result.output.fixes {
            assert!(!fix.before.is_empty());
            assert!(!fix.after.is_empty());
            assert!(!fix.steps.is_empty());
        }
    }
}
