//! R10 — remote AI analysis
//!
//! Chunks file content by line count, asks the collaborator for
//! structured findings per chunk, and maps the JSON records back onto
//! absolute line numbers. Any failure yields an empty list; the rest of
//! the catalog is unaffected.

use super::RuleViolation;
use crate::ai::{parse, AiCollaborator, PromptContext};
use crate::types::{truncate_excerpt, Regulation, RegulationRef, Severity};
use std::path::Path;

pub const RULE_ID: &str = "R10";

pub struct RemoteAiRule {
    chunk_lines: usize,
}

impl RemoteAiRule {
    pub fn new(chunk_lines: usize) -> Self {
        Self {
            chunk_lines: chunk_lines.max(1),
        }
    }

    pub fn description(&self) -> &'static str {
        "Remote AI privacy analysis"
    }

    /// Evaluate a file through the collaborator. Empty on any failure.
    ///
    /// Chunk calls run concurrently; responses merge back in chunk order
    /// so output stays deterministic for a given set of responses.
    pub async fn evaluate(
        &self,
        ai: &dyn AiCollaborator,
        content: &str,
        path: &Path,
        correlation_id: &str,
    ) -> Vec<RuleViolation> {
        let lines: Vec<&str> = content.lines().collect();
        let context = PromptContext {
            correlation_id: correlation_id.to_string(),
            caller: RULE_ID.to_string(),
        };

        let calls = lines.chunks(self.chunk_lines).enumerate().map(|(chunk_no, chunk)| {
            let context = context.clone();
            let prompt = build_prompt(path, chunk_no * self.chunk_lines, chunk);
            async move { ai.analyze(&prompt, &context).await }
        });
        let responses = futures::future::join_all(calls).await;

        let mut violations = Vec::new();
        for (chunk_no, response) in responses.into_iter().enumerate() {
            let Some(response) = response else {
                continue;
            };
            let Some(items) = parse::extract_json_array(&response) else {
                tracing::debug!(
                    path = %path.display(),
                    chunk = chunk_no,
                    "AI response had no JSON array, skipping chunk"
                );
                continue;
            };
            let base_line = chunk_no * self.chunk_lines;
            for (index, item) in items.iter().enumerate() {
                if let Some(v) = map_item(item, index, base_line, lines.len()) {
                    violations.push(v);
                }
            }
        }
        violations
    }
}

fn build_prompt(path: &Path, base_line: usize, chunk: &[&str]) -> String {
    let numbered: String = chunk
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>5}: {}\n", base_line + i + 1, line))
        .collect();
    format!(
        "You are a privacy compliance reviewer. Analyze this source excerpt from {} \
         for privacy violations not caught by regex rules: contextual PII exposure, \
         consent gaps, risky data flows.\n\
         Respond with a JSON array only. Each element: \
         {{\"line\": <absolute line number>, \"subtype\": <short name>, \
         \"description\": <one sentence>, \"fix\": <one sentence>, \
         \"law\": <e.g. \"GDPR Art. 32\" or \"CCPA §1798.120\">, \
         \"severity\": \"CRITICAL\"|\"HIGH\"|\"MEDIUM\"|\"LOW\"}}.\n\
         Return [] if the excerpt is clean.\n\n{}",
        path.display(),
        numbered
    )
}

/// Map one JSON record to a violation; `None` drops malformed records.
fn map_item(
    item: &serde_json::Value,
    index: usize,
    base_line: usize,
    total_lines: usize,
) -> Option<RuleViolation> {
    let line = item.get("line")?.as_u64()? as usize;
    if line == 0 || line > total_lines.max(base_line + 1) {
        return None;
    }
    let subtype = item.get("subtype")?.as_str()?.to_string();
    let description = item
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("AI-flagged privacy concern")
        .to_string();
    let fix = item
        .get("fix")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let severity = item
        .get("severity")
        .and_then(|v| v.as_str())
        .map(parse_severity)
        .unwrap_or(Severity::Medium);
    let regulation_refs = item
        .get("law")
        .and_then(|v| v.as_str())
        .and_then(parse_law)
        .map(|r| vec![r])
        .unwrap_or_default();

    Some(RuleViolation {
        line: line as u32,
        pattern_index: index,
        subtype: Some(subtype.clone()),
        match_excerpt: truncate_excerpt(&format!("{}: {}", subtype, description)),
        severity,
        description,
        fix_hint: fix,
        regulation_refs,
        is_positive: false,
    })
}

fn parse_severity(s: &str) -> Severity {
    match s.to_ascii_uppercase().as_str() {
        "CRITICAL" => Severity::Critical,
        "HIGH" => Severity::High,
        "LOW" => Severity::Low,
        _ => Severity::Medium,
    }
}

/// Parse a law string like "GDPR Art. 32" into a structured reference.
fn parse_law(law: &str) -> Option<RegulationRef> {
    let trimmed = law.trim();
    let (regulation, rest) = if let Some(rest) = trimmed.strip_prefix("GDPR") {
        (Regulation::Gdpr, rest)
    } else if let Some(rest) = trimmed.strip_prefix("CCPA") {
        (Regulation::Ccpa, rest)
    } else if let Some(rest) = trimmed.strip_prefix("HIPAA") {
        (Regulation::Hipaa, rest)
    } else if let Some(rest) = trimmed.strip_prefix("PCI-DSS") {
        (Regulation::PciDss, rest)
    } else {
        return None;
    };
    let article = rest.trim().trim_start_matches(':').trim();
    if article.is_empty() {
        return None;
    }
    Some(RegulationRef::new(regulation, article))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{OfflineCollaborator, ScriptedCollaborator};

    #[tokio::test]
    async fn test_unavailable_ai_returns_empty() {
        let rule = RemoteAiRule::new(50);
        let hits = rule
            .evaluate(
                &OfflineCollaborator,
                "password = \"x\"\n",
                Path::new("/tmp/t.py"),
                "corr-1",
            )
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_maps_json_records() {
        let response = r#"```json
[{"line": 2, "subtype": "Contextual PII", "description": "User identity inferable", "fix": "Pseudonymize", "law": "GDPR Art. 25", "severity": "HIGH"}]
```"#;
        let ai = ScriptedCollaborator::new(vec![Some(response.to_string())]);
        let rule = RemoteAiRule::new(50);
        let hits = rule
            .evaluate(&ai, "a = 1\nb = lookup(user)\n", Path::new("/tmp/t.py"), "c")
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].severity, Severity::High);
        assert_eq!(hits[0].regulation_refs[0].regulation, Regulation::Gdpr);
    }

    #[tokio::test]
    async fn test_malformed_response_dropped() {
        let ai = ScriptedCollaborator::new(vec![Some("not json at all".to_string())]);
        let rule = RemoteAiRule::new(50);
        let hits = rule
            .evaluate(&ai, "a = 1\n", Path::new("/tmp/t.py"), "c")
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_chunking_calls_per_chunk() {
        let content = (0..120).map(|i| format!("line{}\n", i)).collect::<String>();
        let ai = ScriptedCollaborator::new(vec![
            Some("[]".to_string()),
            Some("[]".to_string()),
            Some("[]".to_string()),
        ]);
        let rule = RemoteAiRule::new(50);
        let _ = rule
            .evaluate(&ai, &content, Path::new("/tmp/t.py"), "c")
            .await;
        // 120 lines / 50 per chunk = 3 calls
        assert_eq!(ai.call_records().len(), 3);
    }

    #[test]
    fn test_parse_law() {
        let r = parse_law("GDPR Art. 32").unwrap();
        assert_eq!(r.regulation, Regulation::Gdpr);
        assert_eq!(r.article, "Art. 32");
        assert!(parse_law("Klingon Code 7").is_none());
        assert_eq!(
            parse_law("CCPA §1798.120").unwrap().regulation,
            Regulation::Ccpa
        );
    }
}
