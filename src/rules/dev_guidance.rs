//! R9 — developer guidance on PII-bearing construction and storage
//!
//! Hits are classified by impact (HIGH / MEDIUM / LOW, mirrored in the
//! severity) and carry a concrete suggestion.

use super::{subtype_violation, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use std::path::Path;

pub struct DevGuidanceRule {
    patterns: Vec<SubPattern>,
}

impl DevGuidanceRule {
    pub fn new() -> Self {
        use Severity::*;
        let patterns = vec![
            SubPattern::new(
                "PII Object Construction",
                r"(?i)\bnew\s+(?:User|Customer|Person|Patient|Profile|Account)\b.*\b(?:email|ssn|phone|date_of_birth|dob|address)\b",
                High,
                "impact: HIGH — object constructed with raw personal fields",
                "Wrap personal fields in a typed PII holder so redaction is automatic",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
            ),
            SubPattern::new(
                "PII Struct Initialization",
                r"(?i)\b(?:User|Customer|Person|Patient|Profile)\s*\{[^}]*\b(?:email|ssn|phone)\b",
                Medium,
                "impact: MEDIUM — struct literal carries personal fields",
                "Prefer builders that tag personal fields for downstream handling",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
            ),
            SubPattern::new(
                "PII Persisted",
                r"(?i)\b(?:save|store|persist|write)\w*\s*\(.*\b(?:email|ssn|phone|password|date_of_birth|dob)\b",
                High,
                "impact: HIGH — personal data persisted through a generic writer",
                "Persist personal data through the audited repository layer only",
                vec![
                    RegulationRef::new(Regulation::Gdpr, "Art. 32"),
                    RegulationRef::new(Regulation::Gdpr, "Art. 30"),
                ],
            ),
            SubPattern::new(
                "PII Cached",
                r"(?i)\bcache\w*\.\s*(?:set|put|add|insert)\s*\(.*\b(?:email|ssn|phone)\b",
                Medium,
                "impact: MEDIUM — personal data placed in a cache layer",
                "Cache surrogate keys, not personal values, or set a short TTL",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(e)")],
            ),
            SubPattern::new(
                "PII in Session State",
                r"(?i)\bsession\s*(?:\.|\[)\s*(?:set\s*\()?[^)\]]*\b(?:email|ssn|phone)\b",
                Medium,
                "impact: MEDIUM — personal data stored in session state",
                "Keep sessions to opaque identifiers; resolve PII server-side per request",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
            SubPattern::new(
                "PII Exported",
                r"(?i)\b(?:export|dump|to_csv|write_csv)\w*\s*\(.*\b(?:users?|email|ssn|phone)\b",
                Low,
                "impact: LOW — bulk export includes personal columns",
                "Gate exports behind access review and minimize exported columns",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 30")],
            ),
        ];
        Self { patterns }
    }
}

impl Default for DevGuidanceRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for DevGuidanceRule {
    fn id(&self) -> &'static str {
        "R9"
    }

    fn description(&self) -> &'static str {
        "Developer guidance"
    }

    fn category(&self) -> Category {
        Category::DevGuidance
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            for (pattern_index, sub) in self.patterns.iter().enumerate() {
                if sub.regex.is_match(line) {
                    violations.push(subtype_violation(
                        (idx + 1) as u32,
                        pattern_index,
                        sub,
                        line,
                    ));
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(content: &str) -> Vec<RuleViolation> {
        DevGuidanceRule::new().evaluate(content, Path::new("/tmp/t.java"))
    }

    #[test]
    fn test_object_construction_with_pii() {
        let hits = eval("User u = new User(email, ssn);");
        assert!(hits
            .iter()
            .any(|v| v.subtype.as_deref() == Some("PII Object Construction")));
    }

    #[test]
    fn test_impact_mirrored_in_severity() {
        let hits = eval("repo.save(user.email)");
        let hit = hits
            .iter()
            .find(|v| v.subtype.as_deref() == Some("PII Persisted"))
            .expect("persist pattern fires");
        assert_eq!(hit.severity, Severity::High);
        assert!(hit.description.contains("impact: HIGH"));
    }

    #[test]
    fn test_every_hit_has_suggestion() {
        let content = "cache.set(key, email)\nsession['email'] = e\n";
        for hit in eval(content) {
            assert!(!hit.fix_hint.is_empty());
        }
    }

    #[test]
    fn test_plain_construction_clean() {
        assert!(eval("Order o = new Order(sku, qty);").is_empty());
    }
}
