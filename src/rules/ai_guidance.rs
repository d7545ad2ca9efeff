//! R8 — guidance patterns mapped to specific legal provisions
//!
//! Every hit names the GDPR article or CCPA section it contravenes, both
//! in the description and as a structured regulation reference.

use super::{subtype_violation, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use std::path::Path;

pub struct AiGuidanceRule {
    patterns: Vec<SubPattern>,
}

impl AiGuidanceRule {
    pub fn new() -> Self {
        use Severity::*;
        let patterns = vec![
            SubPattern::new(
                "Hardcoded Credentials",
                r#"(?i)\b(?:password|passwd|pwd|api_key|secret)\s*[:=]\s*["'][^"']+["']"#,
                High,
                "GDPR Art. 32: credentials embedded in source defeat access control",
                "Move credentials to a secret manager and rotate them",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
            SubPattern::new(
                "Excessive Data Collection",
                r"(?i)\bSELECT\s+\*\s+FROM\s+(?:users?|customers?|patients?|accounts?)\b",
                Medium,
                "GDPR Art. 5(1)(c): star-select over a personal-data table exceeds purpose",
                "Select only the columns the operation needs",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(c)")],
            ),
            SubPattern::new(
                "PII Logged",
                r"(?i)\blog\w*\s*\(.*\b(?:ssn|email|password|phone|credit_card)\b",
                High,
                "GDPR Art. 32: personal data written to log sinks",
                "Redact personal fields before logging",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
            SubPattern::new(
                "Third-Party Data Sharing",
                r"(?i)\b(?:facebook|google|amplitude|mixpanel|segment|hotjar)\s*\.\s*(?:init|track|send|identify)\b",
                Medium,
                "CCPA §1798.115: third-party analytics receives user data",
                "Disclose the integration and honor opt-out of sharing",
                vec![RegulationRef::new(Regulation::Ccpa, "§1798.115")],
            ),
            SubPattern::new(
                "Unworkflowed Permanent Deletion",
                r"(?i)\b(?:permanently_delete|hard_delete|purge_all)\b",
                Medium,
                "GDPR Art. 17: destructive deletion outside the erasure workflow",
                "Route deletions through the audited erasure workflow",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 17")],
            ),
            SubPattern::new(
                "Opt-Out Disabled",
                r"(?i)\bopt[_-]?out\w*\s*[:=]\s*false\b",
                High,
                "CCPA §1798.120: consumer opt-out is disabled",
                "Restore the opt-out path; it is a consumer right",
                vec![RegulationRef::new(Regulation::Ccpa, "§1798.120")],
            ),
            SubPattern::new(
                "Backup Everything",
                r"(?i)\bbackup[_\s-]?(?:all|everything)\b",
                Medium,
                "GDPR Art. 5(1)(e): blanket backups retain data past its purpose",
                "Scope backups and apply retention to them",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(e)")],
            ),
        ];
        Self { patterns }
    }
}

impl Default for AiGuidanceRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for AiGuidanceRule {
    fn id(&self) -> &'static str {
        "R8"
    }

    fn description(&self) -> &'static str {
        "Regulatory guidance hit"
    }

    fn category(&self) -> Category {
        Category::AiGuidance
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
