//! R5 — encryption and transport hardening
//!
//! SQL statements touching sensitive columns need an `@encrypt` /
//! `@encrypted` / `@secure` marker within the one-line window; insecure
//! transport and PII primary keys are flagged unconditionally; endpoints
//! returning PII need an `apply_rate_limit(` call somewhere in the file.

use super::{subtype_violation, suppressed_by_marker, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;

const MARKER_PATTERN: &str = r"(?i)@(?:encrypt(?:ed)?|secure)\b";

/// Call that marks an endpoint as throttled, checked file-wide
const RATE_LIMIT_TOKEN: &str = "apply_rate_limit(";

pub struct EncryptionRule {
    suppressible: Vec<SubPattern>,
    unconditional: Vec<SubPattern>,
    endpoint: SubPattern,
    marker: Regex,
}

impl EncryptionRule {
    pub fn new() -> Self {
        use Severity::*;
        let sensitive_ddl = r"(?i)\b(?:CREATE|ALTER)\s+TABLE\b.*\b(?:ssn|social_security|credit_card|card_number|password|email|phone|address|date_of_birth|dob|medical|diagnosis|salary)\b";
        let sensitive_dml = r"(?i)\b(?:INSERT\s+INTO|UPDATE)\b.*\b(?:ssn|social_security|credit_card|card_number|password|email|phone|address|date_of_birth|dob|medical|diagnosis|salary)\b";

        let suppressible = vec![
            SubPattern::new(
                "Unencrypted Sensitive Schema",
                sensitive_ddl,
                High,
                "Table DDL touches sensitive columns without an encryption marker",
                "Mark the column @encrypted and configure column-level encryption",
                vec![
                    RegulationRef::new(Regulation::Gdpr, "Art. 32"),
                    RegulationRef::new(Regulation::PciDss, "Req. 3.4"),
                ],
            ),
            SubPattern::new(
                "Unencrypted Sensitive Write",
                sensitive_dml,
                High,
                "Write statement touches sensitive columns without an encryption marker",
                "Encrypt sensitive values before persistence",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
        ];

        let unconditional = vec![
            SubPattern::new(
                "Insecure HTTP Protocol",
                r"http://",
                High,
                "Plain HTTP endpoint; personal data would transit unencrypted",
                "Use https:// for every remote call",
                vec![
                    RegulationRef::new(Regulation::Gdpr, "Art. 32"),
                    RegulationRef::new(Regulation::PciDss, "Req. 4.1"),
                ],
            ),
            SubPattern::new(
                "TLS Disabled",
                r"(?i)\b(?:tls|ssl)\s*[:=]\s*false\b",
                High,
                "Transport encryption explicitly disabled",
                "Remove the override; TLS must stay on",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
            SubPattern::new(
                "PII Primary Key",
                r"(?i)\b(?:email|phone|ssn)\w*\s+\w*\s*(?:\(\d+\))?\s*PRIMARY\s+KEY",
                Medium,
                "Raw PII used as a primary key",
                "Key rows on a surrogate id; PII keys leak through references",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
            ),
        ];

        let endpoint = SubPattern::new(
            "Unthrottled PII Endpoint",
            r#"(?i)(?:(?:app|router)\.(?:get|post|put)\s*\(\s*["'][^"']*(?:user|profile|account|email)|@(?:Get|Post|Put)Mapping\s*\([^)]*(?:user|profile|account|email))"#,
            Medium,
            "Endpoint returns personal data without rate limiting",
            "Wrap the handler with apply_rate_limit() to slow enumeration",
            vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
        );

        Self {
            suppressible,
            unconditional,
            endpoint,
            marker: Regex::new(MARKER_PATTERN).expect("encryption marker pattern compiles"),
        }
    }
}

impl Default for EncryptionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for EncryptionRule {
    fn id(&self) -> &'static str {
        "R5"
    }

    fn description(&self) -> &'static str {
        "Missing encryption safeguard"
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let lines: Vec<&str> = content.lines().collect();
        let has_rate_limit = content.contains(RATE_LIMIT_TOKEN);
        let mut violations = Vec::new();

        let base = self.suppressible.len();
        let endpoint_index = base + self.unconditional.len();

        for (idx, line) in lines.iter().enumerate() {
            for (pattern_index, sub) in self.suppressible.iter().enumerate() {
                if sub.regex.is_match(line)
                    && !suppressed_by_marker(&lines, idx, &self.marker)
                {
                    violations.push(subtype_violation(
                        (idx + 1) as u32,
                        pattern_index,
                        sub,
                        line,
                    ));
                }
            }
            for (offset, sub) in self.unconditional.iter().enumerate() {
                if sub.regex.is_match(line) {
                    violations.push(subtype_violation(
                        (idx + 1) as u32,
                        base + offset,
                        sub,
                        line,
                    ));
                }
            }
            if !has_rate_limit && self.endpoint.regex.is_match(line) {
                violations.push(subtype_violation(
                    (idx + 1) as u32,
                    endpoint_index,
                    &self.endpoint,
                    line,
                ));
            }
        }
        violations
    }
}
