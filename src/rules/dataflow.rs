//! R6 — unsafe data-flow detection
//!
//! Tracks personal data moving somewhere it should not: log sinks, stack
//! traces, unbounded retention and DSAR-invisible writes. The retention
//! and DSAR checks are file-scoped: a companion token anywhere in the
//! file satisfies them.

use super::{subtype_violation, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;

/// Tokens that satisfy the retention check anywhere in the file
const TTL_TOKEN: &str = r"(?i)\b(?:ttl|delete_after|expires(?:_at|_in)?)\b";

/// Call that registers a write for data-subject access requests
const DSAR_TOKEN: &str = "register_dsar(";

pub struct DataFlowRule {
    source_assign: SubPattern,
    pii_logging: SubPattern,
    stack_trace: SubPattern,
    retention: SubPattern,
    dsar_write: SubPattern,
    ttl: Regex,
}

impl DataFlowRule {
    pub fn new() -> Self {
        use Severity::*;
        Self {
            source_assign: SubPattern::new(
                "Sensitive Data Source",
                r"(?i)\b(?:ssn|email|phone|password|credit_card|date_of_birth|dob|address)\w*\s*=\s*(?:request|req|form|input|params|event)\b",
                Medium,
                "Personal data read from an external source into a sensitive binding",
                "Validate, minimize and tag the capture with its purpose",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(c)")],
            ),
            pii_logging: SubPattern::new(
                "PII in Log Statement",
                r"(?i)\b(?:console\.(?:log|info|warn|error)|log(?:ger)?\.(?:trace|debug|info|warn|error)|print(?:ln)?|puts|System\.out\.print\w*)\s*\(.*\b(?:ssn|email|password|phone|credit_card|date_of_birth|dob|user_data)\b",
                High,
                "Log call argument references personal data",
                "Redact or hash personal fields before logging",
                vec![
                    RegulationRef::new(Regulation::Gdpr, "Art. 32"),
                    RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(f)"),
                ],
            ),
            stack_trace: SubPattern::new(
                "Unsanitized Stack Trace",
                r"(?i)(?:printStackTrace\s*\(|traceback\.print_exc|console\.trace\s*\(|\.stack\b.*(?:log|print|send)|\bbacktrace\b.*(?:log|print))",
                Medium,
                "Stack trace emitted without sanitization",
                "Route exceptions through a sanitizing error reporter",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 32")],
            ),
            retention: SubPattern::new(
                "Unbounded Retention",
                r"(?i)\bretain\w*\b.*\bfor\s+\d+",
                Medium,
                "Retention declared without a TTL or deletion companion",
                "Pair every retention window with ttl/delete_after/expires handling",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(e)")],
            ),
            dsar_write: SubPattern::new(
                "DSAR-Invisible Write",
                r"(?i)\b(?:INSERT\s+INTO|UPDATE)\b.*\b(?:email|ssn|phone|address|date_of_birth|dob)\b",
                Medium,
                "Personal data written without DSAR registration",
                "Call register_dsar() so subject access requests can find this data",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 15")],
            ),
            ttl: Regex::new(TTL_TOKEN).expect("ttl token pattern compiles"),
        }
    }

    fn ordered(&self) -> [&SubPattern; 5] {
        [
            &self.source_assign,
            &self.pii_logging,
            &self.stack_trace,
            &self.retention,
            &self.dsar_write,
        ]
    }
}

impl Default for DataFlowRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for DataFlowRule {
    fn id(&self) -> &'static str {
        "R6"
    }

    fn description(&self) -> &'static str {
        "Unsafe data flow"
    }

    fn category(&self) -> Category {
        Category::DataFlow
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let has_ttl = self.ttl.is_match(content);
        let has_dsar = content.contains(DSAR_TOKEN);
        let mut violations = Vec::new();

        // Declaration indices of the file-scoped patterns
        const RETENTION: usize = 3;
        const DSAR: usize = 4;

        for (idx, line) in content.lines().enumerate() {
            for (pattern_index, sub) in self.ordered().into_iter().enumerate() {
                // File-scoped companions disable their pattern entirely.
                if pattern_index == RETENTION && has_ttl {
                    continue;
                }
                if pattern_index == DSAR && has_dsar {
                    continue;
                }
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
