//! R1 — hardcoded email address detection

use super::{Rule, RuleViolation};
use crate::types::{truncate_excerpt, Category, Regulation, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;

/// Flags email-like literals anywhere in source text.
///
/// Block-comment continuation lines (trimmed lines starting with `*`) are
/// skipped: emails there are typically author annotations, not data.
pub struct EmailPiiRule {
    pattern: Regex,
}

impl EmailPiiRule {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[a-z]{2,}")
                .expect("email pattern compiles"),
        }
    }
}

impl Default for EmailPiiRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for EmailPiiRule {
    fn id(&self) -> &'static str {
        "R1"
    }

    fn description(&self) -> &'static str {
        "Hardcoded email address (PII)"
    }

    fn category(&self) -> Category {
        Category::Pii
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('*') {
                continue;
            }
            if let Some(m) = self.pattern.find(line) {
                violations.push(RuleViolation {
                    line: (idx + 1) as u32,
                    pattern_index: 0,
                    subtype: None,
                    match_excerpt: truncate_excerpt(m.as_str()),
                    severity: Severity::Medium,
                    description: "Email address literal embedded in source".to_string(),
                    fix_hint: "Move the address to configuration or use a synthetic fixture value"
                        .to_string(),
                    regulation_refs: vec![
                        RegulationRef::new(Regulation::Gdpr, "Art. 4(1)"),
                        RegulationRef::new(Regulation::Ccpa, "§1798.140(o)"),
                    ],
                    is_positive: false,
                });
            }
        }
        violations
    }
}
