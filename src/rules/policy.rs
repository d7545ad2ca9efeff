//! R3 — privacy policy hazards (right to erasure, do-not-sell)

use super::{subtype_violation, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use std::path::Path;

/// Flags constructs that conflict with GDPR "right to erasure" and CCPA
/// "do not sell" obligations.
pub struct PrivacyPolicyRule {
    patterns: Vec<SubPattern>,
}

impl PrivacyPolicyRule {
    pub fn new() -> Self {
        use Severity::*;
        let patterns = vec![
            SubPattern::new(
                "Hardcoded User Deletion",
                r"(?i)\bDELETE\s+FROM\s+users?\b[^;]*\bWHERE\b[^;]*\bid\s*=\s*\d+",
                High,
                "User row deleted by hardcoded id instead of an erasure workflow",
                "Route deletions through the right-to-erasure workflow with audit logging",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 17")],
            ),
            SubPattern::new(
                "Sell User Data Flag",
                r"(?i)\bsell_user_data\s*[:=]\s*true\b",
                High,
                "Data-sale flag enabled in source",
                "Selling personal data requires an opt-out path and disclosure",
                vec![RegulationRef::new(Regulation::Ccpa, "§1798.120")],
            ),
            SubPattern::new(
                "Collect All Data",
                r"(?i)\bcollect[_\s-]?all[_\s-]?data\b",
                High,
                "Blanket data collection literal",
                "Collect only what the declared purpose requires",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(c)")],
            ),
            SubPattern::new(
                "Store Everything",
                r"(?i)\bstore[_\s-]?everything\b",
                High,
                "Blanket data retention literal",
                "Define per-category retention limits",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(e)")],
            ),
        ];
        Self { patterns }
    }
}

impl Default for PrivacyPolicyRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for PrivacyPolicyRule {
    fn id(&self) -> &'static str {
        "R3"
    }

    fn description(&self) -> &'static str {
        "Privacy policy hazard"
    }

    fn category(&self) -> Category {
        Category::Consent
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
