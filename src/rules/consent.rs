//! R4 — consent marker enforcement
//!
//! Data-capture assignments and PII-bearing object literals must carry a
//! consent marker on the same line or the immediately preceding non-blank
//! line. The window is fixed at one line and is not configurable.

use super::{subtype_violation, suppressed_by_marker_skip_blank, Rule, RuleViolation, SubPattern};
use crate::types::{truncate_excerpt, Category, Regulation, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;

/// Canonical consent markers: `@consent_required`, `@privacy_consent`,
/// `@gdpr_consent`, `data_purpose=...`, `profiling_disabled=true`.
const MARKER_PATTERN: &str =
    r"(?i)(?:@consent_required|@privacy_consent|@gdpr_consent|data_purpose\s*=|profiling_disabled\s*=\s*true)";

pub struct ConsentRule {
    patterns: Vec<SubPattern>,
    marker: Regex,
}

impl ConsentRule {
    pub fn new() -> Self {
        use Severity::*;
        let patterns = vec![
            SubPattern::new(
                "Data Capture Without Consent",
                r"(?i)\b(?:data_capture|capture_data|collect_user_data|track_user|user_tracking)\s*[:=]",
                High,
                "Data capture assignment without a consent marker",
                "Annotate with @consent_required and record the lawful basis",
                vec![
                    RegulationRef::new(Regulation::Gdpr, "Art. 6"),
                    RegulationRef::new(Regulation::Gdpr, "Art. 7"),
                ],
            ),
            SubPattern::new(
                "PII Object Without Consent",
                r#"(?i)\{[^}]*\b(?:email|ssn|phone|address|date_of_birth|dob)\s*:"#,
                Medium,
                "Object literal carries PII fields without a consent marker",
                "Annotate the capture site with a consent marker and purpose",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 6")],
            ),
            SubPattern::new(
                "Disabled Opt-Out",
                r"(?i)\bopt[_-]?out(?:_enabled)?\s*[:=]\s*false\b",
                High,
                "Opt-out mechanism disabled",
                "Opt-out must remain available to the data subject",
                vec![
                    RegulationRef::new(Regulation::Ccpa, "§1798.120"),
                    RegulationRef::new(Regulation::Gdpr, "Art. 21"),
                ],
            ),
            SubPattern::new(
                "Forced Consent",
                r"(?i)\bforced_consent\s*[:=]\s*true\b",
                High,
                "Consent is coerced rather than freely given",
                "Consent must be freely given, specific and revocable",
                vec![RegulationRef::new(Regulation::Gdpr, "Art. 7(4)")],
            ),
        ];
        Self {
            patterns,
            marker: Regex::new(MARKER_PATTERN).expect("consent marker pattern compiles"),
        }
    }
}

impl Default for ConsentRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for ConsentRule {
    fn id(&self) -> &'static str {
        "R4"
    }

    fn description(&self) -> &'static str {
        "Missing consent marker"
    }

    fn category(&self) -> Category {
        Category::Consent
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let lines: Vec<&str> = content.lines().collect();
        let mut violations = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            // Marker lines never violate; track them as positive practice.
            if self.marker.is_match(line) {
                violations.push(RuleViolation {
                    line: (idx + 1) as u32,
                    pattern_index: self.patterns.len(),
                    subtype: Some("Consent Marker Present".to_string()),
                    match_excerpt: truncate_excerpt(line.trim()),
                    severity: Severity::Low,
                    description: "Consent annotation found".to_string(),
                    fix_hint: String::new(),
                    regulation_refs: Vec::new(),
                    is_positive: true,
                });
                continue;
            }

            for (pattern_index, sub) in self.patterns.iter().enumerate() {
                if sub.regex.is_match(line)
                    && !suppressed_by_marker_skip_blank(&lines, idx, &self.marker)
                {
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
