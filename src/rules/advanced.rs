//! R7 — context-aware privacy patterns
//!
//! Each pattern carries its own suppression marker, honored on the match
//! line or the line directly above. Canonical marker spellings are fixed
//! here; matching is case-insensitive for `@`-markers.

use super::{subtype_violation, suppressed_by_marker, Rule, RuleViolation, SubPattern};
use crate::types::{Category, Regulation, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;

struct MarkedPattern {
    sub: SubPattern,
    marker: Regex,
}

pub struct AdvancedPrivacyRule {
    patterns: Vec<MarkedPattern>,
}

fn marked(sub: SubPattern, marker: &str) -> MarkedPattern {
    MarkedPattern {
        sub,
        marker: Regex::new(marker).expect("advanced rule marker compiles"),
    }
}

impl AdvancedPrivacyRule {
    pub fn new() -> Self {
        use Severity::*;
        let patterns = vec![
            marked(
                SubPattern::new(
                    "Unscoped PII Field",
                    r"(?i)\b(?:email|ssn|phone|address|date_of_birth|dob)\s*:\s*(?:String|ID|Int|Float|Boolean)\b",
                    Medium,
                    "API schema exposes a PII field without an access scope",
                    "Annotate the field with @scope naming the required permission",
                    vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
                ),
                r"(?i)@scope\b",
            ),
            marked(
                SubPattern::new(
                    "Tracking Without Opt-Out",
                    r"(?i)(?:googletagmanager|google-analytics|doubleclick|facebook\.net|\bgtag\s*\(|\bfbq\s*\()",
                    Medium,
                    "Ad or analytics loader without an opt-out consent gate",
                    r#"Gate the loader behind consent="opt_out" handling"#,
                    vec![
                        RegulationRef::new(Regulation::Gdpr, "Art. 7"),
                        RegulationRef::new(Regulation::Ccpa, "§1798.120"),
                    ],
                ),
                r#"consent="opt_out""#,
            ),
            marked(
                SubPattern::new(
                    "Non-EEA Region For EU Data",
                    r#"(?i)\bregion\s*[:=]\s*["'](?:us|ap|sa|ca|me|af)-\w+-\d"#,
                    Medium,
                    "Storage region outside the EEA in a file handling EU data",
                    "Pin EU personal data to an EEA region or document the transfer mechanism",
                    vec![RegulationRef::new(Regulation::Gdpr, "Ch. V")],
                ),
                r"(?i)@residency_approved\b",
            ),
            marked(
                SubPattern::new(
                    "Unpseudonymized PII Join",
                    r"(?i)\bJOIN\b.*\b(?:users?|customers?|patients?|profiles?)\b.*\bON\b.*\b(?:email|ssn|phone)\b",
                    Medium,
                    "Large PII-table join on raw identifiers",
                    "Join on pseudonymize()/hash()/tokenize() outputs instead",
                    vec![RegulationRef::new(Regulation::Gdpr, "Art. 25")],
                ),
                r"(?i)\b(?:pseudonymize|hash|tokenize)\b",
            ),
            marked(
                SubPattern::new(
                    "Training Without Minimization",
                    r"(?i)\b(?:train(?:ing)?_(?:data|set)|fit\s*\(\s*user|model\.train)\b.*\b(?:user|customer|personal)\b",
                    Medium,
                    "Model training over personal data without a minimization note",
                    "Record the minimization applied before training on personal data",
                    vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(c)")],
                ),
                r"(?i)\bminimization\b",
            ),
            marked(
                SubPattern::new(
                    "API Version Without Privacy Contract",
                    r#"(?i)\bapi[_-]?version\s*[:=]\s*["']?v?\d+"#,
                    Low,
                    "API version bump without a privacy contract version",
                    "Version the privacy contract alongside the API surface",
                    vec![RegulationRef::new(Regulation::Gdpr, "Art. 24")],
                ),
                r"(?i)\bprivacy_contract_version\b",
            ),
            marked(
                SubPattern::new(
                    "Unjustified New Column",
                    r"(?i)\bADD\s+COLUMN\s+\w+",
                    Low,
                    "Column added without a usage annotation",
                    "Annotate new columns @required, @referenced or @used",
                    vec![RegulationRef::new(Regulation::Gdpr, "Art. 5(1)(c)")],
                ),
                r"(?i)@(?:required|referenced|used)\b",
            ),
        ];
        Self { patterns }
    }
}

impl Default for AdvancedPrivacyRule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for AdvancedPrivacyRule {
    fn id(&self) -> &'static str {
        "R7"
    }

    fn description(&self) -> &'static str {
        "Advanced privacy pattern"
    }

    fn category(&self) -> Category {
        Category::Advanced
    }

    fn evaluate(&self, content: &str, _path: &Path) -> Vec<RuleViolation> {
        let lines: Vec<&str> = content.lines().collect();
        let mut violations = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            for (pattern_index, mp) in self.patterns.iter().enumerate() {
                if mp.sub.regex.is_match(line)
                    && !suppressed_by_marker(&lines, idx, &mp.marker)
                {
                    violations.push(subtype_violation(
                        (idx + 1) as u32,
                        pattern_index,
                        &mp.sub,
                        line,
                    ));
                }
            }
        }
        violations
    }
}
