//! Privacy rule catalog
//!
//! A rule is a deterministic function from file content to violations.
//! Every pattern is compiled once when the catalog is built and shared
//! across concurrent runs; evaluation performs no I/O.
//!
//! Catalog order is contractual: R1..R9 run in order for every file, and
//! the remote AI rule (R10) runs last, outside the synchronous hot path.
//! Within a rule, patterns run in declaration order.

mod advanced;
mod ai_guidance;
mod consent;
mod dataflow;
mod dev_guidance;
mod email;
mod encryption;
mod pii;
mod policy;
pub mod remote_ai;

pub use advanced::AdvancedPrivacyRule;
pub use ai_guidance::AiGuidanceRule;
pub use consent::ConsentRule;
pub use dataflow::DataFlowRule;
pub use dev_guidance::DevGuidanceRule;
pub use email::EmailPiiRule;
pub use encryption::EncryptionRule;
pub use pii::ComprehensivePiiRule;
pub use policy::PrivacyPolicyRule;
pub use remote_ai::RemoteAiRule;

use crate::types::{truncate_excerpt, Category, RegulationRef, Severity};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// A single would-be violation reported by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    /// 1-based line the pattern first matched on
    pub line: u32,
    /// Declaration index of the pattern inside its rule
    pub pattern_index: usize,
    /// Sub-pattern identity, preserved in the excerpt as `"<subtype>: <line>"`
    pub subtype: Option<String>,
    /// Offending snippet (subtype-prefixed where applicable), truncated
    pub match_excerpt: String,
    pub severity: Severity,
    pub description: String,
    pub fix_hint: String,
    pub regulation_refs: Vec<RegulationRef>,
    /// Good-practice marker, tracked but never counted
    pub is_positive: bool,
}

/// A deterministic privacy rule
pub trait Rule: Send + Sync {
    /// Short identifier, e.g. "R4"
    fn id(&self) -> &'static str;

    /// Human-readable description used in the output envelope
    fn description(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Evaluate file content. Pure: same content, same output, same order.
    fn evaluate(&self, content: &str, path: &Path) -> Vec<RuleViolation>;
}

/// One compiled sub-pattern of a catalog rule
pub(crate) struct SubPattern {
    pub subtype: &'static str,
    pub regex: Regex,
    pub severity: Severity,
    pub description: &'static str,
    pub fix_hint: &'static str,
    pub refs: Vec<RegulationRef>,
}

impl SubPattern {
    pub fn new(
        subtype: &'static str,
        pattern: &str,
        severity: Severity,
        description: &'static str,
        fix_hint: &'static str,
        refs: Vec<RegulationRef>,
    ) -> Self {
        Self {
            subtype,
            // Catalog patterns are static and covered by compile tests
            regex: Regex::new(pattern).unwrap_or_else(|e| {
                panic!("invalid catalog pattern for '{}': {}", subtype, e)
            }),
            severity,
            description,
            fix_hint,
            refs,
        }
    }
}

/// Build a violation with the `"<subtype>: <line>"` excerpt convention.
pub(crate) fn subtype_violation(
    line_no: u32,
    pattern_index: usize,
    sub: &SubPattern,
    line: &str,
) -> RuleViolation {
    RuleViolation {
        line: line_no,
        pattern_index,
        subtype: Some(sub.subtype.to_string()),
        match_excerpt: truncate_excerpt(&format!("{}: {}", sub.subtype, line.trim())),
        severity: sub.severity,
        description: sub.description.to_string(),
        fix_hint: sub.fix_hint.to_string(),
        regulation_refs: sub.refs.clone(),
        is_positive: false,
    }
}

/// Marker suppression: a marker on line `idx` (0-based) or the line
/// directly above disables a would-be violation on `idx`.
pub(crate) fn suppressed_by_marker(lines: &[&str], idx: usize, marker: &Regex) -> bool {
    if marker.is_match(lines[idx]) {
        return true;
    }
    idx > 0 && marker.is_match(lines[idx - 1])
}

/// Consent-style suppression: same line, or the nearest preceding
/// non-blank line.
pub(crate) fn suppressed_by_marker_skip_blank(
    lines: &[&str],
    idx: usize,
    marker: &Regex,
) -> bool {
    if marker.is_match(lines[idx]) {
        return true;
    }
    lines[..idx]
        .iter()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| marker.is_match(l))
}

/// Per-rule statistics exposed by the engine
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuleStats {
    pub count: usize,
    pub rule_descriptions: Vec<(String, String)>,
}

/// The compiled rule catalog, safely shareable across concurrent runs
pub struct RuleCatalog {
    rules: Vec<Arc<dyn Rule>>,
    remote_ai: Arc<RemoteAiRule>,
}

impl RuleCatalog {
    /// Compile every pattern in the catalog. Called once at startup.
    pub fn new(chunk_lines: usize) -> Self {
        let rules: Vec<Arc<dyn Rule>> = vec![
            Arc::new(EmailPiiRule::new()),
            Arc::new(ComprehensivePiiRule::new()),
            Arc::new(PrivacyPolicyRule::new()),
            Arc::new(ConsentRule::new()),
            Arc::new(EncryptionRule::new()),
            Arc::new(DataFlowRule::new()),
            Arc::new(AdvancedPrivacyRule::new()),
            Arc::new(AiGuidanceRule::new()),
            Arc::new(DevGuidanceRule::new()),
        ];
        Self {
            rules,
            remote_ai: Arc::new(RemoteAiRule::new(chunk_lines)),
        }
    }

    /// The synchronous rules (R1..R9) in catalog order
    pub fn sync_rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// The adapter-backed remote AI rule (R10)
    pub fn remote_ai(&self) -> Arc<RemoteAiRule> {
        Arc::clone(&self.remote_ai)
    }

    /// Catalog statistics: rule count plus `(id, description)` pairs
    pub fn stats(&self) -> RuleStats {
        let mut rule_descriptions: Vec<(String, String)> = self
            .rules
            .iter()
            .map(|r| (r.id().to_string(), r.description().to_string()))
            .collect();
        rule_descriptions.push((
            remote_ai::RULE_ID.to_string(),
            self.remote_ai.description().to_string(),
        ));
        RuleStats {
            count: rule_descriptions.len(),
            rule_descriptions,
        }
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::new(50)
    }
}
