//! Core data model shared across the scanner, rule engine and pipeline
//!
//! A [`Finding`] is the unit that flows through the five pipeline stages.
//! Stages may add fields but never alter `finding_id`, `file_path`, `line`
//! or `rule_id` once the Scan stage has produced the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Maximum byte length of a match excerpt before truncation
pub const MAX_EXCERPT_BYTES: usize = 512;

/// Severity of a finding, lowest first so `Ord` gives `Low < Critical`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational / hygiene issue
    #[default]
    Low,
    /// Should be fixed in the normal course of work
    Medium,
    /// Likely regulatory exposure
    High,
    /// Immediate action required
    Critical,
}

impl Severity {
    /// Contractual scoring weight (part of the compliance-score formula)
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 10,
            Severity::High => 5,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
        }
    }
}

/// Rule category a finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Hardcoded personally identifiable information
    #[serde(rename = "PII")]
    Pii,
    /// Weak encryption, insecure transport, credential exposure
    #[serde(rename = "SECURITY")]
    Security,
    /// Missing or disabled consent markers
    #[serde(rename = "CONSENT")]
    Consent,
    /// Unsafe movement of personal data (logs, retention, sinks)
    #[serde(rename = "DATAFLOW")]
    DataFlow,
    /// Context-aware patterns (scoping, residency, minimization)
    #[serde(rename = "ADVANCED")]
    Advanced,
    /// Guidance hits mapped to a specific law
    #[serde(rename = "AI_GUIDANCE")]
    AiGuidance,
    /// Developer-facing guidance with impact classification
    #[serde(rename = "DEV_GUIDANCE")]
    DevGuidance,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Pii => "PII",
            Category::Security => "SECURITY",
            Category::Consent => "CONSENT",
            Category::DataFlow => "DATAFLOW",
            Category::Advanced => "ADVANCED",
            Category::AiGuidance => "AI_GUIDANCE",
            Category::DevGuidance => "DEV_GUIDANCE",
        };
        write!(f, "{}", s)
    }
}

/// Supported source languages
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    TypeScript,
    Java,
    Python,
    Go,
    #[serde(rename = "csharp")]
    CSharp,
    Php,
    Ruby,
    Swift,
    Kotlin,
    Rust,
    Scala,
}

impl Language {
    /// All supported languages, in scanner registration order
    pub fn all() -> [Language; 12] {
        [
            Language::JavaScript,
            Language::TypeScript,
            Language::Java,
            Language::Python,
            Language::Go,
            Language::CSharp,
            Language::Php,
            Language::Ruby,
            Language::Swift,
            Language::Kotlin,
            Language::Rust,
            Language::Scala,
        ]
    }

    /// File extensions claimed by this language's scanner
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::Java => &["java"],
            Language::Python => &["py"],
            Language::Go => &["go"],
            Language::CSharp => &["cs"],
            Language::Php => &["php"],
            Language::Ruby => &["rb"],
            Language::Swift => &["swift"],
            Language::Kotlin => &["kt", "kts"],
            Language::Rust => &["rs"],
            Language::Scala => &["scala"],
        }
    }

    /// Resolve a language from a file extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.to_ascii_lowercase();
        Language::all()
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Python => "python",
            Language::Go => "go",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Rust => "rust",
            Language::Scala => "scala",
        };
        write!(f, "{}", s)
    }
}

/// Regulation a finding maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regulation {
    Gdpr,
    Ccpa,
    Hipaa,
    PciDss,
}

impl std::fmt::Display for Regulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regulation::Gdpr => write!(f, "GDPR"),
            Regulation::Ccpa => write!(f, "CCPA"),
            Regulation::Hipaa => write!(f, "HIPAA"),
            Regulation::PciDss => write!(f, "PCI-DSS"),
        }
    }
}

/// A `(regulation, article_or_section)` pair carried on a finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegulationRef {
    pub regulation: Regulation,
    /// Article or section identifier, e.g. "Art. 17" or "§1798.120"
    pub article: String,
}

impl RegulationRef {
    pub fn new(regulation: Regulation, article: impl Into<String>) -> Self {
        Self {
            regulation,
            article: article.into(),
        }
    }
}

/// A single privacy observation produced by a rule against a file line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable hash of `(file_path, line, rule_id, match_excerpt)`
    pub finding_id: String,
    pub file_path: String,
    /// 1-based line number
    pub line: u32,
    pub language: Language,
    pub rule_id: String,
    pub rule_description: String,
    pub category: Category,
    pub severity: Severity,
    /// Offending snippet, truncated to [`MAX_EXCERPT_BYTES`]
    pub match_excerpt: String,
    pub description: String,
    pub fix_hint: String,
    /// Append-only across stages
    pub regulation_refs: Vec<RegulationRef>,
    /// Good-practice marker — carried for bookkeeping, never counted
    #[serde(default)]
    pub is_positive: bool,
    /// Set by a later stage instead of deleting the record
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression_reason: Option<String>,
    /// File content was truncated before rule evaluation
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub ai_enhanced: bool,
    /// Confidence in [0,1] when AI-enhanced
    #[serde(default)]
    pub ai_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
}

impl Finding {
    /// Compute the stable identity hash for a finding.
    ///
    /// First 16 hex characters of SHA-256 over the four identity fields
    /// joined with a unit separator, so no field concatenation can collide.
    pub fn compute_id(file_path: &str, line: u32, rule_id: &str, match_excerpt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_path.as_bytes());
        hasher.update([0x1f]);
        hasher.update(line.to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update(rule_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(match_excerpt.as_bytes());
        let digest = hasher.finalize();
        digest
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Append a regulation reference if not already present
    pub fn add_regulation_ref(&mut self, reference: RegulationRef) {
        if !self.regulation_refs.contains(&reference) {
            self.regulation_refs.push(reference);
        }
    }
}

/// Truncate an excerpt to [`MAX_EXCERPT_BYTES`] on a char boundary,
/// appending a trailing `…` when anything was cut.
pub fn truncate_excerpt(text: &str) -> String {
    if text.len() <= MAX_EXCERPT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_EXCERPT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Escape an excerpt for the stable rule output envelope:
/// double quotes as `\"`, newlines as `\n`.
pub fn escape_excerpt(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Inline source submitted instead of a project path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineSource {
    pub content: String,
    /// File extension, e.g. "java" or "py"
    pub file_type: String,
}

/// Rule allow-list: `"*"` or an explicit set of rule ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleFilter {
    /// `"*"` — every catalog rule runs
    Wildcard(String),
    /// Only the listed rule ids run
    Only(BTreeSet<String>),
}

impl RuleFilter {
    pub fn all() -> Self {
        RuleFilter::Wildcard("*".to_string())
    }

    pub fn allows(&self, rule_id: &str) -> bool {
        match self {
            RuleFilter::Wildcard(_) => true,
            RuleFilter::Only(set) => set.contains(rule_id),
        }
    }
}

impl Default for RuleFilter {
    fn default() -> Self {
        RuleFilter::all()
    }
}

/// Language allow-list: `"*"` or an explicit set of languages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageFilter {
    Wildcard(String),
    Only(BTreeSet<Language>),
}

impl LanguageFilter {
    pub fn all() -> Self {
        LanguageFilter::Wildcard("*".to_string())
    }

    pub fn allows(&self, language: Language) -> bool {
        match self {
            LanguageFilter::Wildcard(_) => true,
            LanguageFilter::Only(set) => set.contains(&language),
        }
    }
}

impl Default for LanguageFilter {
    fn default() -> Self {
        LanguageFilter::all()
    }
}

/// Per-run options on a [`ScanRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Enable the AI collaborator for this run
    pub ai_enabled: bool,
    /// Truncation threshold for scanned files
    pub max_bytes_per_file: usize,
    pub rule_filter: RuleFilter,
    /// Findings below this severity are dropped by the Scan stage
    pub severity_floor: Severity,
    pub language_filter: LanguageFilter,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            max_bytes_per_file: 1_048_576,
            rule_filter: RuleFilter::all(),
            severity_floor: Severity::Low,
            language_filter: LanguageFilter::all(),
        }
    }
}

/// Top-level pipeline request. Exactly one of `project_path` or
/// `inline_source` must be provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_source: Option<InlineSource>,
    #[serde(default)]
    pub options: ScanOptions,
}

/// Error taxonomy recorded in `StageResult.errors`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Schema violation on the top-level request
    InputInvalid,
    /// File read or persistence failure
    IoTransient,
    /// Exception inside a rule's evaluator for a single file
    RuleInternal,
    /// Any failure of the AI collaborator
    AiUnavailable,
    /// Stage finished with errors but produced usable output
    StagePartial,
    /// Global deadline tripped
    DeadlineExceeded,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::InputInvalid => "INPUT_INVALID",
            ErrorClass::IoTransient => "IO_TRANSIENT",
            ErrorClass::RuleInternal => "RULE_INTERNAL",
            ErrorClass::AiUnavailable => "AI_UNAVAILABLE",
            ErrorClass::StagePartial => "STAGE_PARTIAL",
            ErrorClass::DeadlineExceeded => "DEADLINE_EXCEEDED",
        };
        write!(f, "{}", s)
    }
}

/// A recoverable error recorded by a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub class: ErrorClass,
    pub message: String,
}

impl StageError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// AI usage recorded on a stage result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiUsage {
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Envelope persisted after every stage as
/// `stage_result/{correlation_id}/{stage_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult<T> {
    pub correlation_id: String,
    pub stage_id: String,
    pub produced_at: DateTime<Utc>,
    /// Human-readable summary of the stage input, for operators
    pub input_summary: String,
    pub output: T,
    pub ai: AiUsage,
    #[serde(default = "Vec::new")]
    pub errors: Vec<StageError>,
}
