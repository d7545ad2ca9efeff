//! PrivGuard - Privacy and data-protection scanner with an agent pipeline
//!
//! PrivGuard scans source repositories for privacy violations (hardcoded
//! PII, weak encryption, missing consent markers, unsafe data flows),
//! enriches findings with AI-derived context, maps them to regulations
//! (GDPR / CCPA / HIPAA / PCI-DSS), synthesizes remediation suggestions
//! and emits an aggregated report.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                            │
//! │   Scan ─▶ AI-Enhance ─▶ Compliance ─▶ Fix-Suggest ─▶ Report     │
//! │    │                                                    │       │
//! │    ▼                                                    ▼       │
//! │  ┌───────────────────────────┐               ┌───────────────┐  │
//! │  │        Rule Engine        │               │  Result Store │  │
//! │  │  scanners × files × rules │               │  stage_result │  │
//! │  │  (bounded worker pool)    │               │  + report blob│  │
//! │  └─────────────┬─────────────┘               └───────────────┘  │
//! │                │                                                │
//! │  ┌─────────────▼─────────────┐    ┌──────────────────────────┐  │
//! │  │       Rule Catalog        │    │    AI Collaborator       │  │
//! │  │  R1..R9 compiled regexes  │◀───│  analyze() → Some | None │  │
//! │  │  R10 adapter-backed       │    │  (always falls back)     │  │
//! │  └───────────────────────────┘    └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key properties
//!
//! - Every stage is fail-open: it returns a structurally valid result
//!   even when the AI collaborator or the result store is unreachable.
//! - Rule evaluation is deterministic; violations are emitted in
//!   `(file_path, line, rule_id, pattern_index)` order.
//! - The AI collaborator is optional. With AI disabled, a run over the
//!   same input is byte-for-byte reproducible aside from timestamps.
//!
//! ## Modules
//!
//! - [`scanner`]: per-language file discovery
//! - [`rules`]: the ten-rule privacy catalog
//! - [`engine`]: rule engine fanning scanners × rules over a tree
//! - [`ai`]: AI collaborator adapter with fallback-safe semantics
//! - [`store`]: durable stage-result and report storage
//! - [`agents`]: the five pipeline stages and their shared framework
//! - [`orchestrator`]: stage sequencing, deadline, metrics rollup
//! - [`config`]: configuration management

pub mod agents;
pub mod ai;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod rules;
pub mod scanner;
pub mod store;
pub mod types;

pub use config::PrivGuardConfig;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use types::{Finding, ScanRequest, Severity};
