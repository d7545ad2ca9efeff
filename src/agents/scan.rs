//! S1 — scan stage
//!
//! Invokes the rule engine over the project path, or over a scratch
//! directory when the request carries inline source. Deduplicates by
//! finding id and applies the severity floor and rule filter before
//! handing findings to the enrichment stages.

use super::{json_size, Agent, AgentContext, StageRun};
use crate::engine::RuleEngine;
use crate::rules::RuleStats;
use crate::types::{AiUsage, ErrorClass, Finding, ScanRequest, StageError, StageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

pub const STAGE_ID: &str = "scan";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
    pub findings: Vec<Finding>,
    pub rule_stats: RuleStats,
    pub counts_by_severity: BTreeMap<String, usize>,
    pub counts_by_language: BTreeMap<String, usize>,
}

impl ScanOutput {
    fn empty(rule_stats: RuleStats) -> Self {
        Self {
            findings: Vec::new(),
            rule_stats,
            counts_by_severity: BTreeMap::new(),
            counts_by_language: BTreeMap::new(),
        }
    }
}

pub struct ScanAgent {
    engine: Arc<RuleEngine>,
}

impl ScanAgent {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }

    /// Fresh scratch directory for one inline-source invocation.
    /// Concurrent invocations never share a path.
    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("privguard-scan-{}", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl Agent for ScanAgent {
    type Input = ScanRequest;
    type Output = ScanOutput;

    fn stage_id(&self) -> &'static str {
        STAGE_ID
    }

    async fn process(&self, ctx: &AgentContext, input: ScanRequest) -> StageResult<ScanOutput> {
        let run = StageRun::begin(STAGE_ID, ctx, json_size(&input));
        let rule_stats = self.engine.rule_stats();

        // Exactly one source of input must be present.
        let validation_error = match (&input.project_path, &input.inline_source) {
            (Some(_), Some(_)) => Some("both project_path and inline_source provided"),
            (None, None) => Some("neither project_path nor inline_source provided"),
            _ => None,
        };
        if let Some(message) = validation_error {
            return run
                .finish(
                    ctx,
                    "invalid request".to_string(),
                    ScanOutput::empty(rule_stats),
                    AiUsage::default(),
                    vec![StageError::new(ErrorClass::InputInvalid, message)],
                )
                .await;
        }

        let mut errors = Vec::new();

        // Resolve the scan root; inline source goes through a scratch dir
        // that is removed only after the engine completes.
        let (root, scratch): (PathBuf, Option<PathBuf>) = match &input.inline_source {
            Some(inline) => {
                let dir = Self::scratch_dir();
                let file = dir.join(format!("test.{}", inline.file_type));
                let mut prepared = tokio::fs::create_dir_all(&dir).await;
                if prepared.is_ok() {
                    prepared = tokio::fs::write(&file, &inline.content).await;
                }
                if let Err(e) = prepared {
                    errors.push(StageError::new(
                        ErrorClass::IoTransient,
                        format!("scratch dir setup failed: {}", e),
                    ));
                    return run
                        .finish(
                            ctx,
                            "inline source".to_string(),
                            ScanOutput::empty(rule_stats),
                            AiUsage::default(),
                            errors,
                        )
                        .await;
                }
                (dir.clone(), Some(dir))
            }
            None => (
                input.project_path.clone().expect("validated above"),
                None,
            ),
        };

        let engine_run = self
            .engine
            .scan(&root, &input.options, &ctx.correlation_id)
            .await;

        if let Some(dir) = scratch {
            // Cleanup failures are logged, never raised.
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(path = %dir.display(), "scratch cleanup failed: {}", e);
            }
        }

        errors.extend(engine_run.errors);

        // Dedup on exact finding identity; overlapping rules stay distinct
        // because rule_id participates in the hash.
        let mut seen: HashSet<String> = HashSet::new();
        let floor = input.options.severity_floor;
        let findings: Vec<Finding> = engine_run
            .findings
            .into_iter()
            .filter(|f| seen.insert(f.finding_id.clone()))
            .filter(|f| input.options.rule_filter.allows(&f.rule_id))
            .filter(|f| f.is_positive || f.severity >= floor)
            .collect();

        let mut counts_by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut counts_by_language: BTreeMap<String, usize> = BTreeMap::new();
        for finding in findings.iter().filter(|f| !f.is_positive && !f.suppressed) {
            *counts_by_severity
                .entry(finding.severity.to_string())
                .or_default() += 1;
            *counts_by_language
                .entry(finding.language.to_string())
                .or_default() += 1;
        }

        let ai_used = findings.iter().any(|f| f.rule_id == "R10");
        let input_summary = match &input.inline_source {
            Some(inline) => format!("inline source ({} bytes)", inline.content.len()),
            None => format!(
                "project {} ({} files)",
                root.display(),
                engine_run.files_scanned
            ),
        };

        let output = ScanOutput {
            findings,
            rule_stats,
            counts_by_severity,
            counts_by_language,
        };
        let ai = AiUsage {
            used: ai_used,
            model: ai_used.then(|| ctx.ai.model_id().to_string()),
            confidence: None,
        };
        run.finish(ctx, input_summary, output, ai, errors).await
    }
}
