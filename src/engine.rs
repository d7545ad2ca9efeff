//! Rule engine
//!
//! Fans the scanner set × rule catalog over a directory: files are
//! evaluated on a bounded worker pool and results are reordered
//! deterministically before being returned. Rule evaluation itself is
//! synchronous and pure; the remote AI rule runs after the synchronous
//! catalog, only when AI is enabled.

use crate::ai::{AiCollaborator, BedrockCollaborator, OfflineCollaborator};
use crate::config::{AiConfig, EngineConfig};
use crate::error::Error;
use crate::rules::{remote_ai, RuleCatalog, RuleStats, RuleViolation};
use crate::scanner::{self, DiscoveredFile, ScannedFile};
use crate::types::{
    escape_excerpt, Category, ErrorClass, Finding, ScanOptions, StageError,
};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Output of one engine run over a directory
#[derive(Debug, Default)]
pub struct EngineRun {
    /// Structured findings in `(file_path, line, rule_id, pattern_index)`
    /// order; positive-practice records included
    pub findings: Vec<Finding>,
    /// Stable string envelopes for the non-positive findings, same order
    pub envelopes: Vec<String>,
    pub errors: Vec<StageError>,
    pub files_scanned: usize,
}

pub struct RuleEngine {
    catalog: Arc<RuleCatalog>,
    config: EngineConfig,
    ai_config: AiConfig,
    ai: Arc<dyn AiCollaborator>,
    ai_enabled: bool,
}

impl RuleEngine {
    pub fn new(config: EngineConfig, ai_config: AiConfig) -> Self {
        let ai: Arc<dyn AiCollaborator> = if ai_config.enabled && ai_config.endpoint.is_some() {
            Arc::new(BedrockCollaborator::new(ai_config.clone()))
        } else {
            Arc::new(OfflineCollaborator)
        };
        Self {
            catalog: Arc::new(RuleCatalog::new(ai_config.chunk_lines)),
            config,
            ai_enabled: ai_config.enabled,
            ai_config,
            ai,
        }
    }

    /// Toggle the remote AI rule for subsequent runs.
    pub fn set_ai_enabled(&mut self, enabled: bool) {
        self.ai_enabled = enabled;
    }

    /// Install an API key, rebuilding the collaborator.
    pub fn set_ai_key(&mut self, key: impl Into<String>) {
        self.ai_config.api_key = Some(key.into());
        self.rebuild_collaborator();
    }

    /// Replace the whole AI provider configuration.
    pub fn set_ai_config(&mut self, ai_config: AiConfig) {
        self.ai_enabled = ai_config.enabled;
        self.ai_config = ai_config;
        self.rebuild_collaborator();
    }

    /// Inject a collaborator directly (tests, scripted runs).
    pub fn set_collaborator(&mut self, ai: Arc<dyn AiCollaborator>) {
        self.ai = ai;
    }

    fn rebuild_collaborator(&mut self) {
        self.ai = if self.ai_config.enabled && self.ai_config.endpoint.is_some() {
            Arc::new(BedrockCollaborator::new(self.ai_config.clone()))
        } else {
            Arc::new(OfflineCollaborator)
        };
    }

    pub fn rule_stats(&self) -> RuleStats {
        self.catalog.stats()
    }

    pub fn collaborator(&self) -> Arc<dyn AiCollaborator> {
        Arc::clone(&self.ai)
    }

    /// Run every scanner × rule over `root`.
    ///
    /// An empty or fully-ignored directory yields an empty run, not an
    /// error. Per-file failures are collected and never abort the run.
    pub async fn scan(
        &self,
        root: &Path,
        options: &ScanOptions,
        correlation_id: &str,
    ) -> EngineRun {
        let ignored = self.config.all_ignored_paths();
        let language_filter = options.language_filter.clone();
        let root_owned = root.to_path_buf();
        let discovered: Vec<DiscoveredFile> = match tokio::task::spawn_blocking(move || {
            scanner::discover(&root_owned, &ignored, &language_filter)
        })
        .await
        {
            Ok(files) => files,
            Err(e) => {
                return EngineRun {
                    errors: vec![StageError::new(
                        ErrorClass::IoTransient,
                        format!("file discovery failed: {}", e),
                    )],
                    ..EngineRun::default()
                }
            }
        };

        tracing::info!(
            correlation_id,
            root = %root.display(),
            files = discovered.len(),
            "engine scan starting"
        );

        let processed = Arc::new(AtomicUsize::new(0));
        let heartbeat = self.spawn_heartbeat(correlation_id, discovered.len(), &processed);

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let queue_depth = self.config.queue_depth.max(1);
        let mut join_set: JoinSet<(usize, Result<FileOutcome, StageError>)> = JoinSet::new();

        // Completed outcomes land in discovery-index slots so output is
        // deterministic whatever the pool's completion order was.
        let mut slots: Vec<Option<Result<FileOutcome, StageError>>> =
            (0..discovered.len()).map(|_| None).collect();

        for (index, file) in discovered.iter().cloned().enumerate() {
            // Bounded queue: drain completed results before admitting more
            // work, blocking the discovery iterator when full.
            while join_set.len() >= queue_depth {
                if let Some(joined) = join_set.join_next().await {
                    settle(joined, &mut slots, correlation_id);
                }
            }

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let catalog = Arc::clone(&self.catalog);
            let ai = Arc::clone(&self.ai);
            let ai_enabled = self.ai_enabled && options.ai_enabled;
            let max_bytes = options.max_bytes_per_file;
            let rule_filter = options.rule_filter.clone();
            let correlation = correlation_id.to_string();
            let counter = Arc::clone(&processed);

            join_set.spawn(async move {
                let _permit = permit;
                let outcome =
                    process_file(&file, &catalog, ai.as_ref(), ai_enabled, max_bytes, &rule_filter, &correlation)
                        .await;
                counter.fetch_add(1, Ordering::Relaxed);
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            settle(joined, &mut slots, correlation_id);
        }
        heartbeat.abort();

        let mut run = EngineRun {
            files_scanned: discovered.len(),
            ..EngineRun::default()
        };
        for slot in slots.into_iter().flatten() {
            match slot {
                Ok(outcome) => {
                    for (finding, envelope) in outcome.findings {
                        if let Some(envelope) = envelope {
                            run.envelopes.push(envelope);
                        }
                        run.findings.push(finding);
                    }
                    run.errors.extend(outcome.errors);
                }
                Err(e) => run.errors.push(e),
            }
        }

        tracing::info!(
            correlation_id,
            findings = run.findings.len(),
            errors = run.errors.len(),
            "engine scan complete"
        );
        run
    }

    fn spawn_heartbeat(
        &self,
        correlation_id: &str,
        total: usize,
        processed: &Arc<AtomicUsize>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.heartbeat_secs.max(1));
        let correlation = correlation_id.to_string();
        let counter = Arc::clone(processed);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick consumed
            loop {
                ticker.tick().await;
                tracing::info!(
                    correlation_id = %correlation,
                    processed = counter.load(Ordering::Relaxed),
                    total,
                    "scan heartbeat"
                );
            }
        })
    }
}

struct FileOutcome {
    /// `(finding, envelope)` pairs; positives carry no envelope
    findings: Vec<(Finding, Option<String>)>,
    errors: Vec<StageError>,
}

/// Place a joined worker result into its discovery-index slot.
fn settle(
    joined: Result<(usize, Result<FileOutcome, StageError>), tokio::task::JoinError>,
    slots: &mut [Option<Result<FileOutcome, StageError>>],
    correlation_id: &str,
) {
    match joined {
        Ok((index, outcome)) => slots[index] = Some(outcome),
        Err(e) => {
            tracing::error!(correlation_id, "worker task failed: {}", e);
        }
    }
}

async fn process_file(
    file: &DiscoveredFile,
    catalog: &RuleCatalog,
    ai: &dyn AiCollaborator,
    ai_enabled: bool,
    max_bytes: usize,
    rule_filter: &crate::types::RuleFilter,
    correlation_id: &str,
) -> Result<FileOutcome, StageError> {
    let scanned = match scanner::read_file(&file.path, file.language, max_bytes).await {
        Ok(scanned) => scanned,
        Err(Error::Scanner(message)) => {
            tracing::warn!(path = %file.path.display(), "{}", message);
            return Err(StageError::new(ErrorClass::IoTransient, message));
        }
        Err(e) => {
            return Err(StageError::new(
                ErrorClass::IoTransient,
                format!("cannot read {}: {}", file.path.display(), e),
            ))
        }
    };

    let mut errors = Vec::new();
    // (rule_id, description, category, violation) tuples, later sorted
    let mut collected: Vec<(&'static str, &'static str, Category, RuleViolation)> = Vec::new();

    for rule in catalog.sync_rules() {
        if !rule_filter.allows(rule.id()) {
            continue;
        }
        let evaluated = std::panic::catch_unwind(AssertUnwindSafe(|| {
            rule.evaluate(&scanned.content, &scanned.path)
        }));
        match evaluated {
            Ok(violations) => {
                for v in violations {
                    collected.push((rule.id(), rule.description(), rule.category(), v));
                }
            }
            Err(_) => {
                // Skip this (file, rule) pair; every other pair continues.
                errors.push(StageError::new(
                    ErrorClass::RuleInternal,
                    format!("rule {} failed on {}", rule.id(), scanned.path.display()),
                ));
            }
        }
    }

    if ai_enabled && rule_filter.allows(remote_ai::RULE_ID) {
        let remote = catalog.remote_ai();
        let ai_violations = remote
            .evaluate(ai, &scanned.content, &scanned.path, correlation_id)
            .await;
        for v in ai_violations {
            collected.push((
                remote_ai::RULE_ID,
                remote.description(),
                Category::AiGuidance,
                v,
            ));
        }
    }

    // Contractual emission order within a file
    collected.sort_by(|a, b| {
        (a.3.line, a.0, a.3.pattern_index).cmp(&(b.3.line, b.0, b.3.pattern_index))
    });

    let findings = collected
        .into_iter()
        .map(|(rule_id, rule_description, category, v)| {
            build_finding(&scanned, rule_id, rule_description, category, v)
        })
        .collect();

    Ok(FileOutcome { findings, errors })
}

fn build_finding(
    scanned: &ScannedFile,
    rule_id: &str,
    rule_description: &str,
    category: Category,
    violation: RuleViolation,
) -> (Finding, Option<String>) {
    let file_path = scanned.path.to_string_lossy().to_string();
    let finding = Finding {
        finding_id: Finding::compute_id(
            &file_path,
            violation.line,
            rule_id,
            &violation.match_excerpt,
        ),
        file_path: file_path.clone(),
        line: violation.line,
        language: scanned.language,
        rule_id: rule_id.to_string(),
        rule_description: rule_description.to_string(),
        category,
        severity: violation.severity,
        match_excerpt: violation.match_excerpt.clone(),
        description: violation.description,
        fix_hint: violation.fix_hint,
        regulation_refs: violation.regulation_refs,
        is_positive: violation.is_positive,
        suppressed: false,
        suppression_reason: None,
        truncated: scanned.truncated,
        ai_enhanced: false,
        ai_confidence: 0.0,
        ai_model: None,
    };
    let envelope = (!violation.is_positive).then(|| {
        format!(
            "[{}] {}:{} - {} (found: \"{}\")",
            scanned.language,
            file_path,
            violation.line,
            rule_description,
            escape_excerpt(&violation.match_excerpt),
        )
    });
    (finding, envelope)
}
