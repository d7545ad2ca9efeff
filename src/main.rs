//! PrivGuard - Privacy and data-protection scanner with an agent pipeline
//!
//! CLI entry point: runs the scan pipeline over a project directory or an
//! inline snippet, lists the rule catalog, dumps configuration, and runs
//! connectivity diagnostics.

use anyhow::Result;
use clap::{Parser, Subcommand};
use privguard::{
    config::PrivGuardConfig,
    orchestrator::Orchestrator,
    types::{InlineSource, ScanOptions, ScanRequest, Severity},
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "privguard")]
#[command(author = "PrivGuard Team")]
#[command(version)]
#[command(about = "Privacy and data-protection scanner with an agent pipeline")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PRIVGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project directory or an inline file
    Scan {
        /// Project directory to scan
        path: Option<PathBuf>,

        /// Scan a single file as inline source instead of a directory
        #[arg(long, conflicts_with = "path")]
        inline: Option<PathBuf>,

        /// Correlation id (generated when absent)
        #[arg(long)]
        scan_id: Option<String>,

        /// Disable the AI collaborator for this run
        #[arg(long)]
        no_ai: bool,

        /// Drop findings below this severity (LOW, MEDIUM, HIGH, CRITICAL)
        #[arg(long, default_value = "LOW")]
        severity_floor: String,

        /// Print the full report as JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },

    /// List the rule catalog
    Rules,

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Run diagnostics (AI reachability, store writability)
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("privguard={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PrivGuardConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            path,
            inline,
            scan_id,
            no_ai,
            severity_floor,
            json,
        } => {
            run_scan(config, path, inline, scan_id, no_ai, &severity_floor, json).await?;
        }
        Commands::Rules => {
            list_rules(&config);
        }
        Commands::Config { default } => {
            if default {
                println!("{}", PrivGuardConfig::default_toml());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Doctor => {
            run_doctor(config).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_scan(
    config: PrivGuardConfig,
    path: Option<PathBuf>,
    inline: Option<PathBuf>,
    scan_id: Option<String>,
    no_ai: bool,
    severity_floor: &str,
    json: bool,
) -> Result<()> {
    let inline_source = match inline {
        Some(file) => {
            let content = std::fs::read_to_string(&file)?;
            let file_type = file
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("txt")
                .to_string();
            Some(InlineSource { content, file_type })
        }
        None => None,
    };

    let severity_floor = parse_severity(severity_floor)?;
    let request = ScanRequest {
        correlation_id: scan_id,
        project_path: path,
        inline_source,
        options: ScanOptions {
            ai_enabled: !no_ai,
            max_bytes_per_file: config.engine.max_bytes_per_file,
            severity_floor,
            ..Default::default()
        },
    };

    let orchestrator = Orchestrator::new(config);
    let output = orchestrator.run(request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&output.report)?);
    } else {
        print!("{}", output.report.render_text());
    }
    if let Some(locator) = output.locator {
        eprintln!("report persisted: {}", locator);
    }
    Ok(())
}

fn parse_severity(s: &str) -> Result<Severity> {
    match s.to_ascii_uppercase().as_str() {
        "LOW" => Ok(Severity::Low),
        "MEDIUM" => Ok(Severity::Medium),
        "HIGH" => Ok(Severity::High),
        "CRITICAL" => Ok(Severity::Critical),
        other => anyhow::bail!("unknown severity '{}'", other),
    }
}

fn list_rules(config: &PrivGuardConfig) {
    let engine =
        privguard::engine::RuleEngine::new(config.engine.clone(), config.ai.clone());
    let stats = engine.rule_stats();
    println!("{} rules in catalog:", stats.count);
    for (id, description) in &stats.rule_descriptions {
        println!("  {:<4} {}", id, description);
    }
}

async fn run_doctor(config: PrivGuardConfig) -> Result<()> {
    use privguard::ai::{AiCollaborator, BedrockCollaborator, PromptContext};
    use privguard::store::{FsResultStore, ResultStore};

    println!("privguard doctor");

    // AI reachability
    if !config.ai.enabled {
        println!("  ai: disabled by configuration");
    } else if config.ai.endpoint.is_none() {
        println!("  ai: no endpoint configured (deterministic fallbacks will run)");
    } else {
        let ai = BedrockCollaborator::new(config.ai.clone());
        let context = PromptContext {
            correlation_id: "doctor".to_string(),
            caller: "doctor".to_string(),
        };
        match ai.analyze("Reply with the single word: ok", &context).await {
            Some(_) => println!("  ai: reachable ({})", ai.model_id()),
            None => println!("  ai: unreachable — pipeline will fall back deterministically"),
        }
    }

    // Store writability
    let store = FsResultStore::new(config.storage.root.clone());
    let probe = serde_json::json!({"probe": true});
    match store.put_stage_result("doctor", "probe", &probe).await {
        Ok(()) => println!("  store: writable at {}", config.storage.root.display()),
        Err(e) => println!("  store: NOT writable ({})", e),
    }

    Ok(())
}
