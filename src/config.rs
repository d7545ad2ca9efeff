//! PrivGuard configuration management
//!
//! Configuration loads from an optional TOML file and is then overridden
//! by environment variables (the operational surface documented in the
//! README). Every key has a default so a bare `privguard scan .` works.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main PrivGuard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivGuardConfig {
    /// AI collaborator configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Rule engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Result storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// AI collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Enable the AI adapter
    pub enabled: bool,

    /// Opaque model identifier passed through to the hosted service
    pub model_id: String,

    /// Inference endpoint URL (None = adapter stays offline and every
    /// call falls back deterministically)
    pub endpoint: Option<String>,

    /// API key for the hosted service
    pub api_key: Option<String>,

    /// Per-call token cap
    pub max_tokens: u32,

    /// Sampling temperature (0-1)
    pub temperature: f32,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    /// Pipeline-wide token budget; calls that would exceed it return None
    pub token_budget: u64,

    /// Findings per AI-Enhance batch call
    pub batch_size: usize,

    /// Lines per chunk for the remote AI rule
    pub chunk_lines: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            endpoint: None,
            api_key: None,
            max_tokens: 2000,
            temperature: 0.1,
            timeout_ms: 30_000,
            token_budget: 200_000,
            batch_size: 20,
            chunk_lines: 50,
        }
    }
}

/// Rule engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Truncation threshold for scanned files, in bytes
    pub max_bytes_per_file: usize,

    /// Bounded worker pool size for per-file evaluation
    pub workers: usize,

    /// Bounded queue depth between scanner and workers
    pub queue_depth: usize,

    /// Path substrings that exclude a file from scanning
    pub ignored_paths: Vec<String>,

    /// Extra ignored path substrings (appended, e.g. from env)
    pub ignored_path_extra: Vec<String>,

    /// Heartbeat interval for long-running scans, in seconds
    pub heartbeat_secs: u64,
}

impl EngineConfig {
    /// The full ignore set: built-ins plus extras
    pub fn all_ignored_paths(&self) -> Vec<String> {
        let mut all = self.ignored_paths.clone();
        all.extend(self.ignored_path_extra.iter().cloned());
        all
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_file: 1_048_576,
            workers: 4,
            queue_depth: 256,
            ignored_paths: vec![
                "node_modules".to_string(),
                ".git".to_string(),
                "dist".to_string(),
                "build".to_string(),
                ".venv".to_string(),
                "tool/self".to_string(),
            ],
            ignored_path_extra: Vec::new(),
            heartbeat_secs: 30,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whole-pipeline deadline in milliseconds
    pub global_deadline_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            global_deadline_ms: 900_000,
        }
    }
}

/// Result storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-memory store, scoped to the process
    #[default]
    Memory,
    /// Filesystem store under `storage.root`
    Filesystem,
}

/// Result storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Root directory for the filesystem backend
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: PathBuf::from(".privguard"),
        }
    }
}

impl PrivGuardConfig {
    /// Load configuration from an optional TOML file, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", p.display(), e)))?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", p.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment variable overrides (all optional).
    pub fn apply_env(&mut self) {
        if let Some(v) = env_bool("AI_ENABLED") {
            self.ai.enabled = v;
        }
        if let Ok(v) = std::env::var("AI_MODEL_ID") {
            if !v.is_empty() {
                self.ai.model_id = v;
            }
        }
        if let Ok(v) = std::env::var("AI_ENDPOINT") {
            if !v.is_empty() {
                self.ai.endpoint = Some(v);
            }
        }
        if let Ok(v) = std::env::var("AI_API_KEY") {
            if !v.is_empty() {
                self.ai.api_key = Some(v);
            }
        }
        if let Some(v) = env_parse::<u32>("AI_MAX_TOKENS") {
            self.ai.max_tokens = v;
        }
        if let Some(v) = env_parse::<f32>("AI_TEMPERATURE") {
            self.ai.temperature = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<u64>("AI_TIMEOUT_MS") {
            self.ai.timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("RULE_MAX_BYTES_PER_FILE") {
            self.engine.max_bytes_per_file = v;
        }
        if let Some(v) = env_parse::<usize>("SCAN_WORKERS") {
            self.engine.workers = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("GLOBAL_DEADLINE_MS") {
            self.pipeline.global_deadline_ms = v;
        }
        if let Ok(v) = std::env::var("IGNORED_PATH_EXTRA") {
            self.engine.ignored_path_extra = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Render the default configuration as TOML (for `config --default`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PrivGuardConfig::default();
        assert!(config.ai.enabled);
        assert_eq!(config.ai.max_tokens, 2000);
        assert_eq!(config.ai.timeout_ms, 30_000);
        assert_eq!(config.engine.max_bytes_per_file, 1_048_576);
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.queue_depth, 256);
        assert_eq!(config.pipeline.global_deadline_ms, 900_000);
        assert!(config
            .engine
            .ignored_paths
            .contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_default_toml_round_trip() {
        let toml_str = PrivGuardConfig::default_toml();
        let parsed: PrivGuardConfig = toml::from_str(&toml_str).expect("default TOML parses");
        assert_eq!(parsed.engine.workers, 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: PrivGuardConfig =
            toml::from_str("[ai]\nenabled = false\nmodel_id = \"m\"\nmax_tokens = 100\ntemperature = 0.5\ntimeout_ms = 5000\ntoken_budget = 1000\nbatch_size = 5\nchunk_lines = 10\n")
                .expect("partial TOML parses");
        assert!(!parsed.ai.enabled);
        assert_eq!(parsed.engine.workers, 4);
    }

    #[test]
    fn test_all_ignored_paths_includes_extra() {
        let mut config = EngineConfig::default();
        config.ignored_path_extra = vec!["vendor".to_string()];
        let all = config.all_ignored_paths();
        assert!(all.contains(&"vendor".to_string()));
        assert!(all.contains(&".git".to_string()));
    }
}
