//! Filesystem result store
//!
//! Lays results out as `stage_result/{correlation_id}/{stage_id}.json`
//! and `reports/{correlation_id}.json` under a configurable root.
//! Idempotency is checked by content comparison before writing.

use super::ResultStore;
use crate::error::Result;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};

pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn stage_path(&self, correlation_id: &str, stage_id: &str) -> PathBuf {
        self.root
            .join("stage_result")
            .join(sanitize(correlation_id))
            .join(format!("{}.json", sanitize(stage_id)))
    }

    fn report_path(&self, correlation_id: &str) -> PathBuf {
        self.root
            .join("reports")
            .join(format!("{}.json", sanitize(correlation_id)))
    }

    async fn write_if_changed(path: &Path, content: &str) -> Result<()> {
        if let Ok(existing) = tokio::fs::read_to_string(path).await {
            if existing == content {
                return Ok(());
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Keys become file names; strip path separators so a hostile
/// correlation id cannot escape the store root.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn put_stage_result(
        &self,
        correlation_id: &str,
        stage_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let path = self.stage_path(correlation_id, stage_id);
        let content = serde_json::to_string_pretty(payload)?;
        Self::write_if_changed(&path, &content).await
    }

    async fn put_report(
        &self,
        correlation_id: &str,
        payload: &serde_json::Value,
        _content_type: &str,
    ) -> Result<String> {
        let path = self.report_path(correlation_id);
        let content = serde_json::to_string_pretty(payload)?;
        Self::write_if_changed(&path, &content).await?;
        let locator = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(path.to_string_lossy().as_bytes());
        Ok(locator)
    }
}
