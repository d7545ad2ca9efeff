//! In-memory result store
//!
//! Process-scoped storage behind an async `RwLock`, used by default and
//! in tests. Semantics match the durable backends: idempotent puts,
//! opaque locators.

use super::ResultStore;
use crate::error::Result;
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryResultStore {
    stage_results: RwLock<HashMap<(String, String), serde_json::Value>>,
    reports: RwLock<HashMap<String, serde_json::Value>>,
    /// Write count, identical-content no-ops excluded (for tests)
    writes: RwLock<u64>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_stage_result(
        &self,
        correlation_id: &str,
        stage_id: &str,
    ) -> Option<serde_json::Value> {
        self.stage_results
            .read()
            .await
            .get(&(correlation_id.to_string(), stage_id.to_string()))
            .cloned()
    }

    pub async fn get_report(&self, correlation_id: &str) -> Option<serde_json::Value> {
        self.reports.read().await.get(correlation_id).cloned()
    }

    pub async fn write_count(&self) -> u64 {
        *self.writes.read().await
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_stage_result(
        &self,
        correlation_id: &str,
        stage_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let key = (correlation_id.to_string(), stage_id.to_string());
        let mut map = self.stage_results.write().await;
        if map.get(&key) == Some(payload) {
            return Ok(());
        }
        map.insert(key, payload.clone());
        *self.writes.write().await += 1;
        Ok(())
    }

    async fn put_report(
        &self,
        correlation_id: &str,
        payload: &serde_json::Value,
        _content_type: &str,
    ) -> Result<String> {
        let mut map = self.reports.write().await;
        if map.get(correlation_id) != Some(payload) {
            map.insert(correlation_id.to_string(), payload.clone());
            *self.writes.write().await += 1;
        }
        let locator = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("memory://reports/{}", correlation_id));
        Ok(locator)
    }
}
