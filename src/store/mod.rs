//! Durable result storage
//!
//! Two operations: idempotent per-stage result puts keyed on
//! `(correlation_id, stage_id)`, and report blobs returning an opaque
//! locator. Persistence failures are recorded by callers, never raised
//! past the stage boundary.

mod fs;
mod memory;

pub use fs::FsResultStore;
pub use memory::MemoryResultStore;

use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Storage seam for stage results and final reports
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Durable, at-least-once, idempotent on the composite key;
    /// overwriting with identical content is a no-op.
    async fn put_stage_result(
        &self,
        correlation_id: &str,
        stage_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()>;

    /// Store a report blob and return an opaque locator.
    async fn put_report(
        &self,
        correlation_id: &str,
        payload: &serde_json::Value,
        content_type: &str,
    ) -> Result<String>;
}

/// Retry an idempotent store operation up to three times with exponential
/// backoff (base 200 ms, cap 2 s, ±20% jitter).
pub async fn with_retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(attempt, "store operation failed: {}", e);
                last_err = Some(e);
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

/// Exponential backoff with jitter: 200 ms base, doubling, 2 s cap, ±20%.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 200u64.saturating_mul(1 << attempt.min(4)).min(2_000);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}
