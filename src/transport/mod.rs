//! # Transport Collaborator Interface
//!
//! Abstract capability the runtime uses to talk to the controller. Any
//! concrete implementation (HTTP, local debug sink) satisfies
//! [`TransportClient`]. The runtime never retries inside a send; a failed
//! delivery simply waits for the next scheduled cadence.

pub mod batching;
pub mod debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::status::Status;

/// Per-batch acknowledgement for a metric send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MintResponse {
    #[serde(rename = "linesOk", default)]
    pub lines_ok: u64,
    #[serde(rename = "linesInvalid", default)]
    pub lines_invalid: u64,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub warnings: Option<Value>,
}

impl MintResponse {
    pub fn accepted(lines_ok: u64) -> Self {
        Self {
            lines_ok,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for MintResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MintResponse(lines_ok={}, lines_invalid={})",
            self.lines_ok, self.lines_invalid
        )
    }
}

/// Communication capability consumed by the runtime.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Fetch the activation configuration. Failing here during startup is
    /// fatal for the collector process.
    async fn get_activation_config(&self) -> Result<Value>;

    /// Fetch the raw extension/manifest configuration.
    async fn get_extension_config(&self) -> Result<String>;

    /// Fetch the map of feature set name to metric keys.
    async fn get_feature_sets(&self) -> Result<std::collections::HashMap<String, Vec<String>>>;

    /// Send the aggregated health status (heartbeat); the response carries
    /// controller-assigned runtime properties.
    async fn send_status(&self, status: &Status) -> Result<Value>;

    /// Send metric-protocol lines, one response per transmitted batch.
    async fn send_metrics(&self, lines: &[String]) -> Result<Vec<MintResponse>>;

    /// Send self-monitoring metric lines.
    async fn send_sfm_metrics(&self, lines: &[String]) -> Result<MintResponse>;

    /// Send already-encoded log/event request bodies, one request per batch,
    /// returning the acknowledgement bodies (an `error` member signals
    /// rejection detail).
    async fn send_events(&self, batches: &[batching::Batch], enrichment: bool)
        -> Result<Vec<Value>>;

    /// Send a structured platform event.
    async fn send_platform_event(&self, event: &Value) -> Result<()>;

    /// Fetch the local-vs-cluster clock offset in milliseconds.
    async fn get_cluster_time_diff_ms(&self) -> Result<i64>;
}
