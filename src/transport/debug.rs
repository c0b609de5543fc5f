//! Local development sink. Reads the activation configuration from disk and
//! logs every payload instead of delivering it, so extensions can run
//! against a simulator with no controller present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::{CollectorError, Result};
use crate::status::Status;
use crate::transport::batching::Batch;
use crate::transport::{MintResponse, TransportClient};

/// Console-backed [`TransportClient`] for local runs.
pub struct DebugClient {
    activation_config_path: PathBuf,
    extension_config_path: Option<PathBuf>,
    print_metrics: bool,
}

impl DebugClient {
    pub fn new(activation_config_path: impl AsRef<Path>) -> Self {
        Self {
            activation_config_path: activation_config_path.as_ref().to_path_buf(),
            extension_config_path: None,
            print_metrics: true,
        }
    }

    pub fn with_extension_config(mut self, path: impl AsRef<Path>) -> Self {
        self.extension_config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_print_metrics(mut self, print_metrics: bool) -> Self {
        self.print_metrics = print_metrics;
        self
    }
}

#[async_trait]
impl TransportClient for DebugClient {
    async fn get_activation_config(&self) -> Result<Value> {
        if !self.activation_config_path.exists() {
            return Ok(Value::Object(Default::default()));
        }
        let raw = tokio::fs::read_to_string(&self.activation_config_path)
            .await
            .map_err(|e| CollectorError::Startup(format!("cannot read activation config: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| CollectorError::Startup(format!("invalid activation config: {e}")))
    }

    async fn get_extension_config(&self) -> Result<String> {
        let Some(path) = &self.extension_config_path else {
            return Ok(String::new());
        };
        if !path.exists() {
            return Ok(String::new());
        }
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CollectorError::Transport(format!("cannot read extension config: {e}")))
    }

    async fn get_feature_sets(&self) -> Result<HashMap<String, Vec<String>>> {
        Ok(HashMap::new())
    }

    async fn send_status(&self, status: &Status) -> Result<Value> {
        info!("send_status: '{status}'");
        Ok(Value::Object(Default::default()))
    }

    async fn send_metrics(&self, lines: &[String]) -> Result<Vec<MintResponse>> {
        if self.print_metrics {
            for line in lines {
                info!("send_metric: {line}");
            }
        }
        Ok(vec![MintResponse::accepted(lines.len() as u64)])
    }

    async fn send_sfm_metrics(&self, lines: &[String]) -> Result<MintResponse> {
        for line in lines {
            info!("send_sfm_metric: {line}");
        }
        Ok(MintResponse::accepted(lines.len() as u64))
    }

    async fn send_events(&self, batches: &[Batch], enrichment: bool) -> Result<Vec<Value>> {
        for batch in batches {
            info!("send_events (enrichment = {enrichment}): {batch}");
        }
        Ok(Vec::new())
    }

    async fn send_platform_event(&self, event: &Value) -> Result<()> {
        info!("send_platform_event: {event}");
        Ok(())
    }

    async fn get_cluster_time_diff_ms(&self) -> Result<i64> {
        Ok(0)
    }
}
