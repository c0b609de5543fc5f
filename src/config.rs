//! # Runtime Configuration
//!
//! Flat configuration for the collector runtime. Defaults mirror the
//! production cadences in [`crate::constants`]; environment variables override
//! individual values, with parse failures surfaced as configuration errors.

use std::time::Duration;

use crate::constants::{
    CALLBACKS_POOL_SIZE, ENDPOINT_RESEND_INTERVAL, HEARTBEAT_INTERVAL, HEARTBEAT_POOL_SIZE,
    INTERNAL_POOL_SIZE, METRIC_SENDING_INTERVAL, SFM_METRIC_SENDING_INTERVAL, TIME_DIFF_INTERVAL,
};
use crate::error::{CollectorError, Result};

/// How `run()` behaves once the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Start the scheduler loop and run until a shutdown signal.
    Loop,
    /// Run exactly one validation pass, report a single status, and return.
    FastCheck,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub run_mode: RunMode,
    /// True when running under a local simulator: disables the initial-wait
    /// stagger so callbacks fire immediately.
    pub simulator: bool,
    pub heartbeat_interval: Duration,
    pub metric_sending_interval: Duration,
    pub sfm_sending_interval: Duration,
    pub time_diff_interval: Duration,
    pub endpoint_resend_interval: Duration,
    pub callbacks_pool_size: usize,
    pub internal_pool_size: usize,
    pub heartbeat_pool_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Loop,
            simulator: false,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            metric_sending_interval: METRIC_SENDING_INTERVAL,
            sfm_sending_interval: SFM_METRIC_SENDING_INTERVAL,
            time_diff_interval: TIME_DIFF_INTERVAL,
            endpoint_resend_interval: ENDPOINT_RESEND_INTERVAL,
            callbacks_pool_size: CALLBACKS_POOL_SIZE,
            internal_pool_size: INTERNAL_POOL_SIZE,
            heartbeat_pool_size: HEARTBEAT_POOL_SIZE,
        }
    }
}

impl CollectorConfig {
    /// Build a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("COLLECTOR_FASTCHECK") {
            if parse_bool(&mode) {
                config.run_mode = RunMode::FastCheck;
            }
        }

        if let Ok(sim) = std::env::var("COLLECTOR_SIMULATOR") {
            config.simulator = parse_bool(&sim);
        }

        if let Ok(secs) = std::env::var("COLLECTOR_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = parse_secs("heartbeat_interval", &secs)?;
        }

        if let Ok(secs) = std::env::var("COLLECTOR_METRIC_SENDING_INTERVAL_SECS") {
            config.metric_sending_interval = parse_secs("metric_sending_interval", &secs)?;
        }

        if let Ok(size) = std::env::var("COLLECTOR_CALLBACKS_POOL_SIZE") {
            config.callbacks_pool_size = size.parse().map_err(|e| {
                CollectorError::Configuration(format!("Invalid callbacks_pool_size: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.callbacks_pool_size == 0 || self.internal_pool_size == 0 {
            return Err(CollectorError::Configuration(
                "worker pool sizes must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.metric_sending_interval.is_zero() {
            return Err(CollectorError::Configuration(
                "sending intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes")
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .parse()
        .map_err(|e| CollectorError::Configuration(format!("Invalid {name}: {e}")))?;
    if secs == 0 {
        return Err(CollectorError::Configuration(format!(
            "Invalid {name}: must be greater than zero"
        )));
    }
    Ok(Duration::from_secs(secs))
}
