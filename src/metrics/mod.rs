//! # Metric Line Model
//!
//! Builds the text-protocol metric lines the controller ingests:
//! `key,dim="value" gauge,42 1700000000000`. Lines are validated against the
//! protocol limits before they enter the send buffer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::constants::{
    limits::{MAX_METRIC_DIMENSIONS, MAX_METRIC_LINE_LENGTH},
    DATASOURCE_TYPE, SFM_NAMESPACE_CLIENT_FACING, SFM_NAMESPACE_INTERNAL,
};
use crate::error::{CollectorError, Result};

/// Metric kind as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Count,
    Delta,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Count => "count",
            MetricType::Delta => "count,delta",
        }
    }
}

/// Pre-aggregated min/max/sum/count payload for a gauge line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStat {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: f64,
}

impl std::fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min={},max={},sum={},count={}",
            self.min, self.max, self.sum, self.count
        )
    }
}

/// A metric value: plain number, raw string, or summary statistic.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
    Raw(String),
    Summary(SummaryStat),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Raw(v) => f.write_str(v),
            MetricValue::Summary(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Int(value as i64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Raw(value.to_string())
    }
}

impl From<SummaryStat> for MetricValue {
    fn from(value: SummaryStat) -> Self {
        MetricValue::Summary(value)
    }
}

/// One metric sample. Dimensions are kept sorted so equal samples render
/// identical lines.
#[derive(Debug, Clone)]
pub struct Metric {
    pub key: String,
    pub value: MetricValue,
    pub dimensions: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Metric {
    pub fn new(key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            dimensions: BTreeMap::new(),
            metric_type: MetricType::Gauge,
            timestamp: None,
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: BTreeMap<String, String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn key_and_dimensions(&self) -> String {
        if self.dimensions.is_empty() {
            return self.key.clone();
        }
        let dimensions = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!("{},{}", self.key, dimensions)
    }

    /// Render the wire line for this sample.
    pub fn to_line(&self) -> String {
        let mut line = self.key_and_dimensions();

        match self.metric_type {
            MetricType::Delta => line = format!("{line} {}={}", self.metric_type.as_str(), self.value),
            _ => line = format!("{line} {},{}", self.metric_type.as_str(), self.value),
        }

        if let Some(timestamp) = self.timestamp {
            line = format!("{line} {}", timestamp.timestamp_millis());
        }

        line
    }

    /// Enforce the protocol limits before the sample enters the buffer.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.len() > MAX_METRIC_DIMENSIONS {
            return Err(CollectorError::Validation(format!(
                "Metric dimension count of {} exceeds limit of {} for {}",
                self.dimensions.len(),
                MAX_METRIC_DIMENSIONS,
                self.key
            )));
        }
        let line_length = self.to_line().len();
        if line_length > MAX_METRIC_LINE_LENGTH {
            return Err(CollectorError::Validation(format!(
                "Metric line length {} exceeds limit of {} for {}",
                line_length, MAX_METRIC_LINE_LENGTH, self.key
            )));
        }
        Ok(())
    }
}

/// Build the namespaced key for a self-monitoring metric.
pub fn sfm_metric_key(key: &str, client_facing: bool) -> String {
    let namespace = if client_facing {
        SFM_NAMESPACE_CLIENT_FACING
    } else {
        SFM_NAMESPACE_INTERNAL
    };
    format!("{namespace}:datasource.{DATASOURCE_TYPE}.{key}")
}

/// Convenience constructor for a self-monitoring metric.
pub fn sfm_metric(
    key: &str,
    value: impl Into<MetricValue>,
    metric_type: MetricType,
    client_facing: bool,
) -> Metric {
    Metric::new(sfm_metric_key(key, client_facing), value).with_type(metric_type)
}
