//! # Log Events and Platform Events
//!
//! Payload types for the two event ingestion paths: enriched log events
//! (title/description/severity, shipped through log ingest) and structured
//! platform events (typed events the controller turns into alerts or
//! problems).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::RFC_3339_FORMAT;
use crate::error::{CollectorError, Result};

/// Severity of an event ingested through log ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Emergency,
    Error,
    Alert,
    Critical,
    Severe,
    Warn,
    Notice,
    Info,
    Debug,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Error => "ERROR",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Severe => "SEVERE",
            Severity::Warn => "WARN",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the log-ingest payload for a reported event, merging in the
/// runtime's enrichment metadata and any caller-supplied properties.
pub fn build_log_event(
    title: &str,
    description: &str,
    severity: Severity,
    timestamp: DateTime<Utc>,
    metadata: &Map<String, Value>,
    properties: Option<Map<String, Value>>,
) -> Value {
    let mut event = Map::new();
    event.insert(
        "content".to_string(),
        json!(format!("{title}\n{description}")),
    );
    event.insert("title".to_string(), json!(title));
    event.insert("description".to_string(), json!(description));
    event.insert(
        "timestamp".to_string(),
        json!(timestamp.format(RFC_3339_FORMAT).to_string()),
    );
    event.insert("severity".to_string(), json!(severity.as_str()));
    for (key, value) in metadata {
        event.insert(key.clone(), value.clone());
    }
    if let Some(properties) = properties {
        for (key, value) in properties {
            event.insert(key, value);
        }
    }
    Value::Object(event)
}

/// Kind of a structured platform event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformEventKind {
    AvailabilityEvent,
    CustomInfo,
    CustomAlert,
    CustomAnnotation,
    CustomConfiguration,
    CustomDeployment,
    ErrorEvent,
    MarkedForTermination,
    PerformanceEvent,
    ResourceContentionEvent,
}

/// A structured platform event, validated before send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEvent {
    pub event_type: PlatformEventKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, String>>,
}

impl PlatformEvent {
    pub fn new(event_type: PlatformEventKind, title: impl Into<String>) -> Self {
        Self {
            event_type,
            title: title.into(),
            start_time: None,
            end_time: None,
            timeout: None,
            entity_selector: None,
            properties: None,
        }
    }

    pub fn with_start_time(mut self, start_time_ms: i64) -> Self {
        self.start_time = Some(start_time_ms);
        self
    }

    pub fn with_end_time(mut self, end_time_ms: i64) -> Self {
        self.end_time = Some(end_time_ms);
        self
    }

    pub fn with_timeout(mut self, timeout_minutes: i64) -> Self {
        self.timeout = Some(timeout_minutes);
        self
    }

    pub fn with_entity_selector(mut self, selector: impl Into<String>) -> Self {
        self.entity_selector = Some(selector.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(CollectorError::Validation(
                "platform event title must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_wire_strings() {
        assert_eq!(Severity::Warn.as_str(), "WARN");
        assert_eq!(serde_json::to_value(Severity::Error).unwrap(), "ERROR");
    }

    #[test]
    fn log_event_contains_enrichment_and_properties() {
        let mut metadata = Map::new();
        metadata.insert("dt.extension.name".to_string(), json!("my-collector"));
        let mut properties = Map::new();
        properties.insert("custom".to_string(), json!("value"));

        let event = build_log_event(
            "title",
            "description",
            Severity::Info,
            Utc::now(),
            &metadata,
            Some(properties),
        );

        assert_eq!(event["title"], "title");
        assert_eq!(event["content"], "title\ndescription");
        assert_eq!(event["severity"], "INFO");
        assert_eq!(event["dt.extension.name"], "my-collector");
        assert_eq!(event["custom"], "value");
    }

    #[test]
    fn platform_event_serializes_camel_case_and_skips_unset_fields() {
        let event = PlatformEvent::new(PlatformEventKind::CustomAlert, "disk full")
            .with_timeout(15)
            .with_property("volume", "/dev/sda1");
        assert!(event.validate().is_ok());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "CUSTOM_ALERT");
        assert_eq!(json["timeout"], 15);
        assert!(json.get("startTime").is_none());
        assert_eq!(json["properties"]["volume"], "/dev/sda1");
    }

    #[test]
    fn empty_title_fails_validation() {
        let event = PlatformEvent::new(PlatformEventKind::CustomInfo, "");
        assert!(matches!(
            event.validate(),
            Err(CollectorError::Validation(_))
        ));
    }
}
