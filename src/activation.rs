//! # Activation Configuration
//!
//! Typed view over the activation JSON the controller hands out during the
//! startup handshake. The collector cannot run routines without it.

use serde_json::{Map, Value};

/// Where the monitored targets live relative to the agent host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationType {
    Remote,
    Local,
}

/// Activation configuration assigned to this collector instance.
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    pub version: String,
    pub enabled: bool,
    pub description: String,
    pub feature_sets: Vec<String>,
    pub activation_type: ActivationType,
    config: Map<String, Value>,
}

impl ActivationConfig {
    pub fn new(raw: Value) -> Self {
        let version = raw
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let enabled = raw.get("enabled").and_then(Value::as_bool).unwrap_or(true);
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let feature_sets = raw
            .get("featureSets")
            .and_then(Value::as_array)
            .map(|sets| {
                sets.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let remote = raw
            .get("remote")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let local = raw
            .get("local")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let (activation_type, config) = if !remote.is_empty() {
            (ActivationType::Remote, remote)
        } else {
            (ActivationType::Local, local)
        };

        Self {
            version,
            enabled,
            description,
            feature_sets,
            activation_type,
            config,
        }
    }

    /// The active monitoring section: remote when present, local otherwise.
    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_section_wins_when_present() {
        let config = ActivationConfig::new(json!({
            "version": "1.2.3",
            "enabled": true,
            "description": "prod config",
            "featureSets": ["default", "extended"],
            "remote": {"endpoint": "10.0.0.1"},
        }));
        assert_eq!(config.activation_type, ActivationType::Remote);
        assert_eq!(config.version, "1.2.3");
        assert_eq!(config.feature_sets, vec!["default", "extended"]);
        assert_eq!(config.get("endpoint"), Some(&json!("10.0.0.1")));
    }

    #[test]
    fn defaults_to_local_with_empty_config() {
        let config = ActivationConfig::new(json!({}));
        assert_eq!(config.activation_type, ActivationType::Local);
        assert!(config.enabled);
        assert!(config.config().is_empty());
        assert!(config.get("anything").is_none());
    }
}
