//! Controller-assigned runtime properties, parsed from each heartbeat
//! response. Carries the debug-level overrides an operator can set on the
//! controller without restarting the agent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeProperties {
    #[serde(default)]
    pub extconfig: String,
    #[serde(default)]
    pub userconfig: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub debugmode: bool,
    #[serde(default)]
    pub runtime: HashMap<String, String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// The controller sends `"debugmode": "1"` rather than a boolean.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    })
}

impl RuntimeProperties {
    pub fn from_response(response: &Value) -> Self {
        serde_json::from_value(response.clone()).unwrap_or_default()
    }

    /// Effective log level for the collector: the per-name override
    /// (`debuglevel.<name>`) wins over the generic `debuglevel` key.
    pub fn log_level(&self, collector_name: &str) -> Option<&str> {
        self.runtime
            .get(&format!("debuglevel.{collector_name}"))
            .or_else(|| self.runtime.get("debuglevel"))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_heartbeat_response() {
        let props = RuntimeProperties::from_response(&json!({
            "extconfig": "b2520a74",
            "userconfig": "1645918226657",
            "debugmode": "1",
            "runtime": {"debuglevel": "debug"},
            "tasks": ["t1"],
        }));
        assert_eq!(props.extconfig, "b2520a74");
        assert!(props.debugmode);
        assert_eq!(props.log_level("anything"), Some("debug"));
    }

    #[test]
    fn per_name_override_wins() {
        let props = RuntimeProperties::from_response(&json!({
            "runtime": {
                "debuglevel": "info",
                "debuglevel.my-collector": "debug",
            }
        }));
        assert_eq!(props.log_level("my-collector"), Some("debug"));
        assert_eq!(props.log_level("other"), Some("info"));
    }

    #[test]
    fn malformed_response_defaults_cleanly() {
        let props = RuntimeProperties::from_response(&json!("not an object"));
        assert!(!props.debugmode);
        assert!(props.log_level("x").is_none());
    }
}
