//! # Health Status Taxonomy
//!
//! Ordered health levels and merge rules used everywhere the collector
//! reasons about its own health. `Empty` and `Ok` are non-error; `Warning`
//! and the hard error kinds are error for health computation, with `Warning`
//! deliberately weaker than a hard error when merging.
//!
//! The ordering lives in exactly one place: [`StatusValue::is_error`],
//! [`StatusValue::is_warning`] and [`StatusValue::severity_rank`]. Status
//! values are never compared by their wire strings.

pub mod endpoints;

use serde::{Deserialize, Serialize};

/// Health level reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusValue {
    /// No opinion yet.
    #[serde(rename = "")]
    Empty,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "GENERIC_ERROR")]
    GenericError,
    #[serde(rename = "INVALID_ARGS_ERROR")]
    InvalidArgsError,
    #[serde(rename = "EEC_CONNECTION_ERROR")]
    ControllerConnectionError,
    #[serde(rename = "INVALID_CONFIG_ERROR")]
    InvalidConfigError,
    #[serde(rename = "AUTHENTICATION_ERROR")]
    AuthenticationError,
    #[serde(rename = "DEVICE_CONNECTION_ERROR")]
    DeviceConnectionError,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "UNKNOWN_ERROR")]
    UnknownError,
}

impl StatusValue {
    /// Warning is treated as an error for health computation.
    pub fn is_error(&self) -> bool {
        !matches!(self, StatusValue::Ok | StatusValue::Empty)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, StatusValue::Warning)
    }

    /// Rank for worst-of aggregation: OK < WARNING < hard error.
    pub fn severity_rank(&self) -> u8 {
        match self {
            StatusValue::Empty | StatusValue::Ok => 0,
            StatusValue::Warning => 1,
            _ => 2,
        }
    }

    /// Wire string as the controller expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusValue::Empty => "",
            StatusValue::Ok => "OK",
            StatusValue::GenericError => "GENERIC_ERROR",
            StatusValue::InvalidArgsError => "INVALID_ARGS_ERROR",
            StatusValue::ControllerConnectionError => "EEC_CONNECTION_ERROR",
            StatusValue::InvalidConfigError => "INVALID_CONFIG_ERROR",
            StatusValue::AuthenticationError => "AUTHENTICATION_ERROR",
            StatusValue::DeviceConnectionError => "DEVICE_CONNECTION_ERROR",
            StatusValue::Warning => "WARNING",
            StatusValue::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health report: a level, a message, and an optional timestamp in epoch
/// milliseconds. Built fresh on every report, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(rename = "status")]
    pub value: StatusValue,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Status {
    pub fn new(value: StatusValue, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
            timestamp: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusValue::Ok, "")
    }

    pub fn empty() -> Self {
        Self::new(StatusValue::Empty, "")
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn is_error(&self) -> bool {
        self.value.is_error()
    }

    pub fn is_warning(&self) -> bool {
        self.value.is_warning()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{} {}", self.value, self.message),
        }
    }
}

/// Escalation boundary for [`MultiStatus::build_with_policy`]. Historical
/// variants of the merge rules disagree on whether an all-error set that
/// contains a warning escalates to a hard error; the boundary is a policy
/// value, not a hidden constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Any warning keeps the aggregate at WARNING, even when every other
    /// contributor is a hard error.
    #[default]
    WarningDominates,
    /// An all-error set escalates to GENERIC_ERROR regardless of warnings.
    AllErrorsEscalate,
}

/// Unordered bag of sub-statuses merged into one.
///
/// Merge rules (default policy): any WARNING present → WARNING; else all OK →
/// OK; else all error → GENERIC_ERROR; else (mixed OK/error) → WARNING.
#[derive(Debug, Default)]
pub struct MultiStatus {
    statuses: Vec<Status>,
}

impl MultiStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_status(&mut self, value: StatusValue, message: impl Into<String>) {
        self.statuses.push(Status::new(value, message));
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn build(&self) -> Status {
        self.build_with_policy(MergePolicy::default())
    }

    pub fn build_with_policy(&self, policy: MergePolicy) -> Status {
        if self.statuses.is_empty() {
            return Status::ok();
        }

        let mut messages = Vec::new();
        let mut all_ok = true;
        let mut all_err = true;
        let mut any_warning = false;

        for status in &self.statuses {
            if !status.message.is_empty() {
                messages.push(status.message.clone());
            }
            if status.is_warning() {
                any_warning = true;
            }
            if status.is_error() {
                all_ok = false;
            } else {
                all_err = false;
            }
        }

        let value = if all_err && policy == MergePolicy::AllErrorsEscalate {
            StatusValue::GenericError
        } else if any_warning {
            StatusValue::Warning
        } else if all_ok {
            StatusValue::Ok
        } else if all_err {
            StatusValue::GenericError
        } else {
            StatusValue::Warning
        };

        Status::new(value, messages.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_counts_as_error_but_ok_and_empty_do_not() {
        assert!(StatusValue::Warning.is_error());
        assert!(StatusValue::DeviceConnectionError.is_error());
        assert!(!StatusValue::Ok.is_error());
        assert!(!StatusValue::Empty.is_error());
        assert!(StatusValue::Warning.is_warning());
        assert!(!StatusValue::GenericError.is_warning());
    }

    #[test]
    fn status_serializes_wire_format() {
        let status = Status::new(StatusValue::GenericError, "boom").with_timestamp(1234);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "GENERIC_ERROR");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["timestamp"], 1234);

        let no_ts = serde_json::to_value(Status::ok()).unwrap();
        assert!(no_ts.get("timestamp").is_none());
    }

    #[test]
    fn empty_multi_status_builds_ok() {
        assert_eq!(MultiStatus::new().build().value, StatusValue::Ok);
    }

    #[test]
    fn warning_dominates_mixed_contributors() {
        let mut multi = MultiStatus::new();
        multi.add_status(StatusValue::Ok, "a ok");
        multi.add_status(StatusValue::Warning, "b warn");
        multi.add_status(StatusValue::GenericError, "c err");
        let built = multi.build();
        assert_eq!(built.value, StatusValue::Warning);
        assert_eq!(built.message, "a ok, b warn, c err");
    }

    #[test]
    fn all_hard_errors_build_generic_error() {
        let mut multi = MultiStatus::new();
        multi.add_status(StatusValue::GenericError, "x");
        multi.add_status(StatusValue::AuthenticationError, "y");
        assert_eq!(multi.build().value, StatusValue::GenericError);
    }

    #[test]
    fn mixed_ok_and_error_builds_warning() {
        let mut multi = MultiStatus::new();
        multi.add_status(StatusValue::Ok, "");
        multi.add_status(StatusValue::GenericError, "bad");
        let built = multi.build();
        assert_eq!(built.value, StatusValue::Warning);
        assert_eq!(built.message, "bad");
    }

    #[test]
    fn escalation_policy_overrides_warning_dominance() {
        let mut multi = MultiStatus::new();
        multi.add_status(StatusValue::Warning, "w");
        multi.add_status(StatusValue::GenericError, "e");
        assert_eq!(multi.build().value, StatusValue::Warning);
        assert_eq!(
            multi.build_with_policy(MergePolicy::AllErrorsEscalate).value,
            StatusValue::GenericError
        );
    }
}
