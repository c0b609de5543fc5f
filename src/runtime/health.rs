//! Health aggregation: folds per-callback endpoint reports into the shared
//! endpoint map and merges everything the runtime knows about its own health
//! into the single status the heartbeat sends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::error;

use crate::scheduling::ScheduledCallback;
use crate::status::endpoints::{EndpointLogLine, EndpointStatusMap, EndpointStatuses};
use crate::status::{Status, StatusValue};

/// Owns the shared endpoint map plus the record of which callback first
/// reported each endpoint. Two callbacks reporting the same endpoint is a
/// contract violation between contributors: the conflicting entries are
/// logged and dropped, everything else still merges.
pub struct HealthAggregator {
    endpoint_map: EndpointStatusMap,
    owners: Mutex<HashMap<String, String>>,
}

impl HealthAggregator {
    pub fn new(resend_interval: Duration) -> Self {
        Self {
            endpoint_map: EndpointStatusMap::new(resend_interval),
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Fold the latest endpoint bag of every callback into the shared map.
    pub fn fold_callback_reports(&self, callbacks: &[Arc<ScheduledCallback>]) {
        for callback in callbacks {
            if let Some(bag) = callback.latest_endpoint_statuses() {
                self.fold_report(callback.name(), &bag);
            }
        }
    }

    /// Fold one contributor's endpoint bag, enforcing single ownership of
    /// each endpoint identifier.
    pub fn fold_report(&self, owner: &str, bag: &EndpointStatuses) {
        let mut accepted = EndpointStatuses::new();
        {
            let mut owners = self.owners.lock();
            for status in bag.iter() {
                match owners.get(&status.endpoint) {
                    Some(existing) if existing != owner => {
                        error!(
                            endpoint = %status.endpoint,
                            reporter = owner,
                            owner = %existing,
                            "endpoint already reported by another callback, dropping conflicting report"
                        );
                    }
                    _ => {
                        owners.insert(status.endpoint.clone(), owner.to_string());
                        accepted.add_endpoint_status(status.clone());
                    }
                }
            }
        }
        if !accepted.is_empty() {
            self.endpoint_map.update_from(&accepted);
        }
    }

    pub fn has_endpoint_reports(&self) -> bool {
        self.endpoint_map.contains_any_status()
    }

    /// Endpoint changes due for announcement now; advances the lifecycle of
    /// every returned record.
    pub fn drain_endpoint_log_lines(&self, now: DateTime<Utc>) -> Vec<EndpointLogLine> {
        self.endpoint_map.drain_reportable(now)
    }

    pub fn merged_endpoint_status(&self) -> Status {
        self.endpoint_map.merged_status()
    }
}

/// Merge everything into the one status the controller sees.
///
/// A recorded initialization failure wins outright. Otherwise a failing
/// internal subsystem (metric flush, self-monitoring) short-circuits the
/// callback summary: the agent's own plumbing being broken is more urgent
/// than whatever the callbacks report. In the normal case the result is a
/// worst-of aggregation over callback statuses plus the merged endpoint
/// status.
pub fn build_current_status(
    initialization_error: Option<&str>,
    internal_results: &[(&'static str, Status)],
    callbacks: &[Arc<ScheduledCallback>],
    aggregator: &HealthAggregator,
) -> Status {
    if let Some(message) = initialization_error {
        return Status::new(StatusValue::GenericError, message);
    }

    let internal_failures: Vec<&(&'static str, Status)> = internal_results
        .iter()
        .filter(|(_, status)| status.is_error())
        .collect();
    if !internal_failures.is_empty() {
        let mut value = StatusValue::Ok;
        let mut messages = Vec::new();
        for (subsystem, status) in internal_failures {
            if status.value.severity_rank() > value.severity_rank() {
                value = status.value;
            }
            messages.push(format!("{subsystem}: {}", status.message));
        }
        return Status::new(value, messages.join("\n"));
    }

    let mut value = StatusValue::Ok;
    let mut messages = Vec::new();

    for callback in callbacks {
        let status = callback.status();
        if status.is_error() {
            if status.value.severity_rank() > value.severity_rank() {
                value = status.value;
            }
            messages.push(format!("{}: {}", callback.name(), status.message));
        }
    }

    if aggregator.has_endpoint_reports() {
        let endpoint_status = aggregator.merged_endpoint_status();
        if endpoint_status.is_error() {
            if endpoint_status.value.severity_rank() > value.severity_rank() {
                value = endpoint_status.value;
            }
            messages.push(endpoint_status.message);
        }
    }

    Status::new(value, messages.join("\n"))
}
