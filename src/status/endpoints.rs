//! # Per-Endpoint Health Lifecycle
//!
//! Turns a stream of per-endpoint health reports, produced independently by
//! many collection routines, into a throttled log-worthy change feed plus a
//! single merged [`Status`].
//!
//! Each endpoint moves through `INITIAL -> NEW -> ONGOING`: a first report
//! creates the record, a changed report flips it back to `NEW`, and an
//! unchanged unhealthy endpoint is re-announced at most once per resend
//! interval. Records are never deleted; an endpoint that recovers is
//! announced once and then stays quiet until it changes again.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{CollectorError, Result};
use crate::events::Severity;
use crate::status::{Status, StatusValue};

/// One endpoint health report. Compared by full equality to detect a
/// meaningful state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub value: StatusValue,
    pub message: String,
}

impl EndpointStatus {
    pub fn new(
        endpoint: impl Into<String>,
        value: StatusValue,
        message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            value,
            message: message.into(),
        }
    }
}

/// Bag of endpoint reports produced by a single routine invocation.
/// Re-reporting the same endpoint within one bag overwrites the earlier
/// entry; report order is preserved otherwise.
#[derive(Debug, Clone, Default)]
pub struct EndpointStatuses {
    statuses: Vec<EndpointStatus>,
}

impl EndpointStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint_status(&mut self, status: EndpointStatus) {
        if let Some(existing) = self
            .statuses
            .iter_mut()
            .find(|s| s.endpoint == status.endpoint)
        {
            *existing = status;
        } else {
            self.statuses.push(status);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointStatus> {
        self.statuses.iter()
    }
}

/// Lifecycle state of one endpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Initial,
    New,
    Ongoing,
}

impl StatusState {
    fn as_str(&self) -> &'static str {
        match self {
            StatusState::Initial => "INITIAL",
            StatusState::New => "NEW",
            StatusState::Ongoing => "ONGOING",
        }
    }
}

#[derive(Debug, Clone)]
struct EndpointRecord {
    status: EndpointStatus,
    last_reported_at: Option<DateTime<Utc>>,
    state: StatusState,
}

/// One structured log line produced for a reported endpoint change.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLogLine {
    pub endpoint: String,
    pub severity: Severity,
    pub message: String,
}

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(0);

/// Stateful aggregator of per-endpoint status reports over time.
///
/// The record table is guarded by a single lock per instance. Merging two
/// instances holds both locks for the duration of the merge, always acquired
/// in instance-creation order to avoid deadlock.
#[derive(Debug)]
pub struct EndpointStatusMap {
    id: u64,
    resend_interval: chrono::Duration,
    records: Mutex<Vec<EndpointRecord>>,
}

impl EndpointStatusMap {
    pub fn new(resend_interval: std::time::Duration) -> Self {
        Self {
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            resend_interval: chrono::Duration::from_std(resend_interval)
                .unwrap_or_else(|_| chrono::Duration::hours(2)),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn contains_any_status(&self) -> bool {
        !self.records.lock().is_empty()
    }

    /// Fold one routine's report into the map. A first report for an endpoint
    /// creates the record in `INITIAL`; a report that differs from the stored
    /// one flips the record to `NEW` and clears the reporting timestamp.
    pub fn update_from(&self, statuses: &EndpointStatuses) {
        let mut records = self.records.lock();
        for status in statuses.iter() {
            Self::apply(&mut records, status.clone());
        }
    }

    fn apply(records: &mut Vec<EndpointRecord>, status: EndpointStatus) {
        match records.iter_mut().find(|r| r.status.endpoint == status.endpoint) {
            None => records.push(EndpointRecord {
                status,
                last_reported_at: None,
                state: StatusState::Initial,
            }),
            Some(record) if record.status != status => {
                record.status = status;
                record.last_reported_at = None;
                record.state = StatusState::New;
            }
            Some(_) => {}
        }
    }

    /// Fold another map into this one.
    ///
    /// The same endpoint identifier appearing in both maps with conflicting
    /// data is a contract violation between two independent contributors and
    /// is reported as an error; non-conflicting records are still merged.
    pub fn merge_from(&self, other: &EndpointStatusMap) -> Result<()> {
        // Merging a map into itself is a no-op; taking both locks would
        // deadlock on the same mutex.
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        // Fixed acquisition order by instance id.
        let (mut mine, theirs) = if self.id <= other.id {
            let mine = self.records.lock();
            let theirs = other.records.lock();
            (mine, theirs)
        } else {
            let theirs = other.records.lock();
            let mine = self.records.lock();
            (mine, theirs)
        };

        let mut conflicts = Vec::new();
        for record in theirs.iter() {
            match mine
                .iter()
                .find(|r| r.status.endpoint == record.status.endpoint)
            {
                None => mine.push(record.clone()),
                Some(existing) if existing.status != record.status => {
                    conflicts.push(record.status.endpoint.clone());
                }
                Some(_) => {}
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(CollectorError::EndpointConflict(format!(
                "conflicting reports for endpoints: {}",
                conflicts.join(", ")
            )))
        }
    }

    /// Apply the reporting policy and return the log lines that are due now,
    /// transitioning reported records to `ONGOING` and refreshing their
    /// reporting timestamps.
    pub fn drain_reportable(&self, now: DateTime<Utc>) -> Vec<EndpointLogLine> {
        let mut lines = Vec::new();
        let mut records = self.records.lock();
        for record in records.iter_mut() {
            if !self.should_report(record, now) {
                continue;
            }
            lines.push(render_log_line(record));
            record.last_reported_at = Some(now);
            record.state = StatusState::Ongoing;
        }
        lines
    }

    fn should_report(&self, record: &EndpointRecord, now: DateTime<Utc>) -> bool {
        if record.status.value == StatusValue::Ok {
            // Announce recoveries once.
            return record.state == StatusState::New;
        }
        match record.state {
            StatusState::Initial | StatusState::New => true,
            StatusState::Ongoing => match record.last_reported_at {
                None => true,
                Some(last) => now - last >= self.resend_interval,
            },
        }
    }

    /// Merge every record into a single status.
    ///
    /// All endpoints OK yields OK. Otherwise the overall value is
    /// GENERIC_ERROR only when every endpoint is a hard error; any mix that
    /// includes at least one OK or WARNING endpoint is reported as WARNING,
    /// so a broken device never hides under an aggregate OK and a partial
    /// failure is not over-escalated.
    pub fn merged_status(&self) -> Status {
        let records = self.records.lock();

        let mut ok_count = 0usize;
        let mut nok_count = 0usize;
        let mut has_warning = false;
        let mut error_messages = Vec::new();

        for record in records.iter() {
            let status = &record.status;
            if status.value.is_warning() {
                has_warning = true;
            }
            if status.value.is_error() {
                nok_count += 1;
                error_messages.push(format!(
                    "{} - {} {}",
                    status.endpoint, status.value, status.message
                ));
            } else {
                ok_count += 1;
            }
        }

        if nok_count == 0 {
            return Status::new(StatusValue::Ok, format!("Endpoints OK: {ok_count} NOK: 0"));
        }

        let all_faulty = ok_count == 0;
        let value = if all_faulty && !has_warning {
            StatusValue::GenericError
        } else {
            StatusValue::Warning
        };

        Status::new(
            value,
            format!(
                "Endpoints OK: {ok_count} NOK: {nok_count} NOK_reported_errors: {}",
                error_messages.join(", ")
            ),
        )
    }
}

fn render_log_line(record: &EndpointRecord) -> EndpointLogLine {
    let status = &record.status;
    let severity = if !status.value.is_error() {
        Severity::Info
    } else if status.value.is_warning() {
        Severity::Warn
    } else {
        Severity::Error
    };

    EndpointLogLine {
        endpoint: status.endpoint.clone(),
        severity,
        message: format!(
            "{}: [{}] - {} {}",
            status.endpoint,
            record.state.as_str(),
            status.value,
            status.message
        ),
    }
}
