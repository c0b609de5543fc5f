//! # System Constants
//!
//! Operational boundaries of the collector runtime: internal cadences, worker
//! pool sizes, and transport request ceilings. These mirror the limits the
//! controller enforces on the other side of the wire.

use std::time::Duration;

/// How often the aggregated health status is sent to the controller.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How often buffered metric lines are flushed to the controller.
pub const METRIC_SENDING_INTERVAL: Duration = Duration::from_secs(30);

/// How often self-monitoring metrics are emitted and per-interval counters reset.
pub const SFM_METRIC_SENDING_INTERVAL: Duration = Duration::from_secs(60);

/// How often the local-vs-cluster clock offset is refreshed.
pub const TIME_DIFF_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum time between repeated announcements of an unchanged, still-unhealthy endpoint.
pub const ENDPOINT_RESEND_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Worker pool sized for up to ~100 concurrently running user routines.
pub const CALLBACKS_POOL_SIZE: usize = 100;

/// Pool for internal periodic tasks (metric flush, log flush, clock-skew refresh).
pub const INTERNAL_POOL_SIZE: usize = 20;

/// Dedicated pool for heartbeat transmission, kept independent so a slow
/// metrics flush cannot delay the health heartbeat.
pub const HEARTBEAT_POOL_SIZE: usize = 2;

/// Transport request ceilings.
pub mod limits {
    /// Maximum metric lines per request; counts above this are chunked.
    pub const MAX_MINT_LINES_PER_REQUEST: usize = 1000;

    /// Byte ceiling for one metric request body.
    pub const MAX_METRIC_REQUEST_SIZE: usize = 1_000_000;

    /// Byte ceiling for one log/event request body.
    pub const MAX_LOG_REQUEST_SIZE: usize = 5_000_000;

    /// Maximum dimensions allowed on a single metric line.
    pub const MAX_METRIC_DIMENSIONS: usize = 50;

    /// Maximum rendered length of a single metric line.
    pub const MAX_METRIC_LINE_LENGTH: usize = 2000;
}

/// Datasource identifier stamped on enriched events and self-monitoring keys.
pub const DATASOURCE_TYPE: &str = "collector";

/// Namespace for client-facing self-monitoring metrics.
pub const SFM_NAMESPACE_CLIENT_FACING: &str = "dsfm";

/// Namespace for internal self-monitoring metrics.
pub const SFM_NAMESPACE_INTERNAL: &str = "isfm";

/// Timestamp format for event payloads.
pub const RFC_3339_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
