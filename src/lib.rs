#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Collector Core
//!
//! Runtime core for a telemetry collection agent: a host program registers
//! periodic collection routines against an explicit [`runtime::Collector`]
//! handle, and the runtime schedules them, executes them on bounded worker
//! pools, aggregates their health into a single heartbeat status and ships
//! metrics, log events and platform events through a pluggable transport.
//!
//! ## Overview
//!
//! The agent process embedding this crate talks to a controller: it fetches
//! its activation configuration during startup, reports an aggregated health
//! status every heartbeat, and delivers buffered telemetry on fixed
//! cadences. All network I/O goes through the [`transport::TransportClient`]
//! trait, so local development runs against [`transport::debug::DebugClient`]
//! with no controller present.
//!
//! ## Architecture
//!
//! A single scheduler task owns a time-ordered queue of ticks and only ever
//! dispatches; routine execution happens on semaphore-bounded worker pools.
//! Callback cadences are anchored to their first execution so they never
//! drift, and each callback runs at most once concurrently. Routine failures
//! and panics are contained and turned into health status, never into a
//! crashed runtime.
//!
//! ## Module Organization
//!
//! - [`runtime`] - The [`runtime::Collector`] handle, heartbeat and flush loops
//! - [`scheduling`] - Scheduler engine, scheduled callbacks and worker pools
//! - [`status`] - Health status taxonomy, merge rules and endpoint lifecycle
//! - [`metrics`] - Metric samples and wire-line rendering
//! - [`events`] - Log events and structured platform events
//! - [`transport`] - Transport trait, payload batching and the debug sink
//! - [`activation`] - Typed view over the activation configuration
//! - [`config`] - Runtime configuration with environment overrides
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use futures::FutureExt;
//!
//! use collector_core::config::CollectorConfig;
//! use collector_core::metrics::Metric;
//! use collector_core::runtime::Collector;
//! use collector_core::transport::debug::DebugClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = Arc::new(DebugClient::new("activation.json"));
//! let collector = Collector::new(client, "my-collector", CollectorConfig::from_env()?).await?;
//!
//! let handle = collector.clone();
//! collector.schedule(
//!     "query-devices",
//!     Duration::from_secs(60),
//!     Arc::new(move || {
//!         let collector = handle.clone();
//!         async move {
//!             collector.report_metric(Metric::new("device.temperature", 41.5))?;
//!             Ok(())
//!         }
//!         .boxed()
//!     }),
//! )?;
//!
//! collector.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod scheduling;
pub mod status;
pub mod transport;

pub use activation::{ActivationConfig, ActivationType};
pub use config::{CollectorConfig, RunMode};
pub use error::{CollectorError, Result};
pub use events::{PlatformEvent, PlatformEventKind, Severity};
pub use metrics::{Metric, MetricType, MetricValue, SummaryStat};
pub use runtime::{Collector, RuntimeProperties};
pub use scheduling::{RoutineFn, ScheduledCallback};
pub use status::endpoints::{EndpointStatus, EndpointStatuses};
pub use status::{MergePolicy, MultiStatus, Status, StatusValue};
pub use transport::{MintResponse, TransportClient};
