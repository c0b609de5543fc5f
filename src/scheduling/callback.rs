//! A scheduled callback and its execution wrapper.
//!
//! Every user routine is wrapped in a [`ScheduledCallback`] that owns the
//! cadence, the per-interval self-monitoring counters, the health status of
//! the last run and the guard that keeps at most one execution of the
//! routine in flight at any time.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::activation::ActivationType;
use crate::error::{CollectorError, Result};
use crate::status::endpoints::EndpointStatuses;
use crate::status::{Status, StatusValue};

/// A collection routine: a factory producing one future per invocation.
/// State travels via closure capture, not argument lists.
pub type RoutineFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

tokio::task_local! {
    /// The callback whose routine is running on the current task, used to
    /// stamp reported metrics with the callback's adjusted timestamp.
    pub(crate) static CURRENT_CALLBACK: Arc<ScheduledCallback>;
}

/// Callback running on the current task, if any.
pub(crate) fn current_callback() -> Option<Arc<ScheduledCallback>> {
    CURRENT_CALLBACK.try_with(Arc::clone).ok()
}

/// Execution counters and health for one callback, reported through
/// self-monitoring and reset per flush interval where noted.
#[derive(Debug, Clone)]
pub struct CallbackStats {
    /// Total invocations since registration.
    pub executions_total: u64,
    /// Invocations since the last self-monitoring flush.
    pub executions_per_interval: u64,
    /// Cumulative routine runtime since registration.
    pub duration_total: Duration,
    /// Routine runtime accumulated since the last self-monitoring flush.
    pub duration_interval_total: Duration,
    /// Runs that completed in time and without error, since the last flush.
    pub ok_count: u64,
    /// Runs that overran their interval, since the last flush.
    pub timeouts_count: u64,
    /// Runs that returned an error or panicked, since the last flush.
    pub exception_count: u64,
    /// Health outcome of the most recent run.
    pub status: Status,
    /// Wall clock of the first execution; anchors metric timestamps.
    pub start_timestamp: Option<DateTime<Utc>>,
}

impl Default for CallbackStats {
    fn default() -> Self {
        Self {
            executions_total: 0,
            executions_per_interval: 0,
            duration_total: Duration::ZERO,
            duration_interval_total: Duration::ZERO,
            ok_count: 0,
            timeouts_count: 0,
            exception_count: 0,
            status: Status::ok(),
            start_timestamp: None,
        }
    }
}

/// A registered routine plus everything the scheduler needs to run it.
pub struct ScheduledCallback {
    name: String,
    routine: RoutineFn,
    interval: Duration,
    activation_filter: Option<ActivationType>,
    simulator: bool,
    running: AtomicBool,
    cluster_time_diff_ms: Arc<AtomicI64>,
    stats: Mutex<CallbackStats>,
    endpoint_statuses: Mutex<Option<EndpointStatuses>>,
}

impl ScheduledCallback {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        routine: RoutineFn,
        activation_filter: Option<ActivationType>,
        cluster_time_diff_ms: Arc<AtomicI64>,
        simulator: bool,
    ) -> Result<Self> {
        let name = name.into();
        if interval < Duration::from_secs(1) {
            return Err(CollectorError::InvalidArgs(format!(
                "callback '{name}' interval must be at least 1 second, got {interval:?}"
            )));
        }
        Ok(Self {
            name,
            routine,
            interval,
            activation_filter,
            simulator,
            running: AtomicBool::new(false),
            cluster_time_diff_ms,
            stats: Mutex::new(CallbackStats::default()),
            endpoint_statuses: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn activation_filter(&self) -> Option<ActivationType> {
        self.activation_filter
    }

    /// Local wall clock shifted by the last known cluster time offset.
    pub fn now_with_cluster_diff(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.cluster_time_diff_ms.load(Ordering::Relaxed))
    }

    /// Delay before the first execution: a random second within the current
    /// minute of the cluster-adjusted clock, spreading many callbacks
    /// registered together across the minute. Zero when running against a
    /// simulator so local runs start immediately.
    pub fn initial_wait_time(&self) -> Duration {
        if self.simulator {
            return Duration::ZERO;
        }
        let now = self.now_with_cluster_diff();
        let second = rand::thread_rng().gen_range(1..=59);
        let mut next = now
            .with_second(second)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if next <= now {
            next += chrono::Duration::minutes(1);
        }
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(
            callback = %self.name,
            wait_seconds = wait.as_secs(),
            "computed initial wait time"
        );
        wait
    }

    /// Timestamp for metrics reported from this callback: the anchor of the
    /// current cadence slot, `start + floor((now - start) / interval) *
    /// interval`, so samples land on the same grid regardless of how far
    /// into its run the routine reports them.
    pub fn adjusted_metric_timestamp(&self) -> DateTime<Utc> {
        let now = self.now_with_cluster_diff();
        let start = self.stats.lock().start_timestamp.unwrap_or(now);
        let interval_ms = self.interval.as_millis().max(1) as i64;
        let elapsed_ms = (now - start).num_milliseconds();
        let slots = elapsed_ms.div_euclid(interval_ms).max(0);
        start + chrono::Duration::milliseconds(slots * interval_ms)
    }

    /// Health outcome of the most recent run.
    pub fn status(&self) -> Status {
        self.stats.lock().status.clone()
    }

    pub fn stats(&self) -> CallbackStats {
        self.stats.lock().clone()
    }

    /// Reset the per-flush-interval counters after self-monitoring reads
    /// them; totals and the anchor timestamp survive.
    pub fn reset_interval_counters(&self) {
        let mut stats = self.stats.lock();
        stats.executions_per_interval = 0;
        stats.duration_interval_total = Duration::ZERO;
        stats.ok_count = 0;
        stats.timeouts_count = 0;
        stats.exception_count = 0;
    }

    /// Replace the endpoint health bag this callback last reported.
    pub fn set_endpoint_statuses(&self, statuses: EndpointStatuses) {
        *self.endpoint_statuses.lock() = Some(statuses);
    }

    pub fn latest_endpoint_statuses(&self) -> Option<EndpointStatuses> {
        self.endpoint_statuses.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn set_status_for_test(&self, status: Status) {
        self.stats.lock().status = status;
    }

    /// Mark an execution as started. Returns false when the previous run is
    /// still in flight, in which case this tick is skipped entirely.
    fn begin_execution(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let now = self.now_with_cluster_diff();
        let mut stats = self.stats.lock();
        stats.executions_total += 1;
        stats.executions_per_interval += 1;
        if stats.start_timestamp.is_none() {
            stats.start_timestamp = Some(now);
        }
        true
    }

    fn finish_execution(&self, duration: Duration, failure: Option<String>) {
        let failed = failure.is_some();
        {
            let mut stats = self.stats.lock();
            stats.duration_total += duration;
            stats.duration_interval_total += duration;
            match failure {
                Some(description) => {
                    error!(callback = %self.name, error = %description, "callback failed");
                    stats.status = Status::new(
                        StatusValue::GenericError,
                        format!("error in callback '{}': {description}", self.name),
                    );
                    stats.exception_count += 1;
                }
                None => stats.status = Status::ok(),
            }
            if duration > self.interval {
                let message = format!(
                    "callback '{}' took {:.3}s, longer than its interval of {}s",
                    self.name,
                    duration.as_secs_f64(),
                    self.interval.as_secs()
                );
                warn!(callback = %self.name, "{message}");
                stats.status = Status::new(StatusValue::GenericError, message);
                stats.timeouts_count += 1;
            } else if !failed {
                stats.ok_count += 1;
            }
        }
        self.running.store(false, Ordering::Release);
    }

    /// Run one invocation: guard against overlap, scope the task-local
    /// callback context, and convert both `Err` returns and panics into a
    /// recorded failure without ever unwinding into the worker pool.
    pub async fn execute(self: Arc<Self>) {
        if !self.begin_execution() {
            debug!(callback = %self.name, "previous run still in flight, skipping tick");
            return;
        }
        debug!(callback = %self.name, "running callback");
        let started = tokio::time::Instant::now();
        let routine = (self.routine)();
        let outcome = CURRENT_CALLBACK
            .scope(Arc::clone(&self), std::panic::AssertUnwindSafe(routine).catch_unwind())
            .await;
        let duration = started.elapsed();
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(format!("{error:#}")),
            Err(panic) => Some(panic_description(panic.as_ref())),
        };
        self.finish_execution(duration, failure);
    }
}

impl std::fmt::Debug for ScheduledCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledCallback")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_description(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn routine_ok(counter: Arc<AtomicU32>) -> RoutineFn {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn callback(name: &str, interval: Duration, routine: RoutineFn) -> Arc<ScheduledCallback> {
        Arc::new(
            ScheduledCallback::new(
                name,
                interval,
                routine,
                None,
                Arc::new(AtomicI64::new(0)),
                true,
            )
            .unwrap(),
        )
    }

    #[test]
    fn rejects_sub_second_intervals() {
        let err = ScheduledCallback::new(
            "too-fast",
            Duration::from_millis(200),
            Arc::new(|| async { Ok(()) }.boxed()),
            None,
            Arc::new(AtomicI64::new(0)),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, CollectorError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn successful_run_counts_ok_and_reports_ok_status() {
        let counter = Arc::new(AtomicU32::new(0));
        let cb = callback("ok", Duration::from_secs(60), routine_ok(Arc::clone(&counter)));
        Arc::clone(&cb).execute().await;
        Arc::clone(&cb).execute().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let stats = cb.stats();
        assert_eq!(stats.executions_total, 2);
        assert_eq!(stats.ok_count, 2);
        assert_eq!(stats.exception_count, 0);
        assert!(!stats.status.is_error());
    }

    #[tokio::test]
    async fn failing_run_records_exception_and_error_status() {
        let routine: RoutineFn =
            Arc::new(|| async { Err(anyhow::anyhow!("device unreachable")) }.boxed());
        let cb = callback("failing", Duration::from_secs(60), routine);
        Arc::clone(&cb).execute().await;
        let stats = cb.stats();
        assert_eq!(stats.exception_count, 1);
        assert_eq!(stats.ok_count, 0);
        assert!(stats.status.is_error());
        assert!(stats.status.message.contains("device unreachable"));
    }

    #[tokio::test]
    async fn panicking_run_is_contained() {
        let routine: RoutineFn = Arc::new(|| {
            async {
                panic!("boom");
            }
            .boxed()
        });
        let cb = callback("panicking", Duration::from_secs(60), routine);
        Arc::clone(&cb).execute().await;
        let stats = cb.stats();
        assert_eq!(stats.exception_count, 1);
        assert!(stats.status.is_error());
        assert!(stats.status.message.contains("boom"));
        // The guard was released, so the next run proceeds normally.
        Arc::clone(&cb).execute().await;
        assert_eq!(cb.stats().executions_total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_run_counts_timeout_not_ok() {
        let routine: RoutineFn = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(())
            }
            .boxed()
        });
        let cb = callback("slow", Duration::from_secs(1), routine);
        Arc::clone(&cb).execute().await;
        let stats = cb.stats();
        assert_eq!(stats.timeouts_count, 1);
        assert_eq!(stats.ok_count, 0);
        assert!(stats.status.is_error());
        assert!(stats.status.message.contains("longer than its interval"));
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let routine: RoutineFn = Arc::new(move || {
            let mut release = release_rx.clone();
            async move {
                while !*release.borrow() {
                    if release.changed().await.is_err() {
                        break;
                    }
                }
                Ok(())
            }
            .boxed()
        });
        let cb = callback("held", Duration::from_secs(60), routine);

        let first = tokio::spawn(Arc::clone(&cb).execute());
        tokio::task::yield_now().await;
        // Second tick arrives while the first run is still blocked.
        Arc::clone(&cb).execute().await;
        assert_eq!(cb.stats().executions_total, 1);

        release_tx.send(true).unwrap();
        first.await.unwrap();
        assert_eq!(cb.stats().executions_total, 1);
        assert_eq!(cb.stats().ok_count, 1);
    }

    #[tokio::test]
    async fn interval_counters_reset_but_totals_survive() {
        let counter = Arc::new(AtomicU32::new(0));
        let cb = callback("reset", Duration::from_secs(60), routine_ok(counter));
        Arc::clone(&cb).execute().await;
        cb.reset_interval_counters();
        let stats = cb.stats();
        assert_eq!(stats.executions_total, 1);
        assert_eq!(stats.executions_per_interval, 0);
        assert_eq!(stats.ok_count, 0);
        assert!(stats.start_timestamp.is_some());
    }

    #[test]
    fn adjusted_timestamp_lands_on_the_cadence_grid() {
        let cb = callback(
            "grid",
            Duration::from_secs(60),
            Arc::new(|| async { Ok(()) }.boxed()),
        );
        let start = Utc::now() - chrono::Duration::seconds(150);
        cb.stats.lock().start_timestamp = Some(start);
        let adjusted = cb.adjusted_metric_timestamp();
        // 150 s after start with a 60 s interval puts us in slot 2.
        assert_eq!(adjusted, start + chrono::Duration::seconds(120));
    }

    #[test]
    fn simulator_skips_the_initial_stagger() {
        let cb = callback(
            "sim",
            Duration::from_secs(60),
            Arc::new(|| async { Ok(()) }.boxed()),
        );
        assert_eq!(cb.initial_wait_time(), Duration::ZERO);
    }
}
