//! # Collector Runtime
//!
//! The [`Collector`] is the explicit handle a host program builds, schedules
//! callbacks on, reports telemetry through and finally runs. It owns the
//! transport client, the scheduler, the worker pools, the metric buffer and
//! the health state; nothing in this crate lives in a global.
//!
//! Construction performs the startup handshake (activation configuration,
//! extension configuration, feature sets). A failure to obtain the
//! activation configuration is fatal: without it no routine may run.

pub mod health;
pub mod properties;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::activation::{ActivationConfig, ActivationType};
use crate::config::{CollectorConfig, RunMode};
use crate::constants::limits::{MAX_LOG_REQUEST_SIZE, MAX_MINT_LINES_PER_REQUEST};
use crate::constants::{DATASOURCE_TYPE, RFC_3339_FORMAT};
use crate::error::{CollectorError, Result};
use crate::events::{build_log_event, PlatformEvent, Severity};
use crate::logging::ThrottledLogGate;
use crate::metrics::{sfm_metric, Metric, MetricType};
use crate::scheduling::callback::current_callback;
use crate::scheduling::{
    InternalTask, RoutineFn, ScheduledCallback, SchedulerEngine, TickFire, WorkerPool,
};
use crate::status::endpoints::{EndpointLogLine, EndpointStatuses};
use crate::status::{Status, StatusValue};
use crate::transport::batching::{divide_into_batches, divide_into_chunks};
use crate::transport::TransportClient;

pub use health::{build_current_status, HealthAggregator};
pub use properties::RuntimeProperties;

/// Runs once before the scheduler loop starts; an error aborts startup and
/// is reported as the collector's status.
pub type InitHook = Box<dyn FnOnce(&Collector) -> anyhow::Result<()> + Send>;
/// Produces the single status of a fastcheck pass from the activation and
/// extension configurations.
pub type FastCheckHook = Box<dyn Fn(&ActivationConfig, &str) -> Status + Send + Sync>;
/// Runs after the scheduler loop stops, before the final flushes.
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

const METRIC_FLUSH_SUBSYSTEM: &str = "metric flush";
const SFM_FLUSH_SUBSYSTEM: &str = "self-monitoring flush";

/// Handle to the collector runtime. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    name: String,
    config: CollectorConfig,
    client: Arc<dyn TransportClient>,
    activation: ActivationConfig,
    extension_config: String,
    feature_sets: HashMap<String, Vec<String>>,
    /// Enrichment attributes merged into every reported log event.
    metadata: Mutex<Map<String, Value>>,

    callbacks: Mutex<Vec<Arc<ScheduledCallback>>>,
    pending_registrations: Mutex<Vec<Arc<ScheduledCallback>>>,
    registration_tx: Mutex<Option<mpsc::UnboundedSender<Arc<ScheduledCallback>>>>,

    metric_buffer: Mutex<Vec<String>>,
    internal_results: DashMap<&'static str, Status>,
    health: HealthAggregator,
    runtime_properties: Mutex<RuntimeProperties>,
    initialization_error: Mutex<Option<String>>,
    /// Throttles the repeating delivery-failure warnings the cadences emit.
    log_gate: ThrottledLogGate,
    cluster_time_diff_ms: Arc<AtomicI64>,

    init_hook: Mutex<Option<InitHook>>,
    fastcheck_hook: Mutex<Option<FastCheckHook>>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,

    callbacks_pool: WorkerPool,
    internal_pool: WorkerPool,
    heartbeat_pool: WorkerPool,
    shutdown_tx: watch::Sender<bool>,
}

impl Collector {
    /// Perform the startup handshake and build the runtime handle.
    pub async fn new(
        client: Arc<dyn TransportClient>,
        name: impl Into<String>,
        config: CollectorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();

        let raw_activation = match client.get_activation_config().await {
            Ok(raw) => raw,
            Err(fetch_error) => {
                let message = format!("cannot fetch activation config: {fetch_error}");
                error!("{message}");
                let status = Status::new(StatusValue::ControllerConnectionError, &message);
                if let Err(send_error) = client.send_status(&status).await {
                    warn!(error = %send_error, "could not report the startup failure");
                }
                return Err(CollectorError::Startup(message));
            }
        };
        let activation = ActivationConfig::new(raw_activation);

        let extension_config = match client.get_extension_config().await {
            Ok(config) => config,
            Err(fetch_error) => {
                warn!(error = %fetch_error, "cannot fetch extension config, continuing without it");
                String::new()
            }
        };
        let feature_sets = match client.get_feature_sets().await {
            Ok(sets) => sets,
            Err(fetch_error) => {
                warn!(error = %fetch_error, "cannot fetch feature sets, continuing without them");
                HashMap::new()
            }
        };

        let mut metadata = Map::new();
        metadata.insert("dt.extension.name".to_string(), json!(name));
        metadata.insert("dt.extension.version".to_string(), json!(activation.version));
        metadata.insert("dt.extension.ds".to_string(), json!(DATASOURCE_TYPE));

        let (shutdown_tx, _) = watch::channel(false);
        let callbacks_pool = WorkerPool::new("callbacks", config.callbacks_pool_size);
        let internal_pool = WorkerPool::new("internal", config.internal_pool_size);
        let heartbeat_pool = WorkerPool::new("heartbeat", config.heartbeat_pool_size);
        let health = HealthAggregator::new(config.endpoint_resend_interval);

        info!(
            collector = %name,
            version = %activation.version,
            activation_type = ?activation.activation_type,
            "collector initialized"
        );

        Ok(Self {
            inner: Arc::new(CollectorInner {
                name,
                config,
                client,
                activation,
                extension_config,
                feature_sets,
                metadata: Mutex::new(metadata),
                callbacks: Mutex::new(Vec::new()),
                pending_registrations: Mutex::new(Vec::new()),
                registration_tx: Mutex::new(None),
                metric_buffer: Mutex::new(Vec::new()),
                internal_results: DashMap::new(),
                health,
                runtime_properties: Mutex::new(RuntimeProperties::default()),
                initialization_error: Mutex::new(None),
                log_gate: ThrottledLogGate::default(),
                cluster_time_diff_ms: Arc::new(AtomicI64::new(0)),
                init_hook: Mutex::new(None),
                fastcheck_hook: Mutex::new(None),
                shutdown_hook: Mutex::new(None),
                callbacks_pool,
                internal_pool,
                heartbeat_pool,
                shutdown_tx,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn activation(&self) -> &ActivationConfig {
        &self.inner.activation
    }

    pub fn extension_config(&self) -> &str {
        &self.inner.extension_config
    }

    /// Feature set name to metric keys, as assigned by the controller.
    pub fn feature_sets(&self) -> &HashMap<String, Vec<String>> {
        &self.inner.feature_sets
    }

    pub fn runtime_properties(&self) -> RuntimeProperties {
        self.inner.runtime_properties.lock().clone()
    }

    /// Add an enrichment attribute stamped onto every subsequently reported
    /// log event, e.g. a monitoring configuration identifier.
    pub fn add_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.metadata.lock().insert(key.into(), value.into());
    }

    pub fn on_initialize(
        &self,
        hook: impl FnOnce(&Collector) -> anyhow::Result<()> + Send + 'static,
    ) {
        *self.inner.init_hook.lock() = Some(Box::new(hook));
    }

    pub fn on_fastcheck(
        &self,
        hook: impl Fn(&ActivationConfig, &str) -> Status + Send + Sync + 'static,
    ) {
        *self.inner.fastcheck_hook.lock() = Some(Box::new(hook));
    }

    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.shutdown_hook.lock() = Some(Box::new(hook));
    }

    /// Register a routine to run every `interval`. Before `run()` the
    /// registration is buffered; afterwards it reaches the live scheduler
    /// through the registration channel and fires on the next staggered slot.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        interval: Duration,
        routine: RoutineFn,
    ) -> Result<()> {
        self.schedule_for_activation(name, interval, routine, None)
    }

    /// Like [`Collector::schedule`], but only registers the routine when the
    /// activation type matches; otherwise the registration is a logged no-op.
    pub fn schedule_for_activation(
        &self,
        name: impl Into<String>,
        interval: Duration,
        routine: RoutineFn,
        activation_filter: Option<ActivationType>,
    ) -> Result<()> {
        let name = name.into();
        if let Some(required) = activation_filter {
            if required != self.inner.activation.activation_type {
                info!(
                    callback = %name,
                    required = ?required,
                    actual = ?self.inner.activation.activation_type,
                    "activation type does not match, callback not scheduled"
                );
                return Ok(());
            }
        }

        let callback = Arc::new(ScheduledCallback::new(
            name,
            interval,
            routine,
            activation_filter,
            Arc::clone(&self.inner.cluster_time_diff_ms),
            self.inner.config.simulator,
        )?);
        self.inner.callbacks.lock().push(Arc::clone(&callback));

        let tx = self.inner.registration_tx.lock();
        match tx.as_ref() {
            Some(tx) => {
                // A closed channel means the loop already stopped; the
                // registration is then moot.
                let _ = tx.send(callback);
            }
            None => self.inner.pending_registrations.lock().push(callback),
        }
        Ok(())
    }

    /// Validate a metric and append its wire line to the send buffer. A
    /// metric reported from inside a callback with no explicit timestamp is
    /// stamped with the callback's cadence-aligned timestamp.
    pub fn report_metric(&self, metric: Metric) -> Result<()> {
        metric.validate()?;
        let metric = match (&metric.timestamp, current_callback()) {
            (None, Some(callback)) => metric.with_timestamp(callback.adjusted_metric_timestamp()),
            _ => metric,
        };
        self.inner.metric_buffer.lock().push(metric.to_line());
        Ok(())
    }

    /// Append pre-rendered metric-protocol lines to the send buffer.
    pub fn report_mint_lines(&self, lines: impl IntoIterator<Item = String>) {
        self.inner.metric_buffer.lock().extend(lines);
    }

    /// Build and dispatch one log event, enriched with the collector's
    /// metadata. Must be called from within the running runtime.
    pub fn report_event(
        &self,
        title: &str,
        description: &str,
        severity: Severity,
        properties: Option<Map<String, Value>>,
    ) {
        let timestamp = current_callback()
            .map(|callback| callback.adjusted_metric_timestamp())
            .unwrap_or_else(|| self.inner.now_with_cluster_diff());
        let metadata = self.inner.metadata.lock().clone();
        let event = build_log_event(title, description, severity, timestamp, &metadata, properties);
        self.report_log_events(vec![event]);
    }

    pub fn report_log_event(&self, event: Value) {
        self.report_log_events(vec![event]);
    }

    /// Dispatch raw log events to the ingest on the internal pool;
    /// delivery failures are logged, never surfaced to the caller.
    pub fn report_log_events(&self, events: Vec<Value>) {
        if events.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.internal_pool.submit(async move {
            inner.send_log_events(events, true).await;
        });
    }

    /// Report plain log lines as `content`-only events.
    pub fn report_log_lines(&self, lines: Vec<String>) {
        let events = lines
            .into_iter()
            .map(|line| json!({ "content": line }))
            .collect();
        self.report_log_events(events);
    }

    /// Validate and deliver a structured platform event.
    pub async fn report_platform_event(&self, event: &PlatformEvent) -> Result<()> {
        event.validate()?;
        let payload = serde_json::to_value(event)
            .map_err(|e| CollectorError::Validation(format!("unencodable platform event: {e}")))?;
        self.inner.client.send_platform_event(&payload).await
    }

    /// Attach per-endpoint health to the calling callback, or fold it into
    /// the shared map directly when called outside any callback.
    pub fn report_endpoint_statuses(&self, statuses: EndpointStatuses) {
        match current_callback() {
            Some(callback) => callback.set_endpoint_statuses(statuses),
            None => self.inner.health.fold_report(&self.inner.name, &statuses),
        }
    }

    /// The overall status the next heartbeat would send.
    pub fn get_current_status(&self) -> Status {
        let callbacks = self.inner.callbacks.lock().clone();
        self.inner.health.fold_callback_reports(&callbacks);
        self.inner.build_status(&callbacks)
    }

    /// Signal the scheduler loop to stop.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Run the collector in its configured mode. `Loop` runs the scheduler
    /// until a shutdown signal; `FastCheck` reports one status and returns.
    pub async fn run(&self) -> Result<()> {
        match self.inner.config.run_mode {
            RunMode::FastCheck => self.run_fastcheck().await,
            RunMode::Loop => self.run_loop().await,
        }
    }

    async fn run_fastcheck(&self) -> Result<()> {
        info!(collector = %self.inner.name, "running fastcheck");
        let status = match self.inner.fastcheck_hook.lock().take() {
            Some(hook) => hook(&self.inner.activation, &self.inner.extension_config),
            None => Status::ok(),
        };
        self.inner
            .client
            .send_status(&status)
            .await
            .map_err(|e| CollectorError::Startup(format!("cannot report fastcheck result: {e}")))?;
        info!(status = %status, "fastcheck finished");
        Ok(())
    }

    async fn run_loop(&self) -> Result<()> {
        let init_hook = self.inner.init_hook.lock().take();
        if let Some(hook) = init_hook {
            if let Err(init_error) = hook(self) {
                let message = format!("initialization failed: {init_error:#}");
                error!("{message}");
                *self.inner.initialization_error.lock() = Some(message.clone());
                let status = Status::new(StatusValue::GenericError, &message);
                if let Err(send_error) = self.inner.client.send_status(&status).await {
                    warn!(error = %send_error, "could not report the initialization failure");
                }
                return Err(CollectorError::Startup(message));
            }
        }

        let (mut engine, registration_tx) =
            SchedulerEngine::new(self.inner.shutdown_tx.subscribe());
        *self.inner.registration_tx.lock() = Some(registration_tx);
        for callback in self.inner.pending_registrations.lock().drain(..) {
            engine.schedule_callback(callback);
        }

        let config = &self.inner.config;
        engine.schedule_internal(InternalTask::Heartbeat, config.heartbeat_interval, Duration::ZERO);
        engine.schedule_internal(
            InternalTask::RefreshClusterTimeDiff,
            config.time_diff_interval,
            Duration::ZERO,
        );
        engine.schedule_internal(
            InternalTask::FlushMetrics,
            config.metric_sending_interval,
            config.metric_sending_interval,
        );
        engine.schedule_internal(
            InternalTask::FlushSelfMonitoring,
            config.sfm_sending_interval,
            config.sfm_sending_interval,
        );

        let shutdown_tx = self.inner.shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        info!(collector = %self.inner.name, "collector running");
        let dispatcher = Arc::clone(&self.inner);
        engine.run(move |fire| Arc::clone(&dispatcher).dispatch(fire)).await;

        if let Some(hook) = self.inner.shutdown_hook.lock().take() {
            hook();
        }
        // Best-effort final delivery of whatever is still buffered.
        Arc::clone(&self.inner).flush_metrics().await;
        Arc::clone(&self.inner).flush_self_monitoring().await;
        info!(collector = %self.inner.name, "collector stopped");
        Ok(())
    }
}

impl CollectorInner {
    fn now_with_cluster_diff(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.cluster_time_diff_ms.load(Ordering::Relaxed))
    }

    fn dispatch(self: Arc<Self>, fire: TickFire) {
        match fire {
            TickFire::Callback(callback) => self.callbacks_pool.submit(callback.execute()),
            TickFire::Internal(task) => {
                let inner = Arc::clone(&self);
                match task {
                    InternalTask::Heartbeat => {
                        self.heartbeat_pool.submit(async move { inner.heartbeat().await })
                    }
                    InternalTask::FlushMetrics => {
                        self.internal_pool.submit(async move { inner.flush_metrics().await })
                    }
                    InternalTask::FlushSelfMonitoring => self
                        .internal_pool
                        .submit(async move { inner.flush_self_monitoring().await }),
                    InternalTask::RefreshClusterTimeDiff => self
                        .internal_pool
                        .submit(async move { inner.refresh_cluster_time_diff().await }),
                }
            }
        }
    }

    fn build_status(&self, callbacks: &[Arc<ScheduledCallback>]) -> Status {
        let initialization_error = self.initialization_error.lock().clone();
        let internal_results: Vec<(&'static str, Status)> = self
            .internal_results
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        build_current_status(
            initialization_error.as_deref(),
            &internal_results,
            callbacks,
            &self.health,
        )
    }

    /// One heartbeat: fold endpoint reports, announce due endpoint changes,
    /// send the aggregated status and absorb the controller's runtime
    /// properties from the response. A failed delivery only logs; the next
    /// heartbeat retries naturally.
    async fn heartbeat(self: Arc<Self>) {
        let callbacks = self.callbacks.lock().clone();
        self.health.fold_callback_reports(&callbacks);

        let now = self.now_with_cluster_diff();
        let log_lines = self.health.drain_endpoint_log_lines(now);
        if !log_lines.is_empty() {
            self.send_endpoint_log_lines(log_lines, now).await;
        }

        // The status carries the cadence-aligned callback clock, matching the
        // timestamps of the metrics the callbacks report.
        let status_timestamp = callbacks
            .last()
            .map(|callback| callback.adjusted_metric_timestamp())
            .unwrap_or(now);
        let status = self
            .build_status(&callbacks)
            .with_timestamp(status_timestamp.timestamp_millis());
        debug!(status = %status, "sending heartbeat");
        match self.client.send_status(&status).await {
            Ok(response) => {
                let properties = RuntimeProperties::from_response(&response);
                if let Some(level) = properties.log_level(&self.name) {
                    debug!(level, "controller requested log level");
                }
                *self.runtime_properties.lock() = properties;
            }
            Err(send_error) => {
                if self.log_gate.should_emit("heartbeat failed") {
                    warn!(error = %send_error, "heartbeat failed");
                }
            }
        }
    }

    async fn send_endpoint_log_lines(&self, lines: Vec<EndpointLogLine>, now: DateTime<Utc>) {
        let events: Vec<Value> = lines
            .iter()
            .map(|line| {
                json!({
                    "content": line.message,
                    "severity": line.severity.as_str(),
                    "device.address": line.endpoint,
                    "timestamp": now.format(RFC_3339_FORMAT).to_string(),
                })
            })
            .collect();
        self.send_log_events(events, false).await;
    }

    async fn send_log_events(&self, events: Vec<Value>, enrichment: bool) {
        let batches = match divide_into_batches(&events, MAX_LOG_REQUEST_SIZE, None) {
            Ok(batches) => batches,
            Err(encode_error) => {
                warn!(error = %encode_error, "cannot encode log events, dropping them");
                return;
            }
        };
        match self.client.send_events(&batches, enrichment).await {
            Ok(responses) => {
                for response in responses {
                    if let Some(rejection) = response.get("error") {
                        warn!(error = %rejection, "log ingest rejected a batch");
                    }
                }
            }
            Err(send_error) => {
                if self.log_gate.should_emit("cannot deliver log events") {
                    warn!(error = %send_error, "cannot deliver log events");
                }
            }
        }
    }

    /// Drain the metric buffer and ship it in line-capped chunks. The result
    /// feeds the next heartbeat through the internal subsystem results.
    async fn flush_metrics(self: Arc<Self>) {
        let lines: Vec<String> = std::mem::take(&mut *self.metric_buffer.lock());
        if lines.is_empty() {
            self.internal_results.insert(METRIC_FLUSH_SUBSYSTEM, Status::ok());
            return;
        }

        debug!(lines = lines.len(), "flushing metrics");
        let mut lines_invalid = 0u64;
        let mut failure = None;
        for chunk in divide_into_chunks(&lines, MAX_MINT_LINES_PER_REQUEST) {
            match self.client.send_metrics(chunk).await {
                Ok(responses) => {
                    lines_invalid += responses.iter().map(|r| r.lines_invalid).sum::<u64>()
                }
                Err(send_error) => {
                    if self.log_gate.should_emit("metric delivery failed") {
                        warn!(error = %send_error, "metric delivery failed, dropping the batch");
                    }
                    failure = Some(send_error.to_string());
                }
            }
        }

        let status = match failure {
            Some(message) => Status::new(
                StatusValue::GenericError,
                format!("cannot deliver metrics: {message}"),
            ),
            None if lines_invalid > 0 => Status::new(
                StatusValue::Warning,
                format!("{lines_invalid} metric lines were rejected"),
            ),
            None => Status::ok(),
        };
        self.internal_results.insert(METRIC_FLUSH_SUBSYSTEM, status);
    }

    /// Ship the collector's own health metrics, then reset the per-interval
    /// counters so the next window starts clean.
    async fn flush_self_monitoring(self: Arc<Self>) {
        let callbacks = self.callbacks.lock().clone();
        let lines = self.prepare_sfm_lines(&callbacks);

        let status = match self.client.send_sfm_metrics(&lines).await {
            Ok(response) => {
                debug!(response = %response, "self-monitoring metrics sent");
                if response.lines_invalid > 0 {
                    Status::new(
                        StatusValue::Warning,
                        format!("{} self-monitoring lines were rejected", response.lines_invalid),
                    )
                } else {
                    Status::ok()
                }
            }
            Err(send_error) => {
                warn!(error = %send_error, "cannot deliver self-monitoring metrics");
                Status::new(
                    StatusValue::GenericError,
                    format!("cannot deliver self-monitoring metrics: {send_error}"),
                )
            }
        };
        self.internal_results.insert(SFM_FLUSH_SUBSYSTEM, status);

        for callback in &callbacks {
            callback.reset_interval_counters();
        }
    }

    fn prepare_sfm_lines(&self, callbacks: &[Arc<ScheduledCallback>]) -> Vec<String> {
        let workers = tokio::runtime::Handle::current().metrics().num_workers();
        let mut lines = vec![sfm_metric("threads", workers as i64, MetricType::Gauge, false).to_line()];

        for callback in callbacks {
            let stats = callback.stats();
            let with_callback_dim = |metric: Metric| -> String {
                metric.with_dimension("callback", callback.name()).to_line()
            };
            lines.push(with_callback_dim(sfm_metric(
                "execution.time",
                stats.duration_interval_total.as_secs_f64(),
                MetricType::Gauge,
                true,
            )));
            lines.push(with_callback_dim(sfm_metric(
                "execution.total.count",
                stats.executions_total,
                MetricType::Count,
                true,
            )));
            lines.push(with_callback_dim(sfm_metric(
                "execution.count",
                stats.executions_per_interval,
                MetricType::Delta,
                false,
            )));
            lines.push(with_callback_dim(sfm_metric(
                "execution.ok.count",
                stats.ok_count,
                MetricType::Delta,
                false,
            )));
            lines.push(with_callback_dim(sfm_metric(
                "execution.timeout.count",
                stats.timeouts_count,
                MetricType::Delta,
                false,
            )));
            lines.push(with_callback_dim(sfm_metric(
                "execution.exception.count",
                stats.exception_count,
                MetricType::Delta,
                false,
            )));
        }
        lines
    }

    async fn refresh_cluster_time_diff(self: Arc<Self>) {
        match self.client.get_cluster_time_diff_ms().await {
            Ok(diff_ms) => {
                debug!(diff_ms, "cluster time diff refreshed");
                self.cluster_time_diff_ms.store(diff_ms, Ordering::Relaxed);
            }
            Err(fetch_error) => {
                warn!(error = %fetch_error, "cannot refresh cluster time diff")
            }
        }
    }
}
