//! # Structured Logging
//!
//! Environment-aware tracing setup. Production output is JSON for the log
//! pipeline; development output is human-readable. The controller can bump
//! the level at runtime through the heartbeat response, which is applied as a
//! default when `RUST_LOG` is unset.
//!
//! [`ThrottledLogGate`] suppresses repeats of the same message for the
//! failure paths that fire on a fixed cadence, so a controller outage does
//! not flood the log pipeline with one identical line per heartbeat.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Resend window after which a suppressed message may be logged again.
pub const DEFAULT_LOG_REPEAT_INTERVAL: Duration = Duration::from_secs(60 * 60);

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `default_level` is used when `RUST_LOG` is not set, typically `"info"` or
/// a controller-assigned `"debug"` override.
pub fn init_structured_logging(default_level: &str) {
    let level = default_level.to_string();
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.clone()));

        let json_output = matches!(
            std::env::var("COLLECTOR_ENV").as_deref(),
            Ok("production") | Ok("prod")
        );

        let result = if json_output {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_ansi(false)
                        .with_filter(filter),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_filter(filter))
                .try_init()
        };

        // A subscriber installed by the host process wins; not an error.
        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed, keeping it");
        }
    });
}

struct GateState {
    last_emitted: HashMap<String, Instant>,
    last_cleanup: Instant,
}

/// Repeat throttle for log messages keyed by an arbitrary string.
///
/// `should_emit` returns true the first time a key is seen and again once the
/// repeat interval has elapsed; repeats inside the window are suppressed.
/// Keys whose window has fully elapsed are evicted opportunistically so the
/// cache does not grow with one-off messages.
pub struct ThrottledLogGate {
    repeat_interval: Duration,
    cleanup_interval: Duration,
    state: Mutex<GateState>,
}

impl ThrottledLogGate {
    pub fn new(repeat_interval: Duration) -> Self {
        Self {
            repeat_interval,
            cleanup_interval: repeat_interval,
            state: Mutex::new(GateState {
                last_emitted: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Whether a message under `key` should be logged now. Recording the
    /// emission and applying the throttle happen in one step.
    pub fn should_emit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        let emit = match state.last_emitted.get(key) {
            Some(last) if now.duration_since(*last) < self.repeat_interval => false,
            _ => {
                state.last_emitted.insert(key.to_string(), now);
                true
            }
        };

        if now.duration_since(state.last_cleanup) >= self.cleanup_interval {
            let window = self.repeat_interval;
            state
                .last_emitted
                .retain(|_, last| now.duration_since(*last) < window);
            state.last_cleanup = now;
        }

        emit
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.state.lock().last_emitted.len()
    }
}

impl Default for ThrottledLogGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_REPEAT_INTERVAL)
    }
}
