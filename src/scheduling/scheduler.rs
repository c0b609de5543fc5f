//! The scheduler task. Owns a min-heap of pending ticks keyed by absolute
//! fire time and only ever dispatches: execution happens on the worker
//! pools, so the queue keeps ticking while routines run.
//!
//! Callback ticks are re-enqueued on an anchored grid (`anchor + interval *
//! iteration`) so cadence never drifts with execution or dispatch latency.
//! Internal housekeeping ticks re-arm relative to dispatch time instead;
//! their exact phase does not matter.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::scheduling::callback::ScheduledCallback;

/// Housekeeping work the runtime schedules alongside user callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalTask {
    /// Build and send the aggregated health status.
    Heartbeat,
    /// Drain the metric buffer and ship it.
    FlushMetrics,
    /// Ship self-monitoring metrics and reset per-interval counters.
    FlushSelfMonitoring,
    /// Refresh the local-vs-cluster clock offset.
    RefreshClusterTimeDiff,
}

/// What a due tick asks the dispatcher to run.
pub enum TickFire {
    Callback(Arc<ScheduledCallback>),
    Internal(InternalTask),
}

enum TickEntry {
    Callback {
        callback: Arc<ScheduledCallback>,
        /// Fire time of iteration zero; all later fire times derive from it.
        anchor: Instant,
        iteration: u64,
    },
    Internal {
        task: InternalTask,
        interval: Duration,
    },
}

struct Tick {
    at: Instant,
    /// Lower fires first when `at` ties; housekeeping outranks callbacks.
    priority: u8,
    seq: u64,
    entry: TickEntry,
}

impl PartialEq for Tick {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Tick {}

impl PartialOrd for Tick {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tick {
    // Reversed so the std max-heap pops the earliest tick first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.at, other.priority, other.seq).cmp(&(self.at, self.priority, self.seq))
    }
}

/// Single-owner scheduling loop. Constructed with a shutdown signal; new
/// callbacks arrive over the registration channel while the loop runs.
pub struct SchedulerEngine {
    queue: BinaryHeap<Tick>,
    seq: u64,
    registrations: mpsc::UnboundedReceiver<Arc<ScheduledCallback>>,
    registrations_open: bool,
    shutdown: watch::Receiver<bool>,
}

impl SchedulerEngine {
    pub fn new(
        shutdown: watch::Receiver<bool>,
    ) -> (Self, mpsc::UnboundedSender<Arc<ScheduledCallback>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queue: BinaryHeap::new(),
                seq: 0,
                registrations: rx,
                registrations_open: true,
                shutdown,
            },
            tx,
        )
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Enqueue a callback at its staggered first fire time, which becomes
    /// the anchor for every later iteration.
    pub fn schedule_callback(&mut self, callback: Arc<ScheduledCallback>) {
        let anchor = Instant::now() + callback.initial_wait_time();
        info!(
            callback = %callback.name(),
            interval_seconds = callback.interval().as_secs(),
            "callback scheduled"
        );
        let seq = self.next_seq();
        self.queue.push(Tick {
            at: anchor,
            priority: 1,
            seq,
            entry: TickEntry::Callback {
                callback,
                anchor,
                iteration: 0,
            },
        });
    }

    /// Enqueue a recurring housekeeping task.
    pub fn schedule_internal(
        &mut self,
        task: InternalTask,
        interval: Duration,
        initial_delay: Duration,
    ) {
        let seq = self.next_seq();
        self.queue.push(Tick {
            at: Instant::now() + initial_delay,
            priority: 0,
            seq,
            entry: TickEntry::Internal { task, interval },
        });
    }

    /// Run until the shutdown signal flips. `dispatch` must not block: it
    /// hands the fired work to a pool and returns.
    pub async fn run(mut self, mut dispatch: impl FnMut(TickFire)) {
        info!("scheduler started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let deadline = self.queue.peek().map(|tick| tick.at);
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                registration = self.registrations.recv(), if self.registrations_open => {
                    match registration {
                        Some(callback) => self.schedule_callback(callback),
                        None => self.registrations_open = false,
                    }
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.fire_due(&mut dispatch);
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Pop and dispatch every tick that is due, re-arming each one.
    fn fire_due(&mut self, dispatch: &mut impl FnMut(TickFire)) {
        let now = Instant::now();
        while self.queue.peek().is_some_and(|tick| tick.at <= now) {
            let tick = self.queue.pop().expect("peeked tick present");
            match tick.entry {
                TickEntry::Callback {
                    callback,
                    anchor,
                    iteration,
                } => {
                    debug!(callback = %callback.name(), iteration, "dispatching callback tick");
                    dispatch(TickFire::Callback(Arc::clone(&callback)));
                    let iteration = iteration + 1;
                    let at = anchor + callback.interval() * iteration as u32;
                    let seq = self.next_seq();
                    self.queue.push(Tick {
                        at,
                        priority: 1,
                        seq,
                        entry: TickEntry::Callback {
                            callback,
                            anchor,
                            iteration,
                        },
                    });
                }
                TickEntry::Internal { task, interval } => {
                    dispatch(TickFire::Internal(task));
                    let seq = self.next_seq();
                    self.queue.push(Tick {
                        at: now + interval,
                        priority: 0,
                        seq,
                        entry: TickEntry::Internal { task, interval },
                    });
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    use crate::scheduling::callback::RoutineFn;

    fn noop_routine() -> RoutineFn {
        Arc::new(|| async { Ok(()) }.boxed())
    }

    fn simulator_callback(name: &str, interval: Duration) -> Arc<ScheduledCallback> {
        Arc::new(
            ScheduledCallback::new(
                name,
                interval,
                noop_routine(),
                None,
                Arc::new(AtomicI64::new(0)),
                true,
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval_on_an_anchored_grid() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut engine, _tx) = SchedulerEngine::new(shutdown_rx);
        engine.schedule_callback(simulator_callback("cb", Duration::from_secs(1)));

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_loop = Arc::clone(&fired);
        let engine_task = tokio::spawn(engine.run(move |fire| {
            if matches!(fire, TickFire::Callback(_)) {
                fired_in_loop.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // Fires at t=0s through t=5s inclusive.
        tokio::time::sleep(Duration::from_millis(5500)).await;
        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn executes_routines_exactly_once_per_tick() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut engine, _tx) = SchedulerEngine::new(shutdown_rx);
        let callback = simulator_callback("counted", Duration::from_secs(2));
        engine.schedule_callback(Arc::clone(&callback));

        let engine_task = tokio::spawn(engine.run(|fire| {
            if let TickFire::Callback(cb) = fire {
                tokio::spawn(cb.execute());
            }
        }));

        // Ticks at t=0,2,4,6,8.
        tokio::time::sleep(Duration::from_millis(9500)).await;
        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
        // Let the spawned execution tasks drain before reading counters.
        tokio::time::sleep(Duration::from_millis(1)).await;

        let stats = callback.stats();
        assert_eq!(stats.executions_total, 5);
        assert_eq!(stats.ok_count, 5);
        assert!(!stats.status.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_cadences_do_not_interfere() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut engine, _tx) = SchedulerEngine::new(shutdown_rx);
        let fast = simulator_callback("fast", Duration::from_secs(1));
        let slow = simulator_callback("slow", Duration::from_secs(5));
        engine.schedule_callback(Arc::clone(&fast));
        engine.schedule_callback(Arc::clone(&slow));

        let engine_task = tokio::spawn(engine.run(|fire| {
            if let TickFire::Callback(cb) = fire {
                tokio::spawn(cb.execute());
            }
        }));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        // t=0..10 inclusive for the 1 s cadence, t=0,5,10 for the 5 s one.
        assert_eq!(fast.stats().executions_total, 11);
        assert_eq!(slow.stats().executions_total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn registrations_arriving_mid_run_are_picked_up() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (engine, registration_tx) = SchedulerEngine::new(shutdown_rx);

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_loop = Arc::clone(&fired);
        let engine_task = tokio::spawn(engine.run(move |fire| {
            if matches!(fire, TickFire::Callback(_)) {
                fired_in_loop.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registration_tx
            .send(simulator_callback("late", Duration::from_secs(1)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn internal_tasks_rearm_relative_to_dispatch() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut engine, _tx) = SchedulerEngine::new(shutdown_rx);
        engine.schedule_internal(
            InternalTask::Heartbeat,
            Duration::from_secs(30),
            Duration::ZERO,
        );

        let fired = Arc::new(AtomicU32::new(0));
        let fired_in_loop = Arc::clone(&fired);
        let engine_task = tokio::spawn(engine.run(move |fire| {
            if matches!(fire, TickFire::Internal(InternalTask::Heartbeat)) {
                fired_in_loop.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // t=0, 30, 60.
        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
