//! # Callback Scheduling and Execution
//!
//! Runs an arbitrary number of user-supplied collection routines on
//! independent periodic cadences: a single scheduler task owns a
//! time-ordered queue and only dispatches; bounded worker pools execute the
//! routines so one slow callback never blocks another or the queue itself.

pub mod callback;
pub mod pool;
pub mod scheduler;

pub use callback::{CallbackStats, RoutineFn, ScheduledCallback};
pub use pool::WorkerPool;
pub use scheduler::{InternalTask, SchedulerEngine, TickFire};
