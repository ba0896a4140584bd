//! Worker layer
//!
//! A fixed set of workers draining a bounded queue of poll tasks. The pool
//! knows nothing about schedules or registries; what a task does is up to
//! the injected `TaskExecutor`.

mod pool;

pub use pool::{
    Completion, ImageCheck, PollTask, PollingWorkerPool, PoolError, SweepFailed, TaskExecutor,
};
