//! Delayed-retry task scheduling.
//!
//! An in-process worker pool that executes mail side-effects off the request
//! path, retries transient failures on a doubling backoff anchored to the
//! task's creation time, and parks everything that will never succeed on an
//! append-only dead list.
//!
//! ## Components
//!
//! - [`Task`]: a unit of deferrable work, typed by kind
//! - [`DelayQueue`]: min-heap of tasks awaiting their `execute_at`
//! - [`Scheduler`]: bounded ingress, worker pool, delay poller, dead list

pub mod delay_queue;
pub mod scheduler;
pub mod task;

pub use delay_queue::DelayQueue;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats, ShutdownReport, SubmitError};
pub use task::{
    ActivationMail, DeadTask, PasswordResetMail, Task, TaskId, TaskKind, TokenActivationMail,
};
