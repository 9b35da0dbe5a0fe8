// Durable delayed jobs
//
// Suspended automation executions are parked here as continuations and
// resumed later by the delay worker, with bounded retry on failure.

pub mod queue;
pub mod worker;

pub use queue::{
    BackoffStrategy, Continuation, DELAYED_EXECUTION_JOB, DelayQueue, DueJob, JobError, JobResult,
    PgDelayQueue, RetryPolicy,
};
pub use worker::{DelayWorker, resume_continuation};
