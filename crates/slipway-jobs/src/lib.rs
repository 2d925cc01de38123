//! slipway-jobs — the async task surface of the release pipeline.
//!
//! Jobs are serializable payloads consumed by a pool of workers. The queue
//! deliberately guarantees nothing about ordering across retries and
//! re-enqueues: handlers must be idempotent and re-entrant, re-checking
//! entity state on entry and treating a now-invalid precondition as "this
//! execution is stale, do nothing". Per-entity serialization is the lock
//! manager's job, not the queue's.
//!
//! A handler reports one of three outcomes per delivery: done, retry after a
//! delay (the runner re-enqueues the returned payload), or failed (logged
//! with full context; fatal for that task instance only, the worker keeps
//! draining).

pub mod job;
pub mod queue;

pub use job::Job;
pub use queue::{job_queue, JobHandler, JobOutcome, JobQueue, JobRunner};
