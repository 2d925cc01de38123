//! slipway-retry — generic retry/reschedule primitive for async tasks.
//!
//! Every async task in the pipeline that talks to an external provider uses
//! the same shape: on a transient failure, record the failure into a
//! [`RetryContext`], ask the [`BackoffPolicy`] for a decision, and either
//! re-enqueue after the returned delay or run the terminal failure handler
//! exactly once.
//!
//! The default delay schedule is `min(multiplier^attempt, max_backoff)` with
//! an optional jitter to avoid thundering herds; task classes that want a
//! steady wait use the linear `min(step * attempt, max_backoff)` schedule
//! instead. The context bag (`retry_count`, first error, correlation id) is
//! serializable so it can be threaded through re-enqueued job payloads.

pub mod backoff;
pub mod context;

pub use backoff::{BackoffPolicy, LinearBackoff};
pub use context::{RetryContext, RetryDecision};
