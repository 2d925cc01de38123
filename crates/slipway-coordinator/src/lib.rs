//! slipway-coordinator — where external facts and caller intents meet the
//! pipeline.
//!
//! Facts that already happened (commits landed, a CI run finished, a health
//! verdict arrived) enter as [`Signal`]s; things a caller wants done enter as
//! action methods on [`Coordinator`]. Both resolve the same way: re-read the
//! entity, validate the precondition against its *current* state, perform
//! one guarded transition, then schedule at most one follow-on job. Replayed
//! signals are detected from entity state alone — there is no dedup table.
//!
//! [`handler::PipelineHandler`] plugs the coordinator, the automatic rollout
//! engine, and the health poller into the job queue.

pub mod actions;
pub mod context;
pub mod error;
pub mod handler;
pub mod signal;

#[cfg(test)]
pub(crate) mod testutil;

pub use actions::{ApplyOutcome, Coordinator, CoordinatorConfig, TriggerOutcome};
pub use context::ExecutionContext;
pub use error::{ActionError, ActionResult};
pub use handler::PipelineHandler;
pub use signal::{Signal, SignalOutcome};
