//! slipway-rollout — staged store rollouts.
//!
//! [`controller::RolloutController`] implements the manual verbs (start,
//! increase, pause, halt, resume, fully release). Every verb takes the
//! rollout's lock, re-reads persisted state under it, validates the status
//! transition, calls the store provider, and only then persists — so a stale
//! caller fails its precondition instead of clobbering a concurrent one.
//!
//! [`automatic::AutoRolloutEngine`] layers scheduling on top: a periodic
//! bulk sweep, fingerprinted per-rollout tick jobs, and a verification sweep
//! that re-arms rollouts whose tick went missing.

pub mod automatic;
pub mod controller;

pub use automatic::{AutoRolloutEngine, SweepStats, TickOutcome};
pub use controller::{RolloutController, RolloutError};
