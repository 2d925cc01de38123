//! slipway-health — release health verdicts and the halt gate.
//!
//! Two pieces. The [`gate::HealthGate`] is the synchronous decision surface:
//! it records verdicts as [`slipway_state::ReleaseHealthEvent`] rows and
//! answers "may this rollout advance" and "should this event trigger a halt"
//! from persisted state, so decisions survive redelivered events and process
//! restarts. The [`poller::HealthPoller`] is the async side: it services
//! fetch-health jobs against the store provider and reschedules itself until
//! the release leaves its monitoring window.

pub mod gate;
pub mod poller;

pub use gate::HealthGate;
pub use poller::{HealthPoller, PollOutcome};
