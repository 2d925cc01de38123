//! Job queue dispatch into the coordinator, engine, and poller.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use slipway_health::{HealthPoller, PollOutcome};
use slipway_jobs::{Job, JobHandler, JobOutcome};
use slipway_rollout::{AutoRolloutEngine, RolloutError, TickOutcome};

use crate::actions::{Coordinator, TriggerOutcome};
use crate::context::ExecutionContext;
use crate::error::ActionError;
use crate::signal::Signal;

/// Routes each job payload to the subsystem that services it.
///
/// Fatal errors become [`JobOutcome::Failed`] (logged by the runner); only
/// `TriggerSubmissions` maps its own retry decision back onto the queue.
pub struct PipelineHandler {
    coordinator: Coordinator,
    engine: AutoRolloutEngine,
    poller: HealthPoller,
}

impl PipelineHandler {
    pub fn new(coordinator: Coordinator, engine: AutoRolloutEngine, poller: HealthPoller) -> Self {
        Self {
            coordinator,
            engine,
            poller,
        }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn run(&self, job: Job) -> JobOutcome {
        let ctx = ExecutionContext::system();
        match job {
            Job::ApplyBuildQueue { build_queue_id } => {
                match self.coordinator.apply_build_queue(&build_queue_id).await {
                    Ok(outcome) => {
                        debug!(build_queue_id, ?outcome, "build queue job serviced");
                        JobOutcome::Done
                    }
                    Err(err) => JobOutcome::Failed {
                        reason: err.to_string(),
                    },
                }
            }

            Job::TriggerSubmissions {
                workflow_run_id,
                context,
            } => {
                match self
                    .coordinator
                    .trigger_submissions(&workflow_run_id, context)
                    .await
                {
                    Ok(TriggerOutcome::RetryScheduled { after, context }) => JobOutcome::Retry {
                        job: Job::TriggerSubmissions {
                            workflow_run_id,
                            context,
                        },
                        after,
                    },
                    Ok(_) => JobOutcome::Done,
                    Err(err) => JobOutcome::Failed {
                        reason: err.to_string(),
                    },
                }
            }

            Job::IncreaseRollout {
                rollout_id,
                expected,
            } => match self.engine.run_tick(&rollout_id, expected).await {
                Ok(outcome) => {
                    if matches!(outcome, TickOutcome::Advanced | TickOutcome::Completed) {
                        if let Err(err) = self.coordinator.reconcile_rollout(&rollout_id).await {
                            warn!(rollout_id, %err, "rollout reconcile failed");
                        }
                    }
                    JobOutcome::Done
                }
                // Another actor holds this rollout; try again once it
                // settles. A by-then-stale tick no-ops.
                Err(RolloutError::Lock(_)) => JobOutcome::Retry {
                    job: Job::IncreaseRollout {
                        rollout_id,
                        expected,
                    },
                    after: Duration::from_secs(30),
                },
                Err(err) => JobOutcome::Failed {
                    reason: err.to_string(),
                },
            },

            Job::FetchHealthMetrics {
                production_release_id,
                frequency_secs,
            } => match self.poller.tick(&production_release_id, frequency_secs).await {
                Ok(PollOutcome::Recorded(event)) if !event.healthy => {
                    let signal = Signal::HealthEventReceived {
                        production_release_id,
                        event_id: event.id,
                    };
                    if let Err(err) = self.coordinator.handle_signal(&ctx, signal).await {
                        warn!(%err, "health event signal failed");
                    }
                    JobOutcome::Done
                }
                Ok(_) => JobOutcome::Done,
                Err(err) => JobOutcome::Failed {
                    reason: err.to_string(),
                },
            },

            Job::FinalizeRelease { release_id, force } => {
                match self.coordinator.finalize_release(&ctx, &release_id, force).await {
                    Ok(_) => JobOutcome::Done,
                    // Not ready yet: a later leg completion re-enqueues this.
                    Err(ActionError::Precondition(reason)) => {
                        debug!(release_id, reason, "finalize skipped");
                        JobOutcome::Done
                    }
                    Err(err) => JobOutcome::Failed {
                        reason: err.to_string(),
                    },
                }
            }
        }
    }
}
