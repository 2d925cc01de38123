//! Store health polling loop, driven by fetch-health jobs.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use slipway_jobs::{Job, JobQueue};
use slipway_providers::{HealthVerdict, StoreProvider};
use slipway_state::{epoch_secs, ProductionReleaseStatus, ReleaseHealthEvent, StateResult, StateStore};

use crate::gate::HealthGate;

/// How long after a production release finishes we keep watching its health.
pub const DEFAULT_MONITOR_WINDOW_SECS: u64 = 48 * 60 * 60;

/// Result of one poll.
#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    /// A verdict was recorded; the next poll is scheduled.
    Recorded(ReleaseHealthEvent),
    /// The store had no data (or errored); the next poll is scheduled.
    NoData,
    /// The release left its monitoring window; polling ends here.
    Stopped,
}

/// Services fetch-health jobs: asks the store for a verdict, persists it via
/// the gate, and re-enqueues itself at the job's frequency until the release
/// is stopped or has been finished for longer than the monitoring window.
pub struct HealthPoller {
    state: StateStore,
    store: Arc<dyn StoreProvider>,
    queue: JobQueue,
    gate: HealthGate,
    monitor_window_secs: u64,
}

impl HealthPoller {
    pub fn new(state: StateStore, store: Arc<dyn StoreProvider>, queue: JobQueue) -> Self {
        let gate = HealthGate::new(state.clone());
        Self {
            state,
            store,
            queue,
            gate,
            monitor_window_secs: DEFAULT_MONITOR_WINDOW_SECS,
        }
    }

    pub fn with_monitor_window(mut self, window: Duration) -> Self {
        self.monitor_window_secs = window.as_secs();
        self
    }

    /// Handle one fetch-health job.
    ///
    /// Store errors are logged and treated as "no data": one flaky poll must
    /// not end monitoring, the next scheduled poll will try again.
    pub async fn tick(
        &self,
        production_release_id: &str,
        frequency_secs: u64,
    ) -> StateResult<PollOutcome> {
        let Some(production) = self.state.find_production_release(production_release_id)? else {
            warn!(production_release_id, "health poll for unknown production release");
            return Ok(PollOutcome::Stopped);
        };

        match production.status {
            ProductionReleaseStatus::Stopped => {
                info!(production_release_id, "release stopped, ending health polling");
                return Ok(PollOutcome::Stopped);
            }
            ProductionReleaseStatus::Finished => {
                let window_end = production.updated_at + self.monitor_window_secs;
                if epoch_secs() > window_end {
                    info!(
                        production_release_id,
                        "monitoring window elapsed, ending health polling"
                    );
                    return Ok(PollOutcome::Stopped);
                }
            }
            ProductionReleaseStatus::Inflight | ProductionReleaseStatus::Active => {}
        }

        let outcome = match self.store.release_health(production_release_id).await {
            Ok(HealthVerdict::Healthy) => {
                PollOutcome::Recorded(self.gate.record_verdict(production_release_id, true)?)
            }
            Ok(HealthVerdict::Unhealthy) => {
                PollOutcome::Recorded(self.gate.record_verdict(production_release_id, false)?)
            }
            Ok(HealthVerdict::Unknown) => {
                debug!(production_release_id, "store has no health data yet");
                PollOutcome::NoData
            }
            Err(err) => {
                warn!(production_release_id, %err, "health poll failed");
                PollOutcome::NoData
            }
        };

        self.queue.enqueue_after(
            Job::FetchHealthMetrics {
                production_release_id: production_release_id.to_string(),
                frequency_secs,
            },
            Duration::from_secs(frequency_secs),
        );
        Ok(outcome)
    }
}
