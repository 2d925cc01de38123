//! Job payloads.

use serde::{Deserialize, Serialize};

use slipway_retry::RetryContext;
use slipway_state::RolloutFingerprint;

/// One schedulable unit of pipeline work.
///
/// Payloads are the contract other code must honor when scheduling; they
/// carry ids and staleness tokens, never loaded entities, because arbitrary
/// time may pass between enqueue and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Apply queued commits to a release. No-op if the release is no longer
    /// committable or the queue is inactive.
    ApplyBuildQueue { build_queue_id: String },

    /// Create store submissions for a finished workflow run's build. On
    /// provider error, retries on the context's budget, then marks the
    /// owning release leg failed.
    TriggerSubmissions {
        workflow_run_id: String,
        context: RetryContext,
    },

    /// Advance an automatic rollout one stage. `expected` is the
    /// fingerprint captured at schedule time; a mismatch on execution means
    /// the job is stale and must no-op.
    IncreaseRollout {
        rollout_id: String,
        expected: Option<RolloutFingerprint>,
    },

    /// Poll release health and record a verdict; reschedules itself at
    /// `frequency_secs` until the release leaves monitoring.
    FetchHealthMetrics {
        production_release_id: String,
        frequency_secs: u64,
    },

    /// Close out a release once every platform run is terminal.
    FinalizeRelease { release_id: String, force: bool },
}

impl Job {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ApplyBuildQueue { .. } => "apply_build_queue",
            Job::TriggerSubmissions { .. } => "trigger_submissions",
            Job::IncreaseRollout { .. } => "increase_rollout",
            Job::FetchHealthMetrics { .. } => "fetch_health_metrics",
            Job::FinalizeRelease { .. } => "finalize_release",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_round_trip_as_json() {
        let jobs = vec![
            Job::ApplyBuildQueue {
                build_queue_id: "bq-1".to_string(),
            },
            Job::TriggerSubmissions {
                workflow_run_id: "wf-1".to_string(),
                context: RetryContext::new("corr-1"),
            },
            Job::IncreaseRollout {
                rollout_id: "rollout-1".to_string(),
                expected: Some(RolloutFingerprint {
                    next_update_at: 1234,
                    stage: 2,
                }),
            },
        ];

        for job in jobs {
            let json = serde_json::to_string(&job).unwrap();
            let back: Job = serde_json::from_str(&json).unwrap();
            assert_eq!(back, job);
        }
    }

    #[test]
    fn kind_names_are_stable() {
        let job = Job::FinalizeRelease {
            release_id: "rel-1".to_string(),
            force: false,
        };
        assert_eq!(job.kind(), "finalize_release");
    }
}
