//! Domain types for the Slipway state store.
//!
//! These types represent the persisted state of one release train run: the
//! release itself, its per-platform legs, pre-production and production
//! stages, CI workflow runs and their builds, store submissions, staged
//! rollouts, and health events. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a release train run.
pub type ReleaseId = String;

/// Unique identifier for a per-platform leg of a release.
pub type PlatformRunId = String;

/// Unique identifier for a CI workflow run.
pub type WorkflowRunId = String;

/// Unique identifier for a store rollout.
pub type RolloutId = String;

// ── Release ───────────────────────────────────────────────────────

/// One end-to-end trip of an app version through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: ReleaseId,
    /// The release train this run belongs to.
    pub train: String,
    /// Version under release (e.g. "1.14.0").
    pub version: String,
    pub status: ReleaseStatus,
    /// Head commit of the release branch, used for signal relevance checks.
    pub head_commit: Option<String>,
    /// Unix timestamp (seconds) when this release was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

/// Lifecycle status of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Created,
    OnTrack,
    PartiallyFinished,
    Finished,
    Stopped,
}

// ── Platform run ──────────────────────────────────────────────────

/// Target OS platform for a release leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
        }
    }
}

/// The per-platform leg of a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleasePlatformRun {
    pub id: PlatformRunId,
    pub release_id: ReleaseId,
    pub platform: Platform,
    pub status: PlatformRunStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a platform run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRunStatus {
    Created,
    OnTrack,
    Finished,
    Stopped,
}

// ── Pre-production release ────────────────────────────────────────

/// Validation stage kind preceding production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreProdKind {
    Internal,
    Beta,
}

/// Internal or beta validation stage of a platform run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreProdRelease {
    pub id: String,
    pub platform_run_id: PlatformRunId,
    pub kind: PreProdKind,
    pub status: PreProdStatus,
    /// The workflow run producing this stage's build, once triggered.
    pub workflow_run_id: Option<WorkflowRunId>,
    pub build_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a pre-production release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreProdStatus {
    Created,
    Triggered,
    Finished,
    Failed,
    Stopped,
}

// ── Production release ────────────────────────────────────────────

/// The production stage of a platform run; owns the store submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionRelease {
    pub id: String,
    pub platform_run_id: PlatformRunId,
    pub build_id: String,
    pub status: ProductionReleaseStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a production release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionReleaseStatus {
    Inflight,
    Active,
    Finished,
    Stopped,
}

// ── Workflow run ──────────────────────────────────────────────────

/// What a workflow run is building for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Internal,
    Beta,
    ReleaseCandidate,
}

/// A CI build trigger tied to a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub platform_run_id: PlatformRunId,
    pub kind: WorkflowKind,
    pub commit_sha: String,
    /// The CI provider's run identifier, once triggered.
    pub ci_ref: Option<String>,
    pub status: WorkflowRunStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Created,
    Triggering,
    Triggered,
    Started,
    Finished,
    Failed,
    Halted,
    Unavailable,
    Cancelled,
}

// ── Build ─────────────────────────────────────────────────────────

/// Immutable artifact descriptor produced by a finished workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub id: String,
    pub workflow_run_id: WorkflowRunId,
    pub version_name: String,
    pub build_number: u64,
    pub artifact_url: Option<String>,
    /// Unix timestamp (seconds) when the artifact was produced.
    pub generated_at: u64,
}

// ── Build queue ───────────────────────────────────────────────────

/// Accumulates landed commits for a platform run until a threshold applies
/// them as one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildQueue {
    pub id: String,
    pub platform_run_id: PlatformRunId,
    pub commit_shas: Vec<String>,
    /// An inactive queue is never applied.
    pub active: bool,
    pub applied_at: Option<u64>,
    pub created_at: u64,
}

// ── Store submission ──────────────────────────────────────────────

/// The store-review/publish request for a build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSubmission {
    pub id: String,
    pub production_release_id: String,
    pub build_id: String,
    pub status: SubmissionStatus,
    pub failure_reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a store submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Created,
    Preparing,
    SubmittedForReview,
    Approved,
    ReviewFailed,
    Finished,
}

// ── Store rollout ─────────────────────────────────────────────────

/// A staged percentage-based release to end users via a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRollout {
    pub id: RolloutId,
    pub submission_id: String,
    /// Ordered ascending stage percentages; the last entry is 100.0.
    pub stages: Vec<f64>,
    /// Index into `stages`; `None` until the rollout is started. Only ever
    /// moves forward.
    pub current_stage: Option<usize>,
    pub status: RolloutStatus,
    /// Whether the automatic rollout engine drives this rollout.
    pub automatic: bool,
    /// When the next automatic increase is due (unix seconds).
    pub automatic_next_update_at: Option<u64>,
    /// When the automatic engine last advanced this rollout (unix seconds).
    pub automatic_updated_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a store rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Created,
    Started,
    Paused,
    Halted,
    Completed,
    FullyReleased,
    Failed,
}

impl StoreRollout {
    /// Percentage of users currently covered, if started.
    ///
    /// `None` for a stage index out of range of `stages`; the store is the
    /// source of both fields and this accessor stays total over whatever it
    /// returns.
    pub fn current_percentage(&self) -> Option<f64> {
        self.current_stage.and_then(|i| self.stages.get(i).copied())
    }

    /// Index of the final (100%) stage.
    pub fn last_stage_index(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }

    /// The next stage strictly after the current one, or `None` when the
    /// rollout is already at the last stage (or not started).
    pub fn next_stage(&self) -> Option<(usize, f64)> {
        let next = self.current_stage? + 1;
        self.stages.get(next).map(|pct| (next, *pct))
    }

    /// Staleness token for re-enqueued automatic increase jobs.
    ///
    /// `None` unless both the schedule timestamp and the stage are set.
    pub fn fingerprint(&self) -> Option<RolloutFingerprint> {
        Some(RolloutFingerprint {
            next_update_at: self.automatic_next_update_at?,
            stage: self.current_stage?,
        })
    }

    /// Whether a fingerprint captured at schedule time still matches.
    pub fn fingerprint_matches(&self, expected: &RolloutFingerprint) -> bool {
        self.fingerprint().as_ref() == Some(expected)
    }
}

/// Snapshot token detecting staleness of re-entrant rollout jobs.
///
/// Captured when an automatic increase is scheduled; compared for equality
/// when the job runs. A mismatch means a pause/resume cycle or manual action
/// happened in between, and the job must no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutFingerprint {
    pub next_update_at: u64,
    pub stage: usize,
}

// ── Health events ─────────────────────────────────────────────────

/// A point-in-time health verdict for a production release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseHealthEvent {
    pub id: String,
    pub production_release_id: String,
    pub healthy: bool,
    /// Whether an automated action (e.g. a halt) was already triggered for
    /// this event. Prevents double-action on redelivered events.
    pub action_triggered: bool,
    /// Unix timestamp (seconds) of the verdict.
    pub occurred_at: u64,
}

// ── Scheduled release ─────────────────────────────────────────────

/// A future release kickoff intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledRelease {
    pub id: String,
    pub train: String,
    /// Version the kickoff will release.
    pub version: String,
    /// When the kickoff is due (unix seconds).
    pub scheduled_at: u64,
    pub outcome: ScheduledOutcome,
}

/// Terminal outcome of a scheduled release: success or failure, never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledOutcome {
    Pending,
    Created { release_id: ReleaseId },
    Failed { reason: String },
}

// ── Table keys ────────────────────────────────────────────────────

impl ReleasePlatformRun {
    /// Composite key for the platform runs table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.release_id, self.id)
    }
}

impl PreProdRelease {
    /// Composite key for the pre-prod releases table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.platform_run_id, self.id)
    }
}

impl ProductionRelease {
    /// Composite key for the production releases table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.platform_run_id, self.id)
    }
}

impl StoreSubmission {
    /// Composite key for the submissions table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.production_release_id, self.id)
    }
}

impl ReleaseHealthEvent {
    /// Composite key for the health events table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.production_release_id, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollout(stages: Vec<f64>, current: Option<usize>) -> StoreRollout {
        StoreRollout {
            id: "rollout-1".to_string(),
            submission_id: "sub-1".to_string(),
            stages,
            current_stage: current,
            status: RolloutStatus::Started,
            automatic: true,
            automatic_next_update_at: Some(2000),
            automatic_updated_at: Some(1000),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn next_stage_walks_forward() {
        let r = rollout(vec![1.0, 10.0, 50.0, 100.0], Some(0));
        assert_eq!(r.next_stage(), Some((1, 10.0)));
        assert_eq!(r.current_percentage(), Some(1.0));
    }

    #[test]
    fn next_stage_none_at_last() {
        let r = rollout(vec![1.0, 10.0, 50.0, 100.0], Some(3));
        assert_eq!(r.next_stage(), None);
    }

    #[test]
    fn next_stage_none_before_start() {
        let r = rollout(vec![1.0, 100.0], None);
        assert_eq!(r.next_stage(), None);
    }

    #[test]
    fn out_of_range_stage_has_no_percentage() {
        let r = rollout(vec![1.0, 100.0], Some(5));
        assert_eq!(r.current_percentage(), None);
        assert_eq!(r.next_stage(), None);
    }

    #[test]
    fn fingerprint_round_trip() {
        let r = rollout(vec![1.0, 10.0, 100.0], Some(1));
        let fp = r.fingerprint().unwrap();
        assert_eq!(
            fp,
            RolloutFingerprint {
                next_update_at: 2000,
                stage: 1
            }
        );
        assert!(r.fingerprint_matches(&fp));

        // A stage advance invalidates the old token.
        let mut advanced = r.clone();
        advanced.current_stage = Some(2);
        assert!(!advanced.fingerprint_matches(&fp));

        // So does a reschedule.
        let mut rescheduled = r;
        rescheduled.automatic_next_update_at = Some(3000);
        assert!(!rescheduled.fingerprint_matches(&fp));
    }

    #[test]
    fn fingerprint_requires_started_schedule() {
        let mut r = rollout(vec![1.0, 100.0], None);
        assert_eq!(r.fingerprint(), None);
        r.current_stage = Some(0);
        r.automatic_next_update_at = None;
        assert_eq!(r.fingerprint(), None);
    }
}
