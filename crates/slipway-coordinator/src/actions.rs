//! Caller-intent actions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use slipway_health::HealthGate;
use slipway_jobs::{Job, JobQueue};
use slipway_lock::LockManager;
use slipway_providers::{
    CiProvider, Notifier, ProviderError, StoreProvider, VcsProvider,
};
use slipway_retry::{BackoffPolicy, LinearBackoff, RetryContext, RetryDecision};
use slipway_rollout::RolloutController;
use slipway_state::machine::{
    PlatformRunEvent, PreProdEvent, ProductionReleaseEvent, ReleaseEvent, SubmissionEvent,
    WorkflowRunEvent,
};
use slipway_state::{
    epoch_secs, Build, BuildQueue, Platform, PreProdKind, PreProdRelease, PreProdStatus,
    ProductionRelease, ProductionReleaseStatus, Release, ReleasePlatformRun, ReleaseStatus,
    RolloutStatus, ScheduledOutcome, StateStore, StoreRollout, StoreSubmission, SubmissionStatus,
    WorkflowKind, WorkflowRun, WorkflowRunStatus,
};

use crate::context::ExecutionContext;
use crate::error::{ActionError, ActionResult};

/// Lock TTL for coordinator-held entity locks.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// Tunables for the pipeline; loaded from config by the daemon.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Stage percentages for new rollouts; last entry must be 100.
    pub rollout_stages: Vec<f64>,
    /// Whether new rollouts are driven by the automatic engine.
    pub automatic_rollouts: bool,
    /// Queued commits that force a build queue application.
    pub build_queue_threshold: usize,
    /// How often health is polled for an active production release.
    pub health_poll_frequency_secs: u64,
    /// Retry budget for store submission attempts; linearly spaced.
    pub submission_retry: LinearBackoff,
    /// Channel all pipeline notifications go to.
    pub notify_channel: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rollout_stages: vec![1.0, 10.0, 50.0, 100.0],
            automatic_rollouts: true,
            build_queue_threshold: 5,
            health_poll_frequency_secs: 30 * 60,
            submission_retry: LinearBackoff::new(
                3,
                Duration::from_secs(60),
                Duration::from_secs(300),
            ),
            notify_channel: "releases".to_string(),
        }
    }
}

/// Result of applying a build queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new workflow run was triggered for the queued commits.
    Applied { workflow_run_id: String },
    /// The queue or its release was no longer in a committable state.
    Skipped { reason: String },
}

/// Result of one trigger-submissions attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Submitted { submission_id: String },
    /// Transient failure; the caller re-enqueues with this context.
    RetryScheduled { after: Duration, context: RetryContext },
    /// Budget spent or permanent failure; the release leg was marked failed.
    LegFailed { reason: String },
    /// The workflow run is not in a state submissions can come from.
    Skipped { reason: String },
}

/// The pipeline's action surface.
///
/// Every action re-validates current entity state before mutating, so a
/// caller acting on a stale read gets a precondition error instead of
/// corrupting the pipeline.
#[derive(Clone)]
pub struct Coordinator {
    state: StateStore,
    vcs: Arc<dyn VcsProvider>,
    ci: Arc<dyn CiProvider>,
    store: Arc<dyn StoreProvider>,
    notifier: Arc<dyn Notifier>,
    locks: LockManager,
    queue: JobQueue,
    rollouts: RolloutController,
    gate: HealthGate,
    config: CoordinatorConfig,
    lock_policy: BackoffPolicy,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateStore,
        vcs: Arc<dyn VcsProvider>,
        ci: Arc<dyn CiProvider>,
        store: Arc<dyn StoreProvider>,
        notifier: Arc<dyn Notifier>,
        locks: LockManager,
        queue: JobQueue,
        config: CoordinatorConfig,
    ) -> Self {
        let rollouts = RolloutController::new(
            state.clone(),
            store.clone(),
            notifier.clone(),
            locks.clone(),
        )
        .with_notify_channel(config.notify_channel.clone());
        let gate = HealthGate::new(state.clone());
        Self {
            state,
            vcs,
            ci,
            store,
            notifier,
            locks,
            queue,
            rollouts,
            gate,
            config,
            lock_policy: BackoffPolicy::new(3, Duration::from_secs(2)).with_jitter(),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn rollout_controller(&self) -> &RolloutController {
        &self.rollouts
    }

    pub(crate) fn gate(&self) -> &HealthGate {
        &self.gate
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub(crate) fn ci_provider(&self) -> &Arc<dyn CiProvider> {
        &self.ci
    }

    pub(crate) fn new_id(prefix: &str) -> String {
        format!("{prefix}-{}-{:04x}", epoch_secs(), fastrand::u16(..))
    }

    fn workflow_name(platform: Platform, kind: WorkflowKind) -> String {
        let suffix = match kind {
            WorkflowKind::Internal => "internal",
            WorkflowKind::Beta => "beta",
            WorkflowKind::ReleaseCandidate => "release-candidate",
        };
        format!("{platform}-{suffix}")
    }

    async fn notify(&self, message: String) {
        if let Err(err) = self.notifier.notify(&self.config.notify_channel, &message).await {
            warn!(%err, "notification failed");
        }
    }

    // ── Release kickoff ───────────────────────────────────────────

    /// Start a release train run: the release, one leg per platform, a
    /// build queue and an internal validation workflow for each leg.
    pub async fn start_release(
        &self,
        ctx: &ExecutionContext,
        train: &str,
        version: &str,
    ) -> ActionResult<Release> {
        for existing in self.state.list_releases()? {
            if existing.train == train && !existing.status.is_terminal() {
                return Err(ActionError::Precondition(format!(
                    "train {train} already has release {} in flight",
                    existing.id
                )));
            }
        }

        let branch = format!("release/{version}");
        let head = self.vcs.head_commit(&branch).await?;
        let now = epoch_secs();

        let mut release = Release {
            id: Self::new_id("rel"),
            train: train.to_string(),
            version: version.to_string(),
            status: ReleaseStatus::Created,
            head_commit: Some(head.clone()),
            created_at: now,
            updated_at: now,
        };
        release.status = release.status.transition(ReleaseEvent::Start)?;
        self.state.put_release(&release)?;

        for platform in [Platform::Android, Platform::Ios] {
            let mut run = ReleasePlatformRun {
                id: Self::new_id("run"),
                release_id: release.id.clone(),
                platform,
                status: slipway_state::PlatformRunStatus::Created,
                created_at: now,
                updated_at: now,
            };
            run.status = run.status.transition(PlatformRunEvent::Start)?;
            self.state.put_platform_run(&run)?;

            self.state.put_build_queue(&BuildQueue {
                id: Self::new_id("bq"),
                platform_run_id: run.id.clone(),
                commit_shas: Vec::new(),
                active: true,
                applied_at: None,
                created_at: now,
            })?;

            let workflow = self
                .create_workflow_run(&run.id, WorkflowKind::Internal, &head)
                .await?;
            self.state.put_pre_prod_release(&PreProdRelease {
                id: Self::new_id("pre"),
                platform_run_id: run.id.clone(),
                kind: PreProdKind::Internal,
                status: PreProdStatus::Triggered,
                workflow_run_id: Some(workflow.id.clone()),
                build_id: None,
                created_at: now,
                updated_at: now,
            })?;
        }

        info!(caller = %ctx, release_id = %release.id, train, version, "release started");
        self.notify(format!("release {version} started for train {train}"))
            .await;
        Ok(release)
    }

    /// Create and trigger a workflow run for a platform leg.
    pub(crate) async fn create_workflow_run(
        &self,
        platform_run_id: &str,
        kind: WorkflowKind,
        commit_sha: &str,
    ) -> ActionResult<WorkflowRun> {
        let now = epoch_secs();
        let run = WorkflowRun {
            id: Self::new_id("wf"),
            platform_run_id: platform_run_id.to_string(),
            kind,
            commit_sha: commit_sha.to_string(),
            ci_ref: None,
            status: WorkflowRunStatus::Created,
            created_at: now,
            updated_at: now,
        };
        self.state.put_workflow_run(&run)?;
        self.trigger_workflow_run(&run.id).await
    }

    /// Call the CI provider for a created workflow run.
    pub async fn trigger_workflow_run(&self, workflow_run_id: &str) -> ActionResult<WorkflowRun> {
        let mut run = self.state.require_workflow_run(workflow_run_id)?;
        run.status = run.status.transition(WorkflowRunEvent::BeginTrigger)?;
        run.updated_at = epoch_secs();
        self.state.put_workflow_run(&run)?;

        let platform_run = self.state.require_platform_run(&run.platform_run_id)?;
        let name = Self::workflow_name(platform_run.platform, run.kind);

        match self.ci.trigger_workflow(&name, &run.commit_sha).await {
            Ok(ci_ref) => {
                run.status = run.status.transition(WorkflowRunEvent::Triggered)?;
                run.ci_ref = Some(ci_ref);
                run.updated_at = epoch_secs();
                self.state.put_workflow_run(&run)?;
                info!(workflow_run_id, workflow = %name, "workflow triggered");
                Ok(run)
            }
            Err(err) => {
                run.status = run.status.transition(WorkflowRunEvent::MarkUnavailable)?;
                run.updated_at = epoch_secs();
                self.state.put_workflow_run(&run)?;
                warn!(workflow_run_id, workflow = %name, %err, "CI trigger failed");
                Err(err.into())
            }
        }
    }

    // ── Build queues ──────────────────────────────────────────────

    /// Apply a build queue: one new internal workflow for its head commit.
    ///
    /// Skips (not errors) when the queue or its release can no longer take
    /// commits; an apply job racing a release stop must be a no-op.
    pub async fn apply_build_queue(&self, build_queue_id: &str) -> ActionResult<ApplyOutcome> {
        let lock_name = format!("build-queue:{build_queue_id}");
        self.locks
            .with_lock(&lock_name, LOCK_TTL, &self.lock_policy, || async move {
                let Some(mut queue) = self.state.get_build_queue(build_queue_id)? else {
                    return Err(ActionError::NotFound(format!("build queue {build_queue_id}")));
                };
                if !queue.active {
                    return Ok(ApplyOutcome::Skipped {
                        reason: "queue inactive".to_string(),
                    });
                }
                let Some(head) = queue.commit_shas.last().cloned() else {
                    return Ok(ApplyOutcome::Skipped {
                        reason: "queue empty".to_string(),
                    });
                };

                let platform_run = self.state.require_platform_run(&queue.platform_run_id)?;
                if platform_run.status != slipway_state::PlatformRunStatus::OnTrack {
                    return Ok(ApplyOutcome::Skipped {
                        reason: format!("platform run is {:?}", platform_run.status),
                    });
                }
                let release = self.state.require_release(&platform_run.release_id)?;
                if release.status.is_terminal() {
                    return Ok(ApplyOutcome::Skipped {
                        reason: format!("release is {:?}", release.status),
                    });
                }

                let workflow = self
                    .create_workflow_run(&platform_run.id, WorkflowKind::Internal, &head)
                    .await?;
                self.attach_workflow_to_internal_pre_prod(&platform_run.id, &workflow.id)?;

                queue.commit_shas.clear();
                queue.applied_at = Some(epoch_secs());
                self.state.put_build_queue(&queue)?;

                info!(build_queue_id, workflow_run_id = %workflow.id, head = %head, "build queue applied");
                Ok(ApplyOutcome::Applied {
                    workflow_run_id: workflow.id,
                })
            })
            .await?
    }

    /// Point the leg's live internal pre-prod release at a new workflow,
    /// creating one if every previous internal pre-prod is terminal.
    fn attach_workflow_to_internal_pre_prod(
        &self,
        platform_run_id: &str,
        workflow_run_id: &str,
    ) -> ActionResult<()> {
        let now = epoch_secs();
        let existing = self
            .state
            .list_pre_prod_for_run(platform_run_id)?
            .into_iter()
            .find(|p| p.kind == PreProdKind::Internal && !p.status.is_terminal());

        match existing {
            Some(mut pre_prod) => {
                if pre_prod.status == PreProdStatus::Created {
                    pre_prod.status = pre_prod.status.transition(PreProdEvent::Trigger)?;
                }
                pre_prod.workflow_run_id = Some(workflow_run_id.to_string());
                pre_prod.updated_at = now;
                self.state.put_pre_prod_release(&pre_prod)?;
            }
            None => {
                self.state.put_pre_prod_release(&PreProdRelease {
                    id: Self::new_id("pre"),
                    platform_run_id: platform_run_id.to_string(),
                    kind: PreProdKind::Internal,
                    status: PreProdStatus::Triggered,
                    workflow_run_id: Some(workflow_run_id.to_string()),
                    build_id: None,
                    created_at: now,
                    updated_at: now,
                })?;
            }
        }
        Ok(())
    }

    // ── Store submissions ─────────────────────────────────────────

    /// Create and submit the store submission for a finished
    /// release-candidate workflow run.
    ///
    /// Transient store failures consume the retry budget carried in
    /// `context`; once spent (or on a permanent failure) the owning release
    /// leg is marked failed and no further attempt is made.
    pub async fn trigger_submissions(
        &self,
        workflow_run_id: &str,
        context: RetryContext,
    ) -> ActionResult<TriggerOutcome> {
        let run = self.state.require_workflow_run(workflow_run_id)?;
        if run.status != WorkflowRunStatus::Finished {
            return Ok(TriggerOutcome::Skipped {
                reason: format!("workflow run is {:?}", run.status),
            });
        }
        if run.kind != WorkflowKind::ReleaseCandidate {
            return Ok(TriggerOutcome::Skipped {
                reason: "not a release candidate run".to_string(),
            });
        }
        let Some(build) = self.state.find_build_for_workflow(workflow_run_id)? else {
            return Err(ActionError::NotFound(format!(
                "build for workflow run {workflow_run_id}"
            )));
        };

        let production = self.ensure_production_release(&run.platform_run_id, &build)?;
        let mut submission = match self.ensure_submission(&production, &build)? {
            Some(submission) => submission,
            // A previous delivery already got this build past preparation.
            None => {
                return Ok(TriggerOutcome::Skipped {
                    reason: "build already submitted".to_string(),
                })
            }
        };

        match self.store.submit_for_review(build.build_number).await {
            Ok(()) => {
                submission.status = submission.status.transition(SubmissionEvent::SubmitForReview)?;
                submission.updated_at = epoch_secs();
                self.state.put_submission(&submission)?;
                info!(
                    submission_id = %submission.id,
                    build_number = build.build_number,
                    "submitted for store review"
                );
                self.notify(format!(
                    "build {} submitted for store review",
                    build.build_number
                ))
                .await;
                Ok(TriggerOutcome::Submitted {
                    submission_id: submission.id,
                })
            }
            Err(err @ ProviderError::Permanent(_)) => {
                let reason = err.to_string();
                self.fail_release_leg(&run.platform_run_id, &mut submission, &reason)
                    .await?;
                Ok(TriggerOutcome::LegFailed { reason })
            }
            Err(err) => {
                let context = context.record_failure(err.to_string());
                match self.config.submission_retry.next_attempt(context) {
                    RetryDecision::Retry { after, context } => {
                        info!(
                            workflow_run_id,
                            retry_count = context.retry_count,
                            after_secs = after.as_secs(),
                            "store submission failed, retry scheduled"
                        );
                        Ok(TriggerOutcome::RetryScheduled { after, context })
                    }
                    RetryDecision::Exhausted { context } => {
                        let reason = context
                            .original_error
                            .clone()
                            .unwrap_or_else(|| "store submission failed".to_string());
                        warn!(
                            workflow_run_id,
                            retry_count = context.retry_count,
                            correlation_id = %context.correlation_id,
                            original_error = %reason,
                            "store submission retries exhausted"
                        );
                        self.fail_release_leg(&run.platform_run_id, &mut submission, &reason)
                            .await?;
                        Ok(TriggerOutcome::LegFailed { reason })
                    }
                }
            }
        }
    }

    fn ensure_production_release(
        &self,
        platform_run_id: &str,
        build: &Build,
    ) -> ActionResult<ProductionRelease> {
        if let Some(existing) = self
            .state
            .list_production_for_run(platform_run_id)?
            .into_iter()
            .find(|p| !p.status.is_terminal())
        {
            return Ok(existing);
        }
        let now = epoch_secs();
        let production = ProductionRelease {
            id: Self::new_id("prod"),
            platform_run_id: platform_run_id.to_string(),
            build_id: build.id.clone(),
            status: ProductionReleaseStatus::Inflight,
            created_at: now,
            updated_at: now,
        };
        self.state.put_production_release(&production)?;
        Ok(production)
    }

    /// Reuse the submission a previous attempt created, or create one.
    /// `None` means the build already has a submission past preparation.
    fn ensure_submission(
        &self,
        production: &ProductionRelease,
        build: &Build,
    ) -> ActionResult<Option<StoreSubmission>> {
        if let Some(existing) = self
            .state
            .list_submissions_for_production(&production.id)?
            .into_iter()
            .find(|s| s.build_id == build.id)
        {
            if existing.status == SubmissionStatus::Preparing {
                return Ok(Some(existing));
            }
            return Ok(None);
        }
        let now = epoch_secs();
        let mut submission = StoreSubmission {
            id: Self::new_id("sub"),
            production_release_id: production.id.clone(),
            build_id: build.id.clone(),
            status: SubmissionStatus::Created,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        submission.status = submission.status.transition(SubmissionEvent::Prepare)?;
        self.state.put_submission(&submission)?;
        Ok(Some(submission))
    }

    /// Terminal submission failure: stop the leg, record why, tell people.
    async fn fail_release_leg(
        &self,
        platform_run_id: &str,
        submission: &mut StoreSubmission,
        reason: &str,
    ) -> ActionResult<()> {
        submission.failure_reason = Some(reason.to_string());
        submission.updated_at = epoch_secs();
        self.state.put_submission(submission)?;

        let mut platform_run = self.state.require_platform_run(platform_run_id)?;
        if !platform_run.status.is_terminal() {
            platform_run.status = platform_run.status.transition(PlatformRunEvent::Stop)?;
            platform_run.updated_at = epoch_secs();
            self.state.put_platform_run(&platform_run)?;
        }

        let mut release = self.state.require_release(&platform_run.release_id)?;
        if !release.status.is_terminal() {
            release.status = release.status.transition(ReleaseEvent::PlatformFinished)?;
            release.updated_at = epoch_secs();
            self.state.put_release(&release)?;
        }

        warn!(platform_run_id, reason, "release leg failed");
        self.notify(format!(
            "{} release leg failed: {reason}",
            platform_run.platform
        ))
        .await;
        Ok(())
    }

    /// Record a store review approval: the submission is approved and its
    /// staged rollout is created, ready for the engine (or a caller) to
    /// start. Health polling for the production release begins now.
    pub async fn approve_submission(
        &self,
        ctx: &ExecutionContext,
        submission_id: &str,
    ) -> ActionResult<StoreRollout> {
        let mut submission = self
            .state
            .find_submission(submission_id)?
            .ok_or_else(|| ActionError::NotFound(format!("submission {submission_id}")))?;
        submission.status = submission.status.transition(SubmissionEvent::Approve)?;
        submission.updated_at = epoch_secs();
        self.state.put_submission(&submission)?;

        let now = epoch_secs();
        let rollout = StoreRollout {
            id: Self::new_id("rollout"),
            submission_id: submission.id.clone(),
            stages: self.config.rollout_stages.clone(),
            current_stage: None,
            status: RolloutStatus::Created,
            automatic: self.config.automatic_rollouts,
            automatic_next_update_at: None,
            automatic_updated_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.put_rollout(&rollout)?;

        self.queue.enqueue(Job::FetchHealthMetrics {
            production_release_id: submission.production_release_id.clone(),
            frequency_secs: self.config.health_poll_frequency_secs,
        });

        info!(caller = %ctx, submission_id, rollout_id = %rollout.id, "submission approved");
        self.notify(format!("submission {submission_id} approved by the store"))
            .await;
        Ok(rollout)
    }

    /// Record a store review rejection.
    pub async fn reject_submission(
        &self,
        ctx: &ExecutionContext,
        submission_id: &str,
        reason: &str,
    ) -> ActionResult<StoreSubmission> {
        let mut submission = self
            .state
            .find_submission(submission_id)?
            .ok_or_else(|| ActionError::NotFound(format!("submission {submission_id}")))?;
        submission.status = submission.status.transition(SubmissionEvent::FailReview)?;
        submission.failure_reason = Some(reason.to_string());
        submission.updated_at = epoch_secs();
        self.state.put_submission(&submission)?;

        info!(caller = %ctx, submission_id, reason, "submission rejected");
        self.notify(format!("submission {submission_id} rejected: {reason}"))
            .await;
        Ok(submission)
    }

    /// Re-submit after a review failure.
    pub async fn retry_submission(
        &self,
        ctx: &ExecutionContext,
        submission_id: &str,
    ) -> ActionResult<StoreSubmission> {
        let mut submission = self
            .state
            .find_submission(submission_id)?
            .ok_or_else(|| ActionError::NotFound(format!("submission {submission_id}")))?;
        submission.status = submission.status.transition(SubmissionEvent::Retry)?;

        let build = self
            .state
            .get_build(&submission.build_id)?
            .ok_or_else(|| ActionError::NotFound(format!("build {}", submission.build_id)))?;
        self.store.submit_for_review(build.build_number).await?;

        submission.status = submission.status.transition(SubmissionEvent::SubmitForReview)?;
        submission.failure_reason = None;
        submission.updated_at = epoch_secs();
        self.state.put_submission(&submission)?;

        info!(caller = %ctx, submission_id, "submission resubmitted for review");
        Ok(submission)
    }

    // ── Rollout verbs ─────────────────────────────────────────────

    pub async fn start_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "start rollout");
        let rollout = self.rollouts.start(rollout_id).await?;
        self.reconcile_rollout(rollout_id).await?;
        Ok(rollout)
    }

    pub async fn increase_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "increase rollout");
        let rollout = self.rollouts.increase(rollout_id).await?;
        self.reconcile_rollout(rollout_id).await?;
        Ok(rollout)
    }

    pub async fn pause_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "pause rollout");
        Ok(self.rollouts.pause(rollout_id).await?)
    }

    pub async fn halt_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "halt rollout");
        Ok(self.rollouts.halt(rollout_id).await?)
    }

    pub async fn resume_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "resume rollout");
        Ok(self.rollouts.resume(rollout_id).await?)
    }

    pub async fn fully_release_rollout(
        &self,
        ctx: &ExecutionContext,
        rollout_id: &str,
    ) -> ActionResult<StoreRollout> {
        info!(caller = %ctx, rollout_id, "fully release rollout");
        let rollout = self.rollouts.fully_release(rollout_id).await?;
        self.reconcile_rollout(rollout_id).await?;
        Ok(rollout)
    }

    /// Align the owning production release (and above it, the platform leg
    /// and release) with the rollout's current status. Idempotent; called
    /// after every operation that may have moved the rollout.
    pub async fn reconcile_rollout(&self, rollout_id: &str) -> ActionResult<()> {
        let rollout = self.state.require_rollout(rollout_id)?;
        let Some(submission) = self.state.find_submission(&rollout.submission_id)? else {
            return Err(ActionError::NotFound(format!(
                "submission {}",
                rollout.submission_id
            )));
        };
        let Some(mut production) = self
            .state
            .find_production_release(&submission.production_release_id)?
        else {
            return Err(ActionError::NotFound(format!(
                "production release {}",
                submission.production_release_id
            )));
        };

        match rollout.status {
            RolloutStatus::Started if production.status == ProductionReleaseStatus::Inflight => {
                production.status = production
                    .status
                    .transition(ProductionReleaseEvent::RolloutStarted)?;
                production.updated_at = epoch_secs();
                self.state.put_production_release(&production)?;
            }
            RolloutStatus::Completed | RolloutStatus::FullyReleased
                if production.status == ProductionReleaseStatus::Active =>
            {
                production.status = production.status.transition(ProductionReleaseEvent::Finish)?;
                production.updated_at = epoch_secs();
                self.state.put_production_release(&production)?;
                self.finish_release_leg(&production.platform_run_id, &submission).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Production finished: close the submission and the platform leg; when
    /// it was the last open leg, schedule release finalization.
    async fn finish_release_leg(
        &self,
        platform_run_id: &str,
        submission: &StoreSubmission,
    ) -> ActionResult<()> {
        let mut submission = submission.clone();
        if submission.status == SubmissionStatus::Approved {
            submission.status = submission.status.transition(SubmissionEvent::Finish)?;
            submission.updated_at = epoch_secs();
            self.state.put_submission(&submission)?;
        }

        let mut platform_run = self.state.require_platform_run(platform_run_id)?;
        if !platform_run.status.is_terminal() {
            platform_run.status = platform_run.status.transition(PlatformRunEvent::Finish)?;
            platform_run.updated_at = epoch_secs();
            self.state.put_platform_run(&platform_run)?;
        }

        let mut release = self.state.require_release(&platform_run.release_id)?;
        if !release.status.is_terminal() {
            release.status = release.status.transition(ReleaseEvent::PlatformFinished)?;
            release.updated_at = epoch_secs();
            self.state.put_release(&release)?;
        }

        let runs = self.state.list_platform_runs_for_release(&release.id)?;
        if runs.iter().all(|r| r.status.is_terminal()) {
            self.queue.enqueue(Job::FinalizeRelease {
                release_id: release.id.clone(),
                force: false,
            });
        }
        Ok(())
    }

    // ── Release finalization ──────────────────────────────────────

    /// Close out a release whose platform legs are all terminal.
    pub async fn finalize_release(
        &self,
        ctx: &ExecutionContext,
        release_id: &str,
        force: bool,
    ) -> ActionResult<Release> {
        let mut release = self.state.require_release(release_id)?;
        let runs = self.state.list_platform_runs_for_release(release_id)?;
        if !force && runs.iter().any(|r| !r.status.is_terminal()) {
            return Err(ActionError::Precondition(format!(
                "release {release_id} still has open platform runs"
            )));
        }

        release.status = release.status.transition(ReleaseEvent::Finalize)?;
        release.updated_at = epoch_secs();
        self.state.put_release(&release)?;

        // Tagging is best effort; a missing tag never blocks finalization.
        if let Some(head) = &release.head_commit {
            let tag = format!("v{}", release.version);
            if let Err(err) = self.vcs.create_tag(&tag, head).await {
                warn!(release_id, tag = %tag, %err, "release tag failed");
            }
        }

        info!(caller = %ctx, release_id, version = %release.version, "release finalized");
        self.notify(format!("release {} finalized", release.version)).await;
        Ok(release)
    }

    /// Stop a release and everything still open under it.
    pub async fn stop_release(
        &self,
        ctx: &ExecutionContext,
        release_id: &str,
    ) -> ActionResult<Release> {
        let mut release = self.state.require_release(release_id)?;
        release.status = release.status.transition(ReleaseEvent::Stop)?;
        release.updated_at = epoch_secs();
        self.state.put_release(&release)?;

        for mut run in self.state.list_platform_runs_for_release(release_id)? {
            if run.status.is_terminal() {
                continue;
            }
            run.status = run.status.transition(PlatformRunEvent::Stop)?;
            run.updated_at = epoch_secs();
            self.state.put_platform_run(&run)?;

            for mut pre_prod in self.state.list_pre_prod_for_run(&run.id)? {
                if !pre_prod.status.is_terminal() {
                    pre_prod.status = pre_prod.status.transition(PreProdEvent::Stop)?;
                    pre_prod.updated_at = epoch_secs();
                    self.state.put_pre_prod_release(&pre_prod)?;
                }
            }
            for mut workflow in self.state.list_workflow_runs_for_run(&run.id)? {
                if workflow.status.is_active() {
                    workflow.status = workflow.status.transition(WorkflowRunEvent::Cancel)?;
                    workflow.updated_at = epoch_secs();
                    self.state.put_workflow_run(&workflow)?;
                }
            }
            for mut production in self.state.list_production_for_run(&run.id)? {
                if !production.status.is_terminal() {
                    production.status = production.status.transition(ProductionReleaseEvent::Stop)?;
                    production.updated_at = epoch_secs();
                    self.state.put_production_release(&production)?;
                }
            }
        }

        info!(caller = %ctx, release_id, "release stopped");
        self.notify(format!("release {} stopped", release.version)).await;
        Ok(release)
    }

    // ── Scheduled releases ────────────────────────────────────────

    /// Kick off every due scheduled release. Each records exactly one
    /// outcome: the created release id, or the failure reason.
    pub async fn kickoff_due_scheduled(&self, ctx: &ExecutionContext) -> ActionResult<u32> {
        let mut kicked = 0u32;
        for mut scheduled in self.state.list_due_scheduled_releases(epoch_secs())? {
            match self.start_release(ctx, &scheduled.train, &scheduled.version).await {
                Ok(release) => {
                    scheduled.outcome = ScheduledOutcome::Created {
                        release_id: release.id,
                    };
                    kicked += 1;
                }
                Err(err) => {
                    warn!(scheduled_id = %scheduled.id, %err, "scheduled kickoff failed");
                    scheduled.outcome = ScheduledOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            }
            self.state.put_scheduled_release(&scheduled)?;
        }
        Ok(kicked)
    }
}
