//! External facts entering the pipeline.

use tracing::{info, warn};

use slipway_jobs::Job;
use slipway_retry::RetryContext;
use slipway_state::machine::{PreProdEvent, WorkflowRunEvent};
use slipway_state::{
    epoch_secs, Build, PreProdKind, PreProdRelease, PreProdStatus, RolloutStatus, WorkflowKind,
    WorkflowRunStatus,
};

use crate::actions::Coordinator;
use crate::context::ExecutionContext;
use crate::error::{ActionError, ActionResult};

/// A fact that already happened outside the coordinator.
///
/// Signals carry ids, not entities: the handler re-reads current state and
/// decides from it whether the fact is still relevant. Replaying a signal is
/// therefore harmless by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Commits landed on the release branch of a platform leg.
    CommitsLanded {
        platform_run_id: String,
        commit_shas: Vec<String>,
    },
    /// A build queue crossed its size threshold.
    BuildQueueThreshold { build_queue_id: String },
    /// CI reported a workflow run as finished (or failed).
    WorkflowRunFinished {
        workflow_run_id: String,
        succeeded: bool,
    },
    /// A pre-production validation stage was signed off.
    PreProdReleaseFinished { pre_prod_id: String },
    /// A health verdict was recorded for a production release.
    HealthEventReceived {
        production_release_id: String,
        event_id: String,
    },
}

/// What a signal handler did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Applied,
    /// The fact is no longer relevant; logged and dropped.
    Ignored { reason: String },
}

impl SignalOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        SignalOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

impl Coordinator {
    /// Dispatch one signal: at most one guarded transition plus one
    /// follow-on job. Irrelevant facts are ignored with a log line; a
    /// missing entity is an error (the caller's reference is wrong).
    pub async fn handle_signal(
        &self,
        ctx: &ExecutionContext,
        signal: Signal,
    ) -> ActionResult<SignalOutcome> {
        let outcome = match signal {
            Signal::CommitsLanded {
                platform_run_id,
                commit_shas,
            } => self.on_commits_landed(&platform_run_id, commit_shas).await?,
            Signal::BuildQueueThreshold { build_queue_id } => {
                self.on_build_queue_threshold(&build_queue_id).await?
            }
            Signal::WorkflowRunFinished {
                workflow_run_id,
                succeeded,
            } => {
                self.on_workflow_run_finished(ctx, &workflow_run_id, succeeded)
                    .await?
            }
            Signal::PreProdReleaseFinished { pre_prod_id } => {
                self.on_pre_prod_finished(&pre_prod_id).await?
            }
            Signal::HealthEventReceived {
                production_release_id,
                event_id,
            } => {
                self.on_health_event(&production_release_id, &event_id)
                    .await?
            }
        };
        if let SignalOutcome::Ignored { reason } = &outcome {
            info!(caller = %ctx, reason, "signal ignored");
        }
        Ok(outcome)
    }

    async fn on_commits_landed(
        &self,
        platform_run_id: &str,
        commit_shas: Vec<String>,
    ) -> ActionResult<SignalOutcome> {
        let platform_run = self.state().require_platform_run(platform_run_id)?;
        if platform_run.status.is_terminal() {
            return Ok(SignalOutcome::ignored("platform run already terminal"));
        }
        let Some(mut queue) = self.state().find_build_queue_for_run(platform_run_id)? else {
            return Err(ActionError::NotFound(format!(
                "build queue for platform run {platform_run_id}"
            )));
        };
        if !queue.active {
            return Ok(SignalOutcome::ignored("build queue inactive"));
        }

        for sha in commit_shas {
            if !queue.commit_shas.contains(&sha) {
                queue.commit_shas.push(sha);
            }
        }
        self.state().put_build_queue(&queue)?;

        if queue.commit_shas.len() >= self.config().build_queue_threshold {
            self.queue().enqueue(Job::ApplyBuildQueue {
                build_queue_id: queue.id.clone(),
            });
        }
        Ok(SignalOutcome::Applied)
    }

    async fn on_build_queue_threshold(&self, build_queue_id: &str) -> ActionResult<SignalOutcome> {
        let Some(queue) = self.state().get_build_queue(build_queue_id)? else {
            return Err(ActionError::NotFound(format!("build queue {build_queue_id}")));
        };
        if !queue.active {
            return Ok(SignalOutcome::ignored("build queue inactive"));
        }
        if queue.commit_shas.is_empty() {
            return Ok(SignalOutcome::ignored("build queue empty"));
        }
        self.queue().enqueue(Job::ApplyBuildQueue {
            build_queue_id: build_queue_id.to_string(),
        });
        Ok(SignalOutcome::Applied)
    }

    async fn on_workflow_run_finished(
        &self,
        ctx: &ExecutionContext,
        workflow_run_id: &str,
        succeeded: bool,
    ) -> ActionResult<SignalOutcome> {
        let mut run = self.state().require_workflow_run(workflow_run_id)?;
        if run.status.is_terminal() {
            return Ok(SignalOutcome::ignored("workflow run already terminal"));
        }

        if !succeeded {
            run.status = run.status.transition(WorkflowRunEvent::Fail)?;
            run.updated_at = epoch_secs();
            self.state().put_workflow_run(&run)?;
            warn!(workflow_run_id, "workflow run failed");
            return Ok(SignalOutcome::Applied);
        }

        // CI can report completion without ever reporting the start.
        if run.status == WorkflowRunStatus::Triggered {
            run.status = run.status.transition(WorkflowRunEvent::Started)?;
        }
        run.status = run.status.transition(WorkflowRunEvent::Finish)?;
        run.updated_at = epoch_secs();
        self.state().put_workflow_run(&run)?;

        let Some(ci_ref) = run.ci_ref.as_deref() else {
            return Err(ActionError::Precondition(format!(
                "workflow run {workflow_run_id} finished without a CI reference"
            )));
        };
        let artifact = self.ci_provider().fetch_artifact(ci_ref).await?;

        let platform_run = self.state().require_platform_run(&run.platform_run_id)?;
        let release = self.state().require_release(&platform_run.release_id)?;
        let build = Build {
            id: Self::new_id("build"),
            workflow_run_id: run.id.clone(),
            version_name: release.version.clone(),
            build_number: artifact.build_number,
            artifact_url: Some(artifact.url),
            generated_at: epoch_secs(),
        };
        self.state().put_build(&build)?;

        if let Some(mut pre_prod) = self.state().find_pre_prod_for_workflow(&run.id)? {
            pre_prod.build_id = Some(build.id.clone());
            pre_prod.updated_at = epoch_secs();
            self.state().put_pre_prod_release(&pre_prod)?;
        }

        if run.kind == WorkflowKind::ReleaseCandidate {
            self.queue().enqueue(Job::TriggerSubmissions {
                workflow_run_id: run.id.clone(),
                context: RetryContext::new(ctx.correlation_id.clone()),
            });
        }
        info!(workflow_run_id, build_id = %build.id, "workflow run finished");
        Ok(SignalOutcome::Applied)
    }

    async fn on_pre_prod_finished(&self, pre_prod_id: &str) -> ActionResult<SignalOutcome> {
        let mut pre_prod = self.state().require_pre_prod_release(pre_prod_id)?;
        if pre_prod.status.is_terminal() {
            return Ok(SignalOutcome::ignored("pre-prod release already terminal"));
        }
        pre_prod.status = pre_prod.status.transition(PreProdEvent::Finish)?;
        pre_prod.updated_at = epoch_secs();
        self.state().put_pre_prod_release(&pre_prod)?;

        // The next stage builds the same commit the finished stage verified.
        let commit = match pre_prod.workflow_run_id.as_deref() {
            Some(workflow_run_id) => {
                self.state()
                    .require_workflow_run(workflow_run_id)?
                    .commit_sha
            }
            None => {
                let platform_run = self.state().require_platform_run(&pre_prod.platform_run_id)?;
                let release = self.state().require_release(&platform_run.release_id)?;
                release.head_commit.ok_or_else(|| {
                    ActionError::Precondition(format!(
                        "no commit to build for pre-prod {pre_prod_id}"
                    ))
                })?
            }
        };

        match pre_prod.kind {
            PreProdKind::Internal => {
                let workflow = self
                    .create_workflow_run(&pre_prod.platform_run_id, WorkflowKind::Beta, &commit)
                    .await?;
                let now = epoch_secs();
                self.state().put_pre_prod_release(&PreProdRelease {
                    id: Self::new_id("pre"),
                    platform_run_id: pre_prod.platform_run_id.clone(),
                    kind: PreProdKind::Beta,
                    status: PreProdStatus::Triggered,
                    workflow_run_id: Some(workflow.id),
                    build_id: None,
                    created_at: now,
                    updated_at: now,
                })?;
            }
            PreProdKind::Beta => {
                self.create_workflow_run(
                    &pre_prod.platform_run_id,
                    WorkflowKind::ReleaseCandidate,
                    &commit,
                )
                .await?;
            }
        }
        info!(pre_prod_id, kind = ?pre_prod.kind, "pre-prod stage finished, next stage triggered");
        Ok(SignalOutcome::Applied)
    }

    async fn on_health_event(
        &self,
        production_release_id: &str,
        event_id: &str,
    ) -> ActionResult<SignalOutcome> {
        if !self.gate().claim_halt(production_release_id, event_id)? {
            return Ok(SignalOutcome::ignored("no halt action required"));
        }

        let rollout = self
            .state()
            .list_submissions_for_production(production_release_id)?
            .into_iter()
            .filter_map(|s| {
                self.state()
                    .find_rollout_for_submission(&s.id)
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .find(|r| r.status == RolloutStatus::Started);

        let Some(rollout) = rollout else {
            // The claim is burned; without a live rollout there is nothing
            // left to stop, which is the state a halt wants anyway.
            warn!(production_release_id, event_id, "unhealthy event with no live rollout");
            return Ok(SignalOutcome::ignored("no live rollout to halt"));
        };

        self.rollout_controller().halt(&rollout.id).await?;
        warn!(
            production_release_id,
            rollout_id = %rollout.id,
            event_id,
            "rollout halted on unhealthy release"
        );
        Ok(SignalOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Fixture};
    use slipway_providers::{ArtifactInfo, StoreCall};
    use slipway_state::{
        PlatformRunStatus, ProductionReleaseStatus, ReleaseHealthEvent, ReleaseStatus,
        RolloutStatus, SubmissionStatus,
    };

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test")
    }

    fn seed_leg(fx: &Fixture) {
        fx.state
            .put_release(&testutil::release("rel-1", ReleaseStatus::OnTrack))
            .unwrap();
        fx.state
            .put_platform_run(&testutil::platform_run("run-1", "rel-1", PlatformRunStatus::OnTrack))
            .unwrap();
    }

    fn seed_health_stack(fx: &Fixture, healthy: bool) -> ReleaseHealthEvent {
        seed_leg(fx);
        fx.state
            .put_production_release(&testutil::production(
                "prod-1",
                "run-1",
                ProductionReleaseStatus::Active,
            ))
            .unwrap();
        fx.state
            .put_submission(&testutil::submission(
                "sub-1",
                "prod-1",
                "build-1",
                SubmissionStatus::Approved,
            ))
            .unwrap();
        fx.state
            .put_rollout(&testutil::rollout("rollout-1", "sub-1", RolloutStatus::Started, Some(1)))
            .unwrap();
        let event = ReleaseHealthEvent {
            id: "he-1".to_string(),
            production_release_id: "prod-1".to_string(),
            healthy,
            action_triggered: false,
            occurred_at: 1000,
        };
        fx.state.put_health_event(&event).unwrap();
        event
    }

    #[tokio::test]
    async fn commits_accumulate_and_fire_at_the_threshold() {
        let mut fx = testutil::fixture();
        seed_leg(&fx);
        fx.state
            .put_build_queue(&testutil::build_queue("bq-1", "run-1", &[]))
            .unwrap();

        // One commit: below the threshold of two, nothing scheduled.
        fx.coordinator
            .handle_signal(
                &ctx(),
                Signal::CommitsLanded {
                    platform_run_id: "run-1".to_string(),
                    commit_shas: vec!["sha1".to_string()],
                },
            )
            .await
            .unwrap();

        // Redelivery plus one new commit: sha1 is not double-counted.
        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::CommitsLanded {
                    platform_run_id: "run-1".to_string(),
                    commit_shas: vec!["sha1".to_string(), "sha2".to_string()],
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, SignalOutcome::Applied);

        let queue = fx.state.get_build_queue("bq-1").unwrap().unwrap();
        assert_eq!(queue.commit_shas, vec!["sha1", "sha2"]);

        let job = tokio::time::timeout(std::time::Duration::from_secs(1), fx.runner.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            job,
            Job::ApplyBuildQueue {
                build_queue_id: "bq-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn commits_on_a_stopped_leg_are_ignored() {
        let fx = testutil::fixture();
        fx.state
            .put_platform_run(&testutil::platform_run("run-1", "rel-1", PlatformRunStatus::Stopped))
            .unwrap();

        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::CommitsLanded {
                    platform_run_id: "run-1".to_string(),
                    commit_shas: vec!["sha1".to_string()],
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn threshold_signal_on_an_empty_queue_is_ignored() {
        let fx = testutil::fixture();
        fx.state
            .put_build_queue(&testutil::build_queue("bq-1", "run-1", &[]))
            .unwrap();

        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::BuildQueueThreshold {
                    build_queue_id: "bq-1".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn finished_workflow_run_records_its_build() {
        let fx = testutil::fixture();
        seed_leg(&fx);
        fx.state
            .put_workflow_run(&testutil::workflow_run(
                "wf-1",
                "run-1",
                WorkflowKind::Internal,
                WorkflowRunStatus::Started,
            ))
            .unwrap();
        fx.state
            .put_pre_prod_release(&testutil::pre_prod(
                "pre-1",
                "run-1",
                PreProdKind::Internal,
                PreProdStatus::Triggered,
                Some("wf-1"),
            ))
            .unwrap();
        fx.ci.set_artifact(
            "ci-run-0",
            ArtifactInfo {
                url: "https://ci.example/app.aab".to_string(),
                build_number: 7,
            },
        );

        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::WorkflowRunFinished {
                    workflow_run_id: "wf-1".to_string(),
                    succeeded: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, SignalOutcome::Applied);

        let run = fx.state.require_workflow_run("wf-1").unwrap();
        assert_eq!(run.status, WorkflowRunStatus::Finished);

        let build = fx.state.find_build_for_workflow("wf-1").unwrap().unwrap();
        assert_eq!(build.build_number, 7);
        assert_eq!(build.version_name, "1.14.0");

        let pre_prod = fx.state.require_pre_prod_release("pre-1").unwrap();
        assert_eq!(pre_prod.build_id, Some(build.id));

        // Replay: the run is terminal now, nothing happens again.
        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::WorkflowRunFinished {
                    workflow_run_id: "wf-1".to_string(),
                    succeeded: true,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn failed_workflow_run_is_marked_without_a_build() {
        let fx = testutil::fixture();
        fx.state
            .put_workflow_run(&testutil::workflow_run(
                "wf-1",
                "run-1",
                WorkflowKind::Internal,
                WorkflowRunStatus::Started,
            ))
            .unwrap();

        fx.coordinator
            .handle_signal(
                &ctx(),
                Signal::WorkflowRunFinished {
                    workflow_run_id: "wf-1".to_string(),
                    succeeded: false,
                },
            )
            .await
            .unwrap();

        let run = fx.state.require_workflow_run("wf-1").unwrap();
        assert_eq!(run.status, WorkflowRunStatus::Failed);
        assert!(fx.state.find_build_for_workflow("wf-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn finished_release_candidate_run_schedules_submission() {
        let mut fx = testutil::fixture();
        seed_leg(&fx);
        fx.state
            .put_workflow_run(&testutil::workflow_run(
                "wf-1",
                "run-1",
                WorkflowKind::ReleaseCandidate,
                WorkflowRunStatus::Started,
            ))
            .unwrap();
        fx.ci.set_artifact(
            "ci-run-0",
            ArtifactInfo {
                url: "https://ci.example/app.aab".to_string(),
                build_number: 9,
            },
        );

        fx.coordinator
            .handle_signal(
                &ctx(),
                Signal::WorkflowRunFinished {
                    workflow_run_id: "wf-1".to_string(),
                    succeeded: true,
                },
            )
            .await
            .unwrap();

        let job = tokio::time::timeout(std::time::Duration::from_secs(1), fx.runner.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            job,
            Job::TriggerSubmissions { workflow_run_id, .. } if workflow_run_id == "wf-1"
        ));
    }

    #[tokio::test]
    async fn finished_internal_stage_triggers_the_beta_stage() {
        let fx = testutil::fixture();
        seed_leg(&fx);
        fx.state
            .put_workflow_run(&testutil::workflow_run(
                "wf-1",
                "run-1",
                WorkflowKind::Internal,
                WorkflowRunStatus::Finished,
            ))
            .unwrap();
        fx.state
            .put_pre_prod_release(&testutil::pre_prod(
                "pre-1",
                "run-1",
                PreProdKind::Internal,
                PreProdStatus::Triggered,
                Some("wf-1"),
            ))
            .unwrap();

        fx.coordinator
            .handle_signal(
                &ctx(),
                Signal::PreProdReleaseFinished {
                    pre_prod_id: "pre-1".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            fx.state.require_pre_prod_release("pre-1").unwrap().status,
            PreProdStatus::Finished
        );
        // The beta stage builds the commit the internal stage verified.
        assert_eq!(fx.ci.triggered(), vec![("android-beta".to_string(), "abc123".to_string())]);

        let beta = fx
            .state
            .list_pre_prod_for_run("run-1")
            .unwrap()
            .into_iter()
            .find(|p| p.kind == PreProdKind::Beta)
            .unwrap();
        assert_eq!(beta.status, PreProdStatus::Triggered);
        assert!(beta.workflow_run_id.is_some());
    }

    #[tokio::test]
    async fn finished_beta_stage_triggers_the_release_candidate_workflow() {
        let fx = testutil::fixture();
        seed_leg(&fx);
        fx.state
            .put_workflow_run(&testutil::workflow_run(
                "wf-2",
                "run-1",
                WorkflowKind::Beta,
                WorkflowRunStatus::Finished,
            ))
            .unwrap();
        fx.state
            .put_pre_prod_release(&testutil::pre_prod(
                "pre-2",
                "run-1",
                PreProdKind::Beta,
                PreProdStatus::Triggered,
                Some("wf-2"),
            ))
            .unwrap();

        fx.coordinator
            .handle_signal(
                &ctx(),
                Signal::PreProdReleaseFinished {
                    pre_prod_id: "pre-2".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            fx.ci.triggered(),
            vec![("android-release-candidate".to_string(), "abc123".to_string())]
        );
    }

    #[tokio::test]
    async fn redelivered_unhealthy_event_halts_exactly_once() {
        let fx = testutil::fixture();
        let event = seed_health_stack(&fx, false);

        let signal = Signal::HealthEventReceived {
            production_release_id: "prod-1".to_string(),
            event_id: event.id.clone(),
        };
        let first = fx.coordinator.handle_signal(&ctx(), signal.clone()).await.unwrap();
        assert_eq!(first, SignalOutcome::Applied);
        assert_eq!(
            fx.state.require_rollout("rollout-1").unwrap().status,
            RolloutStatus::Halted
        );

        let second = fx.coordinator.handle_signal(&ctx(), signal).await.unwrap();
        assert!(matches!(second, SignalOutcome::Ignored { .. }));

        let halts = fx
            .store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::HaltRollout { .. }))
            .count();
        assert_eq!(halts, 1);
    }

    #[tokio::test]
    async fn healthy_event_requires_no_action() {
        let fx = testutil::fixture();
        let event = seed_health_stack(&fx, true);

        let outcome = fx
            .coordinator
            .handle_signal(
                &ctx(),
                Signal::HealthEventReceived {
                    production_release_id: "prod-1".to_string(),
                    event_id: event.id,
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::Ignored { .. }));
        assert_eq!(
            fx.state.require_rollout("rollout-1").unwrap().status,
            RolloutStatus::Started
        );
        assert!(fx.store.calls().is_empty());
    }
}
