//! Shared assembly and entity builders for coordinator tests.

use std::sync::Arc;
use std::time::Duration;

use slipway_jobs::{job_queue, JobRunner};
use slipway_lock::LockManager;
use slipway_providers::{FakeCi, FakeNotifier, FakeStore, FakeVcs};
use slipway_retry::LinearBackoff;
use slipway_state::*;

use crate::actions::{Coordinator, CoordinatorConfig};

pub(crate) struct Fixture {
    pub coordinator: Coordinator,
    pub state: StateStore,
    pub vcs: Arc<FakeVcs>,
    pub ci: Arc<FakeCi>,
    pub store: Arc<FakeStore>,
    pub notifier: Arc<FakeNotifier>,
    pub runner: JobRunner,
}

pub(crate) fn fixture() -> Fixture {
    let state = StateStore::open_in_memory().unwrap();
    let vcs = Arc::new(FakeVcs::new());
    let ci = Arc::new(FakeCi::new());
    let store = Arc::new(FakeStore::new());
    let notifier = Arc::new(FakeNotifier::new());
    let (queue, runner) = job_queue();
    let config = CoordinatorConfig {
        build_queue_threshold: 2,
        submission_retry: LinearBackoff::new(3, Duration::from_secs(2), Duration::from_secs(8)),
        health_poll_frequency_secs: 60,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(
        state.clone(),
        vcs.clone(),
        ci.clone(),
        store.clone(),
        notifier.clone(),
        LockManager::new(),
        queue,
        config,
    );
    Fixture {
        coordinator,
        state,
        vcs,
        ci,
        store,
        notifier,
        runner,
    }
}

pub(crate) fn release(id: &str, status: ReleaseStatus) -> Release {
    Release {
        id: id.to_string(),
        train: "nightly".to_string(),
        version: "1.14.0".to_string(),
        status,
        head_commit: Some("abc123".to_string()),
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn platform_run(id: &str, release_id: &str, status: PlatformRunStatus) -> ReleasePlatformRun {
    ReleasePlatformRun {
        id: id.to_string(),
        release_id: release_id.to_string(),
        platform: Platform::Android,
        status,
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn workflow_run(
    id: &str,
    platform_run_id: &str,
    kind: WorkflowKind,
    status: WorkflowRunStatus,
) -> WorkflowRun {
    WorkflowRun {
        id: id.to_string(),
        platform_run_id: platform_run_id.to_string(),
        kind,
        commit_sha: "abc123".to_string(),
        ci_ref: Some("ci-run-0".to_string()),
        status,
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn build(id: &str, workflow_run_id: &str, build_number: u64) -> Build {
    Build {
        id: id.to_string(),
        workflow_run_id: workflow_run_id.to_string(),
        version_name: "1.14.0".to_string(),
        build_number,
        artifact_url: Some("https://ci.example/app.aab".to_string()),
        generated_at: 1000,
    }
}

pub(crate) fn build_queue(id: &str, platform_run_id: &str, shas: &[&str]) -> BuildQueue {
    BuildQueue {
        id: id.to_string(),
        platform_run_id: platform_run_id.to_string(),
        commit_shas: shas.iter().map(|s| s.to_string()).collect(),
        active: true,
        applied_at: None,
        created_at: 1000,
    }
}

pub(crate) fn pre_prod(
    id: &str,
    platform_run_id: &str,
    kind: PreProdKind,
    status: PreProdStatus,
    workflow_run_id: Option<&str>,
) -> PreProdRelease {
    PreProdRelease {
        id: id.to_string(),
        platform_run_id: platform_run_id.to_string(),
        kind,
        status,
        workflow_run_id: workflow_run_id.map(|s| s.to_string()),
        build_id: None,
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn production(id: &str, platform_run_id: &str, status: ProductionReleaseStatus) -> ProductionRelease {
    ProductionRelease {
        id: id.to_string(),
        platform_run_id: platform_run_id.to_string(),
        build_id: "build-1".to_string(),
        status,
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn submission(
    id: &str,
    production_release_id: &str,
    build_id: &str,
    status: SubmissionStatus,
) -> StoreSubmission {
    StoreSubmission {
        id: id.to_string(),
        production_release_id: production_release_id.to_string(),
        build_id: build_id.to_string(),
        status,
        failure_reason: None,
        created_at: 1000,
        updated_at: 1000,
    }
}

pub(crate) fn rollout(
    id: &str,
    submission_id: &str,
    status: RolloutStatus,
    current_stage: Option<usize>,
) -> StoreRollout {
    StoreRollout {
        id: id.to_string(),
        submission_id: submission_id.to_string(),
        stages: vec![1.0, 10.0, 50.0, 100.0],
        current_stage,
        status,
        automatic: false,
        automatic_next_update_at: None,
        automatic_updated_at: None,
        created_at: 1000,
        updated_at: 1000,
    }
}
