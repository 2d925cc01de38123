//! In-memory provider implementations.
//!
//! Used by tests across the workspace and by `slipwayd`'s standalone mode.
//! Each fake records the calls it receives and can be primed to fail the
//! next N calls with a transient error, which is how retry paths are
//! exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ProviderError, ProviderResult};
use crate::traits::*;

fn take_failure(budget: &AtomicU32, what: &str) -> ProviderResult<()> {
    // Decrement-if-positive: each primed failure is consumed exactly once.
    let mut current = budget.load(Ordering::SeqCst);
    while current > 0 {
        match budget.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Err(ProviderError::Transient(format!("{what}: injected failure"))),
            Err(actual) => current = actual,
        }
    }
    Ok(())
}

// ── Store ─────────────────────────────────────────────────────────

/// A store rollout call as recorded by [`FakeStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    SubmitForReview { build_number: u64 },
    StartRollout { rollout_ref: String, percentage: f64 },
    SetRolloutStage { rollout_ref: String, percentage: f64 },
    HaltRollout { rollout_ref: String },
    ResumeRollout { rollout_ref: String, percentage: f64 },
    CompleteRollout { rollout_ref: String },
}

/// In-memory store provider.
#[derive(Default)]
pub struct FakeStore {
    calls: Mutex<Vec<StoreCall>>,
    fail_next: AtomicU32,
    health: Mutex<HashMap<String, HealthVerdict>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` mutating calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Prime the health verdict returned for a release reference.
    pub fn set_health(&self, release_ref: &str, verdict: HealthVerdict) {
        self.health
            .lock()
            .expect("health poisoned")
            .insert(release_ref.to_string(), verdict);
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    fn record(&self, call: StoreCall) -> ProviderResult<()> {
        take_failure(&self.fail_next, "store")?;
        self.calls.lock().expect("calls poisoned").push(call);
        Ok(())
    }
}

#[async_trait]
impl StoreProvider for FakeStore {
    async fn submit_for_review(&self, build_number: u64) -> ProviderResult<()> {
        self.record(StoreCall::SubmitForReview { build_number })
    }

    async fn start_rollout(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()> {
        self.record(StoreCall::StartRollout {
            rollout_ref: rollout_ref.to_string(),
            percentage,
        })
    }

    async fn set_rollout_stage(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()> {
        self.record(StoreCall::SetRolloutStage {
            rollout_ref: rollout_ref.to_string(),
            percentage,
        })
    }

    async fn halt_rollout(&self, rollout_ref: &str) -> ProviderResult<()> {
        self.record(StoreCall::HaltRollout {
            rollout_ref: rollout_ref.to_string(),
        })
    }

    async fn resume_rollout(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()> {
        self.record(StoreCall::ResumeRollout {
            rollout_ref: rollout_ref.to_string(),
            percentage,
        })
    }

    async fn complete_rollout(&self, rollout_ref: &str) -> ProviderResult<()> {
        self.record(StoreCall::CompleteRollout {
            rollout_ref: rollout_ref.to_string(),
        })
    }

    async fn release_health(&self, release_ref: &str) -> ProviderResult<HealthVerdict> {
        take_failure(&self.fail_next, "store")?;
        Ok(self
            .health
            .lock()
            .expect("health poisoned")
            .get(release_ref)
            .copied()
            .unwrap_or(HealthVerdict::Unknown))
    }
}

// ── CI ────────────────────────────────────────────────────────────

/// In-memory CI provider.
#[derive(Default)]
pub struct FakeCi {
    fail_next: AtomicU32,
    statuses: Mutex<HashMap<String, CiRunStatus>>,
    artifacts: Mutex<HashMap<String, ArtifactInfo>>,
    triggered: Mutex<Vec<(String, String)>>,
    next_run: AtomicU32,
}

impl FakeCi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_status(&self, ci_ref: &str, status: CiRunStatus) {
        self.statuses
            .lock()
            .expect("statuses poisoned")
            .insert(ci_ref.to_string(), status);
    }

    pub fn set_artifact(&self, ci_ref: &str, artifact: ArtifactInfo) {
        self.artifacts
            .lock()
            .expect("artifacts poisoned")
            .insert(ci_ref.to_string(), artifact);
    }

    /// `(workflow, commit_sha)` pairs triggered so far.
    pub fn triggered(&self) -> Vec<(String, String)> {
        self.triggered.lock().expect("triggered poisoned").clone()
    }
}

#[async_trait]
impl CiProvider for FakeCi {
    async fn trigger_workflow(&self, workflow: &str, commit_sha: &str) -> ProviderResult<String> {
        take_failure(&self.fail_next, "ci")?;
        self.triggered
            .lock()
            .expect("triggered poisoned")
            .push((workflow.to_string(), commit_sha.to_string()));
        let n = self.next_run.fetch_add(1, Ordering::SeqCst);
        let ci_ref = format!("ci-run-{n}");
        self.set_status(&ci_ref, CiRunStatus::Queued);
        Ok(ci_ref)
    }

    async fn workflow_run_status(&self, ci_ref: &str) -> ProviderResult<CiRunStatus> {
        take_failure(&self.fail_next, "ci")?;
        self.statuses
            .lock()
            .expect("statuses poisoned")
            .get(ci_ref)
            .copied()
            .ok_or_else(|| ProviderError::Permanent(format!("unknown run {ci_ref}")))
    }

    async fn fetch_artifact(&self, ci_ref: &str) -> ProviderResult<ArtifactInfo> {
        take_failure(&self.fail_next, "ci")?;
        self.artifacts
            .lock()
            .expect("artifacts poisoned")
            .get(ci_ref)
            .cloned()
            .ok_or_else(|| ProviderError::Permanent(format!("no artifact for {ci_ref}")))
    }
}

// ── VCS ───────────────────────────────────────────────────────────

/// In-memory VCS provider.
#[derive(Default)]
pub struct FakeVcs {
    fail_next: AtomicU32,
    heads: Mutex<HashMap<String, String>>,
    tags: Mutex<Vec<(String, String)>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_head(&self, branch: &str, sha: &str) {
        self.heads
            .lock()
            .expect("heads poisoned")
            .insert(branch.to_string(), sha.to_string());
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags.lock().expect("tags poisoned").clone()
    }
}

#[async_trait]
impl VcsProvider for FakeVcs {
    async fn head_commit(&self, branch: &str) -> ProviderResult<String> {
        take_failure(&self.fail_next, "vcs")?;
        self.heads
            .lock()
            .expect("heads poisoned")
            .get(branch)
            .cloned()
            .ok_or_else(|| ProviderError::Permanent(format!("unknown branch {branch}")))
    }

    async fn create_tag(&self, name: &str, sha: &str) -> ProviderResult<()> {
        take_failure(&self.fail_next, "vcs")?;
        self.tags
            .lock()
            .expect("tags poisoned")
            .push((name.to_string(), sha.to_string()));
        Ok(())
    }

    async fn commits_between(&self, _base: &str, head: &str) -> ProviderResult<Vec<String>> {
        take_failure(&self.fail_next, "vcs")?;
        Ok(vec![head.to_string()])
    }
}

// ── Notifier ──────────────────────────────────────────────────────

/// In-memory notifier; collects `(channel, message)` pairs.
#[derive(Default)]
pub struct FakeNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("messages poisoned").clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, channel: &str, message: &str) -> ProviderResult<()> {
        self.messages
            .lock()
            .expect("messages poisoned")
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}
