//! Capability traits for the four external collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// Branch/tag/diff operations against the version control host.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    /// Current head commit sha of a branch.
    async fn head_commit(&self, branch: &str) -> ProviderResult<String>;

    /// Tag a commit.
    async fn create_tag(&self, name: &str, sha: &str) -> ProviderResult<()>;

    /// Commit shas in `head` that are not in `base`.
    async fn commits_between(&self, base: &str, head: &str) -> ProviderResult<Vec<String>>;
}

/// Status of a CI run as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiRunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Artifact metadata for a finished CI run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub url: String,
    pub build_number: u64,
}

/// Workflow trigger/status/artifact operations against the CI system.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Trigger a workflow for a commit; returns the provider's run reference.
    async fn trigger_workflow(&self, workflow: &str, commit_sha: &str) -> ProviderResult<String>;

    /// Status of a previously triggered run.
    async fn workflow_run_status(&self, ci_ref: &str) -> ProviderResult<CiRunStatus>;

    /// Artifact produced by a succeeded run.
    async fn fetch_artifact(&self, ci_ref: &str) -> ProviderResult<ArtifactInfo>;
}

/// Health verdict reported by the store's release dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
    /// The store has no data yet for this release.
    Unknown,
}

/// Review and staged-rollout operations against the app store.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Submit a build for store review.
    async fn submit_for_review(&self, build_number: u64) -> ProviderResult<()>;

    /// Begin serving the release to the first stage of users.
    async fn start_rollout(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()>;

    /// Move a live rollout to a higher user percentage.
    async fn set_rollout_stage(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()>;

    /// Stop serving the release to new users.
    async fn halt_rollout(&self, rollout_ref: &str) -> ProviderResult<()>;

    /// Resume a halted/paused rollout at the given percentage.
    async fn resume_rollout(&self, rollout_ref: &str, percentage: f64) -> ProviderResult<()>;

    /// Release to 100% of users, ending the staged rollout.
    async fn complete_rollout(&self, rollout_ref: &str) -> ProviderResult<()>;

    /// Latest release health as seen by the store.
    async fn release_health(&self, release_ref: &str) -> ProviderResult<HealthVerdict>;
}

/// Posts templated messages to a team channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> ProviderResult<()>;
}
