//! Explicit transition tables for the pipeline state machines.
//!
//! Each status enum gets a closed `(state, event) → state` table. Invalid
//! transitions are a typed [`TransitionError`] returned to the caller; the
//! store never sees a status that did not come out of one of these tables.

use thiserror::Error;

use crate::types::{
    PlatformRunStatus, PreProdStatus, ProductionReleaseStatus, ReleaseStatus, RolloutStatus,
    SubmissionStatus, WorkflowRunStatus,
};

/// A state machine rejected an event for the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} cannot {event} from {from}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub event: String,
}

fn invalid(entity: &'static str, from: impl std::fmt::Debug, event: impl std::fmt::Debug) -> TransitionError {
    TransitionError {
        entity,
        from: format!("{from:?}"),
        event: format!("{event:?}"),
    }
}

// ── Release ───────────────────────────────────────────────────────

/// Events that move a release through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// The release branch is cut and platform runs are underway.
    Start,
    /// One platform run reached a terminal state while others have not.
    PlatformFinished,
    /// All platform runs are terminal; close the release.
    Finalize,
    /// Stop the release early.
    Stop,
}

impl ReleaseStatus {
    pub fn transition(self, event: ReleaseEvent) -> Result<ReleaseStatus, TransitionError> {
        use ReleaseEvent as E;
        use ReleaseStatus::*;
        match (self, event) {
            (Created, E::Start) => Ok(OnTrack),
            (OnTrack, E::PlatformFinished) => Ok(PartiallyFinished),
            (PartiallyFinished, E::PlatformFinished) => Ok(PartiallyFinished),
            (OnTrack | PartiallyFinished, E::Finalize) => Ok(Finished),
            (Created | OnTrack | PartiallyFinished, E::Stop) => Ok(Stopped),
            (from, event) => Err(invalid("release", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReleaseStatus::Finished | ReleaseStatus::Stopped)
    }
}

// ── Platform run ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformRunEvent {
    Start,
    Finish,
    Stop,
}

impl PlatformRunStatus {
    pub fn transition(self, event: PlatformRunEvent) -> Result<PlatformRunStatus, TransitionError> {
        use PlatformRunEvent as E;
        use PlatformRunStatus::*;
        match (self, event) {
            (Created, E::Start) => Ok(OnTrack),
            (OnTrack, E::Finish) => Ok(Finished),
            (Created | OnTrack, E::Stop) => Ok(Stopped),
            (from, event) => Err(invalid("platform run", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlatformRunStatus::Finished | PlatformRunStatus::Stopped)
    }
}

// ── Pre-production release ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreProdEvent {
    Trigger,
    Finish,
    Fail,
    Stop,
}

impl PreProdStatus {
    pub fn transition(self, event: PreProdEvent) -> Result<PreProdStatus, TransitionError> {
        use PreProdEvent as E;
        use PreProdStatus::*;
        match (self, event) {
            (Created, E::Trigger) => Ok(Triggered),
            (Triggered, E::Finish) => Ok(Finished),
            (Created | Triggered, E::Fail) => Ok(Failed),
            (Created | Triggered, E::Stop) => Ok(Stopped),
            (from, event) => Err(invalid("pre-prod release", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PreProdStatus::Finished | PreProdStatus::Failed | PreProdStatus::Stopped
        )
    }
}

// ── Production release ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionReleaseEvent {
    /// The store rollout started; users are receiving this build.
    RolloutStarted,
    Finish,
    Stop,
}

impl ProductionReleaseStatus {
    pub fn transition(
        self,
        event: ProductionReleaseEvent,
    ) -> Result<ProductionReleaseStatus, TransitionError> {
        use ProductionReleaseEvent as E;
        use ProductionReleaseStatus::*;
        match (self, event) {
            (Inflight, E::RolloutStarted) => Ok(Active),
            (Active, E::Finish) => Ok(Finished),
            (Inflight | Active, E::Stop) => Ok(Stopped),
            (from, event) => Err(invalid("production release", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProductionReleaseStatus::Finished | ProductionReleaseStatus::Stopped
        )
    }
}

// ── Workflow run ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowRunEvent {
    /// Begin calling the CI provider.
    BeginTrigger,
    /// The CI provider accepted the trigger.
    Triggered,
    /// CI reported the run as executing.
    Started,
    Finish,
    Fail,
    Halt,
    /// CI never picked the run up.
    MarkUnavailable,
    Cancel,
}

impl WorkflowRunStatus {
    pub fn transition(self, event: WorkflowRunEvent) -> Result<WorkflowRunStatus, TransitionError> {
        use WorkflowRunEvent as E;
        use WorkflowRunStatus::*;
        match (self, event) {
            (Created, E::BeginTrigger) => Ok(Triggering),
            (Triggering, E::Triggered) => Ok(Triggered),
            (Triggered, E::Started) => Ok(Started),
            (Started, E::Finish) => Ok(Finished),
            // CI can report failure before we ever saw it start.
            (Triggered | Started, E::Fail) => Ok(Failed),
            (Started, E::Halt) => Ok(Halted),
            (Created | Triggering | Triggered, E::MarkUnavailable) => Ok(Unavailable),
            (Created | Triggering | Triggered | Started, E::Cancel) => Ok(Cancelled),
            (from, event) => Err(invalid("workflow run", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowRunStatus::Finished
                | WorkflowRunStatus::Failed
                | WorkflowRunStatus::Halted
                | WorkflowRunStatus::Unavailable
                | WorkflowRunStatus::Cancelled
        )
    }

    /// Whether a signal about this run is still worth applying.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

// ── Store submission ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionEvent {
    Prepare,
    SubmitForReview,
    Approve,
    FailReview,
    Finish,
    /// Re-enter preparation after a review failure.
    Retry,
}

impl SubmissionStatus {
    pub fn transition(self, event: SubmissionEvent) -> Result<SubmissionStatus, TransitionError> {
        use SubmissionEvent as E;
        use SubmissionStatus::*;
        match (self, event) {
            (Created, E::Prepare) => Ok(Preparing),
            (Preparing, E::SubmitForReview) => Ok(SubmittedForReview),
            (SubmittedForReview, E::Approve) => Ok(Approved),
            (SubmittedForReview, E::FailReview) => Ok(ReviewFailed),
            (Approved, E::Finish) => Ok(Finished),
            (ReviewFailed, E::Retry) => Ok(Preparing),
            (from, event) => Err(invalid("store submission", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Finished)
    }
}

// ── Store rollout ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutEvent {
    Start,
    Pause,
    Resume,
    Halt,
    /// The final stage was reached through normal progression.
    Complete,
    /// Manual jump straight to 100%.
    FullyRelease,
    Fail,
}

impl RolloutStatus {
    pub fn transition(self, event: RolloutEvent) -> Result<RolloutStatus, TransitionError> {
        use RolloutEvent as E;
        use RolloutStatus::*;
        match (self, event) {
            (Created, E::Start) => Ok(Started),
            (Started, E::Pause) => Ok(Paused),
            (Paused | Halted, E::Resume) => Ok(Started),
            (Started, E::Halt) => Ok(Halted),
            (Started, E::Complete) => Ok(Completed),
            (Started, E::FullyRelease) => Ok(FullyReleased),
            (Created | Started | Paused | Halted, E::Fail) => Ok(Failed),
            (from, event) => Err(invalid("store rollout", from, event)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutStatus::Completed | RolloutStatus::FullyReleased | RolloutStatus::Failed
        )
    }
}
