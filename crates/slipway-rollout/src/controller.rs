//! Manual rollout verbs.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use slipway_lock::{LockError, LockManager};
use slipway_providers::{Notifier, ProviderError, StoreProvider};
use slipway_retry::BackoffPolicy;
use slipway_state::machine::RolloutEvent;
use slipway_state::{epoch_secs, StateError, StateStore, StoreRollout, TransitionError};

/// Lock TTL for one rollout operation; generous compared to a store call.
pub(crate) const LOCK_TTL: Duration = Duration::from_secs(30);

/// A rollout verb failed.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Executes rollout verbs against the store and persists the result.
///
/// Order inside each verb is fixed: lock, re-read, validate transition,
/// provider call, persist, notify. Validation failures leave both the store
/// and our state untouched; a provider failure leaves our state at the old
/// status so the verb can be retried.
#[derive(Clone)]
pub struct RolloutController {
    state: StateStore,
    store: Arc<dyn StoreProvider>,
    notifier: Arc<dyn Notifier>,
    // Shared with the automatic engine so its schedule writes serialize
    // against the manual verbs.
    pub(crate) locks: LockManager,
    pub(crate) lock_policy: BackoffPolicy,
    notify_channel: String,
}

impl RolloutController {
    pub fn new(
        state: StateStore,
        store: Arc<dyn StoreProvider>,
        notifier: Arc<dyn Notifier>,
        locks: LockManager,
    ) -> Self {
        Self {
            state,
            store,
            notifier,
            locks,
            lock_policy: BackoffPolicy::new(3, Duration::from_secs(2)).with_jitter(),
            notify_channel: "releases".to_string(),
        }
    }

    pub fn with_notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = channel.into();
        self
    }

    pub(crate) fn lock_name(rollout_id: &str) -> String {
        format!("rollout:{rollout_id}")
    }

    fn load(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.state
            .get_rollout(rollout_id)?
            .ok_or_else(|| RolloutError::NotFound(rollout_id.to_string()))
    }

    fn persist(&self, mut rollout: StoreRollout) -> Result<StoreRollout, RolloutError> {
        rollout.updated_at = epoch_secs();
        self.state.put_rollout(&rollout)?;
        Ok(rollout)
    }

    async fn notify(&self, message: String) {
        // Notification failures never fail the verb.
        if let Err(err) = self.notifier.notify(&self.notify_channel, &message).await {
            warn!(%err, "rollout notification failed");
        }
    }

    /// Start serving the first stage.
    pub async fn start(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                self.start_locked(rollout_id).await
            })
            .await?
    }

    /// Body of [`Self::start`]; the caller holds the rollout lock.
    pub(crate) async fn start_locked(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        let mut rollout = self.load(rollout_id)?;
        let next_status = rollout.status.transition(RolloutEvent::Start)?;
        let first_pct = rollout.stages.first().copied().unwrap_or(100.0);

        self.store.start_rollout(&rollout.id, first_pct).await?;
        rollout.status = next_status;
        rollout.current_stage = Some(0);
        let rollout = self.persist(rollout)?;

        info!(rollout_id, percentage = first_pct, "rollout started");
        self.notify(format!("rollout {rollout_id} started at {first_pct}%"))
            .await;
        Ok(rollout)
    }

    /// Advance one stage; at the last stage this completes the rollout.
    pub async fn increase(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        let advanced = self
            .locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                self.increase_locked(rollout_id, None).await
            })
            .await??;
        match advanced {
            Some(rollout) => Ok(rollout),
            // Unreachable without a fingerprint guard, but keep the verb total.
            None => Err(RolloutError::NotFound(rollout_id.to_string())),
        }
    }

    /// Body of [`Self::increase`] and of the automatic engine's tick; the
    /// caller holds the rollout lock.
    ///
    /// With `expected` set the advance happens only if the fingerprint still
    /// matches; `Ok(None)` means another actor moved the rollout since the
    /// caller's read, which the engine treats as a stale tick.
    pub(crate) async fn increase_locked(
        &self,
        rollout_id: &str,
        expected: Option<&slipway_state::RolloutFingerprint>,
    ) -> Result<Option<StoreRollout>, RolloutError> {
        let mut rollout = self.load(rollout_id)?;
        if let Some(expected) = expected {
            if !rollout.fingerprint_matches(expected) {
                debug!(rollout_id, "fingerprint moved while waiting for the lock");
                return Ok(None);
            }
        }

        // Only a live rollout advances; no machine event models a
        // same-status stage move, so check the status directly.
        if rollout.status != slipway_state::RolloutStatus::Started {
            return Err(TransitionError {
                entity: "rollout",
                from: format!("{:?}", rollout.status),
                event: "Increase".to_string(),
            }
            .into());
        }

        let Some((next_index, next_pct)) = rollout.next_stage() else {
            // Already serving 100%; there is nothing to advance to.
            return Err(TransitionError {
                entity: "rollout",
                from: "Started at final stage".to_string(),
                event: "Increase".to_string(),
            }
            .into());
        };

        // Advancing into the final value ends the staged rollout.
        if next_index == rollout.last_stage_index() {
            let next_status = rollout.status.transition(RolloutEvent::Complete)?;
            self.store.complete_rollout(&rollout.id).await?;
            rollout.status = next_status;
            rollout.current_stage = Some(next_index);
            rollout.automatic_next_update_at = None;
            let rollout = self.persist(rollout)?;
            info!(rollout_id, "rollout completed");
            self.notify(format!("rollout {rollout_id} completed at 100%")).await;
            return Ok(Some(rollout));
        }

        self.store.set_rollout_stage(&rollout.id, next_pct).await?;
        rollout.current_stage = Some(next_index);
        let rollout = self.persist(rollout)?;

        info!(rollout_id, stage = next_index, percentage = next_pct, "rollout increased");
        self.notify(format!("rollout {rollout_id} increased to {next_pct}%"))
            .await;
        Ok(Some(rollout))
    }

    /// Stop automatic advancement without touching the store.
    ///
    /// Users keep receiving the current stage; clearing the schedule
    /// invalidates any in-flight automatic tick's fingerprint.
    pub async fn pause(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                let mut rollout = self.load(rollout_id)?;
                let next_status = rollout.status.transition(RolloutEvent::Pause)?;

                rollout.status = next_status;
                rollout.automatic_next_update_at = None;
                let rollout = self.persist(rollout)?;

                info!(rollout_id, "rollout paused");
                self.notify(format!("rollout {rollout_id} paused")).await;
                Ok(rollout)
            })
            .await?
    }

    /// Stop serving the release to new users via the store.
    pub async fn halt(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                let mut rollout = self.load(rollout_id)?;
                let next_status = rollout.status.transition(RolloutEvent::Halt)?;

                self.store.halt_rollout(&rollout.id).await?;
                rollout.status = next_status;
                rollout.automatic_next_update_at = None;
                let rollout = self.persist(rollout)?;

                info!(rollout_id, "rollout halted");
                self.notify(format!("rollout {rollout_id} halted")).await;
                Ok(rollout)
            })
            .await?
    }

    /// Resume a paused or halted rollout at its current stage.
    pub async fn resume(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                let mut rollout = self.load(rollout_id)?;
                let was_halted = rollout.status == slipway_state::RolloutStatus::Halted;
                let next_status = rollout.status.transition(RolloutEvent::Resume)?;
                let pct = rollout.current_percentage().unwrap_or(0.0);

                // A halt touched the store, so resuming must too. A pause
                // was control-plane only.
                if was_halted {
                    self.store.resume_rollout(&rollout.id, pct).await?;
                }
                rollout.status = next_status;
                let rollout = self.persist(rollout)?;

                info!(rollout_id, percentage = pct, "rollout resumed");
                self.notify(format!("rollout {rollout_id} resumed at {pct}%")).await;
                Ok(rollout)
            })
            .await?
    }

    /// Skip remaining stages and release to 100% of users immediately.
    pub async fn fully_release(&self, rollout_id: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                let mut rollout = self.load(rollout_id)?;
                let next_status = rollout.status.transition(RolloutEvent::FullyRelease)?;

                self.store.complete_rollout(&rollout.id).await?;
                rollout.status = next_status;
                rollout.current_stage = Some(rollout.last_stage_index());
                rollout.automatic_next_update_at = None;
                let rollout = self.persist(rollout)?;

                info!(rollout_id, "rollout fully released");
                self.notify(format!("rollout {rollout_id} fully released")).await;
                Ok(rollout)
            })
            .await?
    }

    /// Mark the rollout failed; no store call, the state is authoritative.
    pub async fn fail(&self, rollout_id: &str, reason: &str) -> Result<StoreRollout, RolloutError> {
        self.locks
            .with_lock(&Self::lock_name(rollout_id), LOCK_TTL, &self.lock_policy, || async move {
                let mut rollout = self.load(rollout_id)?;
                let next_status = rollout.status.transition(RolloutEvent::Fail)?;

                rollout.status = next_status;
                rollout.automatic_next_update_at = None;
                let rollout = self.persist(rollout)?;

                warn!(rollout_id, reason, "rollout failed");
                self.notify(format!("rollout {rollout_id} failed: {reason}")).await;
                Ok(rollout)
            })
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_providers::{FakeNotifier, FakeStore, StoreCall};
    use slipway_state::RolloutStatus;

    fn rollout(status: RolloutStatus, current: Option<usize>) -> StoreRollout {
        StoreRollout {
            id: "rollout-1".to_string(),
            submission_id: "sub-1".to_string(),
            stages: vec![1.0, 10.0, 50.0, 100.0],
            current_stage: current,
            status,
            automatic: false,
            automatic_next_update_at: None,
            automatic_updated_at: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn setup(seed: StoreRollout) -> (RolloutController, StateStore, Arc<FakeStore>, Arc<FakeNotifier>) {
        let state = StateStore::open_in_memory().unwrap();
        state.put_rollout(&seed).unwrap();
        let store = Arc::new(FakeStore::new());
        let notifier = Arc::new(FakeNotifier::new());
        let controller = RolloutController::new(
            state.clone(),
            store.clone() as Arc<dyn StoreProvider>,
            notifier.clone() as Arc<dyn Notifier>,
            LockManager::new(),
        );
        (controller, state, store, notifier)
    }

    #[tokio::test]
    async fn start_serves_the_first_stage() {
        let (controller, state, store, notifier) = setup(rollout(RolloutStatus::Created, None));

        let started = controller.start("rollout-1").await.unwrap();
        assert_eq!(started.status, RolloutStatus::Started);
        assert_eq!(started.current_stage, Some(0));
        assert_eq!(
            store.calls(),
            vec![StoreCall::StartRollout {
                rollout_ref: "rollout-1".to_string(),
                percentage: 1.0
            }]
        );
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(0));
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn increase_only_ever_moves_forward() {
        let (controller, _state, store, _n) = setup(rollout(RolloutStatus::Started, Some(0)));

        let r = controller.increase("rollout-1").await.unwrap();
        assert_eq!(r.current_stage, Some(1));
        let r = controller.increase("rollout-1").await.unwrap();
        assert_eq!(r.current_stage, Some(2));

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::SetRolloutStage {
                    rollout_ref: "rollout-1".to_string(),
                    percentage: 10.0
                },
                StoreCall::SetRolloutStage {
                    rollout_ref: "rollout-1".to_string(),
                    percentage: 50.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn increase_into_the_final_value_completes() {
        let mut seed = rollout(RolloutStatus::Started, Some(2));
        seed.automatic_next_update_at = Some(9999);
        let (controller, _state, store, _n) = setup(seed);

        let r = controller.increase("rollout-1").await.unwrap();
        assert_eq!(r.status, RolloutStatus::Completed);
        assert_eq!(r.current_stage, Some(3));
        assert_eq!(r.automatic_next_update_at, None);
        // The advance to 100% is the completion call, not a stage set.
        assert_eq!(
            store.calls(),
            vec![StoreCall::CompleteRollout {
                rollout_ref: "rollout-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn increase_past_the_final_stage_is_an_error() {
        let (controller, _state, store, _n) = setup(rollout(RolloutStatus::Started, Some(3)));

        let err = controller.increase("rollout-1").await.unwrap_err();
        assert!(matches!(err, RolloutError::Transition(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn increase_rejects_non_started_rollouts() {
        let (controller, state, store, _n) = setup(rollout(RolloutStatus::Paused, Some(1)));

        let err = controller.increase("rollout-1").await.unwrap_err();
        assert!(matches!(err, RolloutError::Transition(_)));
        assert!(store.calls().is_empty());
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(1));
    }

    #[tokio::test]
    async fn pause_is_control_plane_only() {
        let mut seed = rollout(RolloutStatus::Started, Some(1));
        seed.automatic_next_update_at = Some(9999);
        let (controller, _state, store, _n) = setup(seed);

        let r = controller.pause("rollout-1").await.unwrap();
        assert_eq!(r.status, RolloutStatus::Paused);
        assert_eq!(r.automatic_next_update_at, None);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn resume_from_pause_skips_the_store() {
        let (controller, _state, store, _n) = setup(rollout(RolloutStatus::Paused, Some(1)));

        let r = controller.resume("rollout-1").await.unwrap();
        assert_eq!(r.status, RolloutStatus::Started);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn halt_and_resume_both_touch_the_store() {
        let (controller, _state, store, _n) = setup(rollout(RolloutStatus::Started, Some(1)));

        controller.halt("rollout-1").await.unwrap();
        let r = controller.resume("rollout-1").await.unwrap();
        assert_eq!(r.status, RolloutStatus::Started);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::HaltRollout {
                    rollout_ref: "rollout-1".to_string()
                },
                StoreCall::ResumeRollout {
                    rollout_ref: "rollout-1".to_string(),
                    percentage: 10.0
                },
            ]
        );
    }

    #[tokio::test]
    async fn fully_release_skips_remaining_stages() {
        let (controller, _state, store, _n) = setup(rollout(RolloutStatus::Started, Some(0)));

        let r = controller.fully_release("rollout-1").await.unwrap();
        assert_eq!(r.status, RolloutStatus::FullyReleased);
        assert_eq!(r.current_stage, Some(3));
        assert_eq!(
            store.calls(),
            vec![StoreCall::CompleteRollout {
                rollout_ref: "rollout-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn provider_failure_leaves_state_untouched() {
        let (controller, state, store, _n) = setup(rollout(RolloutStatus::Started, Some(0)));
        store.fail_next(1);

        let err = controller.increase("rollout-1").await.unwrap_err();
        assert!(matches!(err, RolloutError::Provider(_)));

        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.status, RolloutStatus::Started);
        assert_eq!(stored.current_stage, Some(0));
    }

    #[tokio::test]
    async fn fail_marks_the_rollout_without_a_store_call() {
        let (controller, _state, store, notifier) = setup(rollout(RolloutStatus::Started, Some(1)));

        let r = controller.fail("rollout-1", "submission rejected").await.unwrap();
        assert_eq!(r.status, RolloutStatus::Failed);
        assert!(store.calls().is_empty());
        assert!(notifier.messages()[0].1.contains("submission rejected"));
    }

    #[tokio::test]
    async fn unknown_rollout_is_not_found() {
        let (controller, _state, _store, _n) = setup(rollout(RolloutStatus::Created, None));
        let err = controller.start("rollout-9").await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));
    }
}
