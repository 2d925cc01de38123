//! Automatic rollout advancement.
//!
//! Three entry points, all idempotent:
//!
//! * [`AutoRolloutEngine::bulk_sweep`] walks every automatic rollout: starts
//!   the created ones, advances the due-and-healthy ones, reschedules the
//!   unhealthy ones without advancing.
//! * [`AutoRolloutEngine::run_tick`] services one scheduled increase job. The
//!   job carries the fingerprint captured at schedule time; any mismatch
//!   means the world moved since scheduling and the tick silently no-ops.
//! * [`AutoRolloutEngine::verification_sweep`] re-arms rollouts whose tick
//!   job went missing (process crash between persist and enqueue), waiting
//!   one full interval past the due time before declaring the tick lost.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use slipway_health::HealthGate;
use slipway_jobs::{Job, JobQueue};
use slipway_state::{
    epoch_secs, RolloutFingerprint, RolloutStatus, StateResult, StateStore, StoreRollout,
};

use crate::controller::{RolloutController, RolloutError, LOCK_TTL};

/// Default spacing between automatic stage advances.
pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Moved one stage forward and scheduled the next tick.
    Advanced,
    /// Reached 100% and completed the rollout.
    Completed,
    /// Latest health verdict was unhealthy; rescheduled without advancing.
    SkippedUnhealthy,
    /// The fingerprint no longer matches; someone acted since scheduling.
    Stale,
    /// Rollout missing, manual, or not in a started state.
    NotApplicable,
}

/// Counters from one bulk sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub started: u32,
    pub advanced: u32,
    pub completed: u32,
    pub skipped_unhealthy: u32,
    pub errored: u32,
}

/// Drives automatic rollouts forward on a fixed interval.
#[derive(Clone)]
pub struct AutoRolloutEngine {
    state: StateStore,
    controller: RolloutController,
    gate: HealthGate,
    queue: JobQueue,
    interval_secs: u64,
}

impl AutoRolloutEngine {
    pub fn new(state: StateStore, controller: RolloutController, queue: JobQueue) -> Self {
        let gate = HealthGate::new(state.clone());
        Self {
            state,
            controller,
            gate,
            queue,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs();
        self
    }

    /// Production release owning this rollout, via its submission.
    fn production_release_id_for(&self, rollout: &StoreRollout) -> StateResult<Option<String>> {
        Ok(self
            .state
            .find_submission(&rollout.submission_id)?
            .map(|s| s.production_release_id))
    }

    /// Latest health verdict for the rollout's production release.
    ///
    /// A rollout whose submission cannot be resolved is treated as healthy;
    /// the optimistic default matches having no verdict at all.
    fn rollout_healthy(&self, rollout: &StoreRollout) -> StateResult<bool> {
        match self.production_release_id_for(rollout)? {
            Some(production_release_id) => self.gate.release_healthy(&production_release_id),
            None => {
                warn!(rollout_id = %rollout.id, "rollout has no resolvable production release");
                Ok(true)
            }
        }
    }

    /// Stamp the next due time and enqueue the matching tick job.
    ///
    /// The enqueued fingerprint is taken after stamping, so the job is valid
    /// against exactly this schedule and no other. The caller holds the
    /// rollout lock; the row write must serialize against the manual verbs.
    fn schedule_next(&self, rollout: &mut StoreRollout) -> StateResult<()> {
        let now = epoch_secs();
        rollout.automatic_updated_at = Some(now);
        rollout.automatic_next_update_at = Some(now + self.interval_secs);
        self.state.put_rollout(rollout)?;

        self.queue.enqueue_after(
            Job::IncreaseRollout {
                rollout_id: rollout.id.clone(),
                expected: rollout.fingerprint(),
            },
            Duration::from_secs(self.interval_secs),
        );
        Ok(())
    }

    /// Service one scheduled increase job.
    ///
    /// The fast checks run unlocked; every row write happens inside the
    /// rollout lock, after a re-read, so a pause or halt that lands in
    /// between is never overwritten by a tick's snapshot.
    pub async fn run_tick(
        &self,
        rollout_id: &str,
        expected: Option<RolloutFingerprint>,
    ) -> Result<TickOutcome, RolloutError> {
        let Some(rollout) = self.state.get_rollout(rollout_id)? else {
            warn!(rollout_id, "tick for unknown rollout");
            return Ok(TickOutcome::NotApplicable);
        };
        if !rollout.automatic || rollout.status != RolloutStatus::Started {
            debug!(rollout_id, status = ?rollout.status, "tick not applicable");
            return Ok(TickOutcome::NotApplicable);
        }
        if let Some(expected) = &expected {
            if !rollout.fingerprint_matches(expected) {
                debug!(rollout_id, "stale tick, fingerprint mismatch");
                return Ok(TickOutcome::Stale);
            }
        }
        let healthy = self.rollout_healthy(&rollout)?;

        self.controller
            .locks
            .with_lock(
                &RolloutController::lock_name(rollout_id),
                LOCK_TTL,
                &self.controller.lock_policy,
                || async move {
                    let Some(mut rollout) = self.state.get_rollout(rollout_id)? else {
                        return Ok(TickOutcome::NotApplicable);
                    };
                    if !rollout.automatic || rollout.status != RolloutStatus::Started {
                        debug!(rollout_id, status = ?rollout.status, "rollout moved while unlocked");
                        return Ok(TickOutcome::NotApplicable);
                    }
                    if let Some(expected) = &expected {
                        if !rollout.fingerprint_matches(expected) {
                            debug!(rollout_id, "stale tick, fingerprint mismatch");
                            return Ok(TickOutcome::Stale);
                        }
                    }

                    if !healthy {
                        info!(rollout_id, "release unhealthy, holding rollout at current stage");
                        self.schedule_next(&mut rollout)?;
                        return Ok(TickOutcome::SkippedUnhealthy);
                    }

                    // Replayed ticks racing for the lock re-check the
                    // fingerprint above, so only one of them advances.
                    let mut advanced = match self
                        .controller
                        .increase_locked(rollout_id, expected.as_ref())
                        .await?
                    {
                        Some(advanced) => advanced,
                        None => return Ok(TickOutcome::Stale),
                    };

                    if advanced.status == RolloutStatus::Started {
                        self.schedule_next(&mut advanced)?;
                        Ok(TickOutcome::Advanced)
                    } else {
                        // Completing already cleared the schedule.
                        Ok(TickOutcome::Completed)
                    }
                },
            )
            .await?
    }

    /// Walk every automatic rollout once.
    ///
    /// Per-rollout failures are logged and counted; one broken rollout never
    /// stops the sweep.
    pub async fn bulk_sweep(&self) -> StateResult<SweepStats> {
        let now = epoch_secs();
        let mut stats = SweepStats::default();

        for rollout in self.state.list_rollouts()? {
            if !rollout.automatic {
                continue;
            }
            match rollout.status {
                RolloutStatus::Created => match self.start_and_schedule(&rollout.id).await {
                    Ok(()) => stats.started += 1,
                    Err(err) => {
                        warn!(rollout_id = %rollout.id, %err, "sweep failed to start rollout");
                        stats.errored += 1;
                    }
                },
                RolloutStatus::Started => {
                    let due = rollout.automatic_next_update_at.is_none_or(|t| t <= now);
                    if !due {
                        continue;
                    }
                    match self.run_tick(&rollout.id, None).await {
                        Ok(TickOutcome::Advanced) => stats.advanced += 1,
                        Ok(TickOutcome::Completed) => stats.completed += 1,
                        Ok(TickOutcome::SkippedUnhealthy) => stats.skipped_unhealthy += 1,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(rollout_id = %rollout.id, %err, "sweep failed to advance rollout");
                            stats.errored += 1;
                        }
                    }
                }
                _ => {}
            }
        }

        info!(?stats, "bulk rollout sweep finished");
        Ok(stats)
    }

    async fn start_and_schedule(&self, rollout_id: &str) -> Result<(), RolloutError> {
        self.controller
            .locks
            .with_lock(
                &RolloutController::lock_name(rollout_id),
                LOCK_TTL,
                &self.controller.lock_policy,
                || async move {
                    let mut started = self.controller.start_locked(rollout_id).await?;
                    self.schedule_next(&mut started)?;
                    Ok(())
                },
            )
            .await?
    }

    /// Re-arm rollouts whose scheduled tick never arrived.
    ///
    /// A tick is declared lost only once its due time is a full interval in
    /// the past: within that window the delayed job may still be in flight,
    /// and re-enqueueing early would race it.
    pub async fn verification_sweep(&self) -> StateResult<u32> {
        let now = epoch_secs();
        let mut rearmed = 0u32;

        for rollout in self.state.list_rollouts()? {
            if !rollout.automatic || rollout.status != RolloutStatus::Started {
                continue;
            }
            let Some(due_at) = rollout.automatic_next_update_at else {
                continue;
            };
            if now >= due_at + self.interval_secs {
                warn!(rollout_id = %rollout.id, due_at, "tick job lost, re-enqueueing");
                self.queue.enqueue(Job::IncreaseRollout {
                    rollout_id: rollout.id.clone(),
                    expected: rollout.fingerprint(),
                });
                rearmed += 1;
            }
        }
        Ok(rearmed)
    }

    /// Periodic sweep loop: bulk sweep plus verification, until shutdown.
    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(every_secs = every.as_secs(), "auto rollout engine started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(every) => {
                    if let Err(err) = self.bulk_sweep().await {
                        warn!(%err, "bulk sweep failed");
                    }
                    if let Err(err) = self.verification_sweep().await {
                        warn!(%err, "verification sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, auto rollout engine exiting");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use slipway_health::HealthGate;
    use slipway_jobs::JobRunner;
    use slipway_lock::LockManager;
    use slipway_retry::BackoffPolicy;
    use slipway_providers::{FakeNotifier, FakeStore, Notifier, StoreProvider};
    use slipway_state::{StoreSubmission, SubmissionStatus};

    const INTERVAL: u64 = 600;

    fn rollout(status: RolloutStatus, current: Option<usize>, automatic: bool) -> StoreRollout {
        let next_update_at = (automatic && current.is_some()).then(epoch_secs);
        StoreRollout {
            id: "rollout-1".to_string(),
            submission_id: "sub-1".to_string(),
            stages: vec![1.0, 10.0, 50.0, 100.0],
            current_stage: current,
            status,
            automatic,
            automatic_next_update_at: next_update_at,
            automatic_updated_at: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn setup(seed: StoreRollout) -> (AutoRolloutEngine, StateStore, Arc<FakeStore>, JobRunner) {
        let state = StateStore::open_in_memory().unwrap();
        state
            .put_submission(&StoreSubmission {
                id: "sub-1".to_string(),
                production_release_id: "prod-1".to_string(),
                build_id: "build-1".to_string(),
                status: SubmissionStatus::Approved,
                failure_reason: None,
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
        state.put_rollout(&seed).unwrap();

        let store = Arc::new(FakeStore::new());
        let controller = RolloutController::new(
            state.clone(),
            store.clone() as Arc<dyn StoreProvider>,
            Arc::new(FakeNotifier::new()) as Arc<dyn Notifier>,
            LockManager::new(),
        );
        let (queue, runner) = slipway_jobs::job_queue();
        let engine = AutoRolloutEngine::new(state.clone(), controller, queue)
            .with_interval(Duration::from_secs(INTERVAL));
        (engine, state, store, runner)
    }

    #[tokio::test]
    async fn healthy_tick_advances_one_stage() {
        let seed = rollout(RolloutStatus::Started, Some(0), true);
        let expected = seed.fingerprint();
        let (engine, state, _store, _runner) = setup(seed);

        let outcome = engine.run_tick("rollout-1", expected).await.unwrap();
        assert_eq!(outcome, TickOutcome::Advanced);

        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.current_stage, Some(1));
        assert!(stored.automatic_next_update_at.unwrap() > epoch_secs() + INTERVAL / 2);
    }

    #[tokio::test]
    async fn stale_fingerprint_is_a_silent_no_op() {
        let seed = rollout(RolloutStatus::Started, Some(1), true);
        let (engine, state, store, _runner) = setup(seed);

        let stale = RolloutFingerprint {
            next_update_at: 1,
            stage: 0,
        };
        let outcome = engine.run_tick("rollout-1", Some(stale)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Stale);
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(1));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn replayed_tick_advances_exactly_once() {
        let seed = rollout(RolloutStatus::Started, Some(0), true);
        let expected = seed.fingerprint();
        let (engine, state, _store, _runner) = setup(seed);

        assert_eq!(
            engine.run_tick("rollout-1", expected).await.unwrap(),
            TickOutcome::Advanced
        );
        // Same payload delivered again: the advance restamped the schedule,
        // so the old fingerprint no longer matches.
        assert_eq!(
            engine.run_tick("rollout-1", expected).await.unwrap(),
            TickOutcome::Stale
        );
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(1));
    }

    #[tokio::test]
    async fn concurrent_replayed_ticks_advance_exactly_once() {
        let seed = rollout(RolloutStatus::Started, Some(0), true);
        let expected = seed.fingerprint();
        let (engine, state, _store, _runner) = setup(seed);

        let (a, b) = tokio::join!(
            engine.run_tick("rollout-1", expected),
            engine.run_tick("rollout-1", expected),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == TickOutcome::Advanced).count(),
            1,
            "{outcomes:?}"
        );
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(1));
    }

    #[tokio::test]
    async fn unhealthy_tick_holds_the_stage_but_stays_scheduled() {
        let seed = rollout(RolloutStatus::Started, Some(1), true);
        let expected = seed.fingerprint();
        let (engine, state, store, _runner) = setup(seed);
        HealthGate::new(state.clone())
            .record_verdict("prod-1", false)
            .unwrap();

        let outcome = engine.run_tick("rollout-1", expected).await.unwrap();
        assert_eq!(outcome, TickOutcome::SkippedUnhealthy);

        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.current_stage, Some(1));
        assert!(stored.automatic_next_update_at.is_some());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn tick_does_not_write_through_a_held_rollout_lock() {
        let seed = rollout(RolloutStatus::Started, Some(1), true);
        let stamped_at = seed.automatic_next_update_at;
        let expected = seed.fingerprint();
        let (mut engine, state, store, _runner) = setup(seed);
        engine.controller.lock_policy = BackoffPolicy::new(1, Duration::from_millis(5));
        HealthGate::new(state.clone())
            .record_verdict("prod-1", false)
            .unwrap();

        // Another operation is mid-flight on this rollout.
        let _held = engine
            .controller
            .locks
            .try_acquire("rollout:rollout-1", Duration::from_secs(60))
            .unwrap();

        let err = engine.run_tick("rollout-1", expected).await.unwrap_err();
        assert!(matches!(err, RolloutError::Lock(_)));

        // The held operation's view of the row is intact: no restamp, no
        // stage move, no store call.
        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.current_stage, Some(1));
        assert_eq!(stored.automatic_next_update_at, stamped_at);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn tick_into_the_final_stage_completes_and_unschedules() {
        let seed = rollout(RolloutStatus::Started, Some(2), true);
        let expected = seed.fingerprint();
        let (engine, state, _store, _runner) = setup(seed);

        let outcome = engine.run_tick("rollout-1", expected).await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed);

        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.status, RolloutStatus::Completed);
        assert_eq!(stored.automatic_next_update_at, None);
    }

    #[tokio::test]
    async fn manual_and_paused_rollouts_are_not_ticked() {
        let (engine, _state, _store, _runner) = setup(rollout(RolloutStatus::Started, Some(0), false));
        assert_eq!(
            engine.run_tick("rollout-1", None).await.unwrap(),
            TickOutcome::NotApplicable
        );

        let (engine, _state, _store, _runner) = setup(rollout(RolloutStatus::Paused, Some(0), true));
        assert_eq!(
            engine.run_tick("rollout-1", None).await.unwrap(),
            TickOutcome::NotApplicable
        );
    }

    #[tokio::test]
    async fn bulk_sweep_starts_created_rollouts() {
        let (engine, state, store, _runner) = setup(rollout(RolloutStatus::Created, None, true));

        let stats = engine.bulk_sweep().await.unwrap();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.errored, 0);

        let stored = state.require_rollout("rollout-1").unwrap();
        assert_eq!(stored.status, RolloutStatus::Started);
        assert_eq!(stored.current_stage, Some(0));
        assert!(stored.automatic_next_update_at.is_some());
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn bulk_sweep_advances_due_rollouts() {
        let mut seed = rollout(RolloutStatus::Started, Some(0), true);
        seed.automatic_next_update_at = Some(epoch_secs() - 5);
        let (engine, state, _store, _runner) = setup(seed);

        let stats = engine.bulk_sweep().await.unwrap();
        assert_eq!(stats.advanced, 1);
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(1));
    }

    #[tokio::test]
    async fn bulk_sweep_leaves_rollouts_that_are_not_due() {
        let mut seed = rollout(RolloutStatus::Started, Some(0), true);
        seed.automatic_next_update_at = Some(epoch_secs() + 3600);
        let (engine, state, _store, _runner) = setup(seed);

        let stats = engine.bulk_sweep().await.unwrap();
        assert_eq!(stats, SweepStats::default());
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(0));
    }

    #[tokio::test]
    async fn bulk_sweep_skips_unhealthy_without_advancing() {
        let mut seed = rollout(RolloutStatus::Started, Some(0), true);
        seed.automatic_next_update_at = Some(epoch_secs() - 5);
        let (engine, state, _store, _runner) = setup(seed);
        HealthGate::new(state.clone())
            .record_verdict("prod-1", false)
            .unwrap();

        let stats = engine.bulk_sweep().await.unwrap();
        assert_eq!(stats.skipped_unhealthy, 1);
        assert_eq!(stats.advanced, 0);
        assert_eq!(state.require_rollout("rollout-1").unwrap().current_stage, Some(0));
    }

    #[tokio::test]
    async fn verification_sweep_waits_one_full_interval() {
        // Due recently: the delayed job may still be in flight, leave it.
        let mut seed = rollout(RolloutStatus::Started, Some(0), true);
        seed.automatic_next_update_at = Some(epoch_secs() - 10);
        let (engine, _state, _store, _runner) = setup(seed);
        assert_eq!(engine.verification_sweep().await.unwrap(), 0);

        // Due more than a full interval ago: the tick is lost, re-arm it.
        let mut seed = rollout(RolloutStatus::Started, Some(0), true);
        seed.automatic_next_update_at = Some(epoch_secs() - INTERVAL - 10);
        let (engine, _state, _store, mut runner) = setup(seed);
        assert_eq!(engine.verification_sweep().await.unwrap(), 1);

        let job = tokio::time::timeout(Duration::from_secs(1), runner.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(job, Job::IncreaseRollout { ref rollout_id, .. } if rollout_id == "rollout-1"));
    }
}
