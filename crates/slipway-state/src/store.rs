//! StateStore — redb-backed persistence for the release pipeline.
//!
//! Provides typed CRUD operations over releases, platform runs, workflow
//! runs, builds, submissions, rollouts, and health events. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(PLATFORM_RUNS).map_err(map_err!(Table))?;
        txn.open_table(PRE_PROD_RELEASES).map_err(map_err!(Table))?;
        txn.open_table(PRODUCTION_RELEASES).map_err(map_err!(Table))?;
        txn.open_table(WORKFLOW_RUNS).map_err(map_err!(Table))?;
        txn.open_table(BUILDS).map_err(map_err!(Table))?;
        txn.open_table(BUILD_QUEUES).map_err(map_err!(Table))?;
        txn.open_table(SUBMISSIONS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(HEALTH_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(SCHEDULED_RELEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON row helpers ───────────────────────────────────

    fn put_row<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_rows<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    fn delete_row(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Releases ───────────────────────────────────────────────────

    pub fn put_release(&self, release: &Release) -> StateResult<()> {
        self.put_row(RELEASES, &release.id, release)?;
        debug!(release = %release.id, status = ?release.status, "release stored");
        Ok(())
    }

    pub fn get_release(&self, id: &str) -> StateResult<Option<Release>> {
        self.get_row(RELEASES, id)
    }

    /// Get a release, treating absence as an error (for signal handlers).
    pub fn require_release(&self, id: &str) -> StateResult<Release> {
        self.get_release(id)?
            .ok_or_else(|| StateError::NotFound(format!("release {id}")))
    }

    pub fn list_releases(&self) -> StateResult<Vec<Release>> {
        self.list_rows(RELEASES)
    }

    pub fn delete_release(&self, id: &str) -> StateResult<bool> {
        self.delete_row(RELEASES, id)
    }

    // ── Platform runs ──────────────────────────────────────────────

    pub fn put_platform_run(&self, run: &ReleasePlatformRun) -> StateResult<()> {
        self.put_row(PLATFORM_RUNS, &run.table_key(), run)
    }

    /// Find a platform run by its id alone (scans the table).
    pub fn find_platform_run(&self, run_id: &str) -> StateResult<Option<ReleasePlatformRun>> {
        let runs: Vec<ReleasePlatformRun> = self.list_rows(PLATFORM_RUNS)?;
        Ok(runs.into_iter().find(|r| r.id == run_id))
    }

    pub fn require_platform_run(&self, run_id: &str) -> StateResult<ReleasePlatformRun> {
        self.find_platform_run(run_id)?
            .ok_or_else(|| StateError::NotFound(format!("platform run {run_id}")))
    }

    pub fn list_platform_runs_for_release(
        &self,
        release_id: &str,
    ) -> StateResult<Vec<ReleasePlatformRun>> {
        let runs: Vec<ReleasePlatformRun> = self.list_rows(PLATFORM_RUNS)?;
        Ok(runs.into_iter().filter(|r| r.release_id == release_id).collect())
    }

    // ── Pre-production releases ────────────────────────────────────

    pub fn put_pre_prod_release(&self, pre_prod: &PreProdRelease) -> StateResult<()> {
        self.put_row(PRE_PROD_RELEASES, &pre_prod.table_key(), pre_prod)
    }

    pub fn find_pre_prod_release(&self, id: &str) -> StateResult<Option<PreProdRelease>> {
        let rows: Vec<PreProdRelease> = self.list_rows(PRE_PROD_RELEASES)?;
        Ok(rows.into_iter().find(|p| p.id == id))
    }

    pub fn require_pre_prod_release(&self, id: &str) -> StateResult<PreProdRelease> {
        self.find_pre_prod_release(id)?
            .ok_or_else(|| StateError::NotFound(format!("pre-prod release {id}")))
    }

    /// The pre-prod release whose build comes from a workflow run.
    pub fn find_pre_prod_for_workflow(
        &self,
        workflow_run_id: &str,
    ) -> StateResult<Option<PreProdRelease>> {
        let rows: Vec<PreProdRelease> = self.list_rows(PRE_PROD_RELEASES)?;
        Ok(rows
            .into_iter()
            .find(|p| p.workflow_run_id.as_deref() == Some(workflow_run_id)))
    }

    pub fn list_pre_prod_for_run(&self, platform_run_id: &str) -> StateResult<Vec<PreProdRelease>> {
        let rows: Vec<PreProdRelease> = self.list_rows(PRE_PROD_RELEASES)?;
        Ok(rows
            .into_iter()
            .filter(|p| p.platform_run_id == platform_run_id)
            .collect())
    }

    // ── Production releases ────────────────────────────────────────

    pub fn put_production_release(&self, production: &ProductionRelease) -> StateResult<()> {
        self.put_row(PRODUCTION_RELEASES, &production.table_key(), production)
    }

    pub fn find_production_release(&self, id: &str) -> StateResult<Option<ProductionRelease>> {
        let rows: Vec<ProductionRelease> = self.list_rows(PRODUCTION_RELEASES)?;
        Ok(rows.into_iter().find(|p| p.id == id))
    }

    pub fn require_production_release(&self, id: &str) -> StateResult<ProductionRelease> {
        self.find_production_release(id)?
            .ok_or_else(|| StateError::NotFound(format!("production release {id}")))
    }

    pub fn list_production_for_run(
        &self,
        platform_run_id: &str,
    ) -> StateResult<Vec<ProductionRelease>> {
        let rows: Vec<ProductionRelease> = self.list_rows(PRODUCTION_RELEASES)?;
        Ok(rows
            .into_iter()
            .filter(|p| p.platform_run_id == platform_run_id)
            .collect())
    }

    // ── Workflow runs ──────────────────────────────────────────────

    pub fn put_workflow_run(&self, run: &WorkflowRun) -> StateResult<()> {
        self.put_row(WORKFLOW_RUNS, &run.id, run)
    }

    pub fn get_workflow_run(&self, id: &str) -> StateResult<Option<WorkflowRun>> {
        self.get_row(WORKFLOW_RUNS, id)
    }

    pub fn require_workflow_run(&self, id: &str) -> StateResult<WorkflowRun> {
        self.get_workflow_run(id)?
            .ok_or_else(|| StateError::NotFound(format!("workflow run {id}")))
    }

    pub fn list_workflow_runs_for_run(
        &self,
        platform_run_id: &str,
    ) -> StateResult<Vec<WorkflowRun>> {
        let rows: Vec<WorkflowRun> = self.list_rows(WORKFLOW_RUNS)?;
        Ok(rows
            .into_iter()
            .filter(|w| w.platform_run_id == platform_run_id)
            .collect())
    }

    // ── Builds ─────────────────────────────────────────────────────

    pub fn put_build(&self, build: &Build) -> StateResult<()> {
        self.put_row(BUILDS, &build.id, build)
    }

    pub fn get_build(&self, id: &str) -> StateResult<Option<Build>> {
        self.get_row(BUILDS, id)
    }

    // ── Build queues ───────────────────────────────────────────────

    /// Build produced by a workflow run, if recorded.
    pub fn find_build_for_workflow(&self, workflow_run_id: &str) -> StateResult<Option<Build>> {
        let rows: Vec<Build> = self.list_rows(BUILDS)?;
        Ok(rows.into_iter().find(|b| b.workflow_run_id == workflow_run_id))
    }

    pub fn put_build_queue(&self, queue: &BuildQueue) -> StateResult<()> {
        self.put_row(BUILD_QUEUES, &queue.id, queue)
    }

    pub fn get_build_queue(&self, id: &str) -> StateResult<Option<BuildQueue>> {
        self.get_row(BUILD_QUEUES, id)
    }

    /// The build queue attached to a platform run.
    pub fn find_build_queue_for_run(&self, platform_run_id: &str) -> StateResult<Option<BuildQueue>> {
        let rows: Vec<BuildQueue> = self.list_rows(BUILD_QUEUES)?;
        Ok(rows.into_iter().find(|q| q.platform_run_id == platform_run_id))
    }

    // ── Store submissions ──────────────────────────────────────────

    pub fn put_submission(&self, submission: &StoreSubmission) -> StateResult<()> {
        self.put_row(SUBMISSIONS, &submission.table_key(), submission)
    }

    pub fn find_submission(&self, id: &str) -> StateResult<Option<StoreSubmission>> {
        let rows: Vec<StoreSubmission> = self.list_rows(SUBMISSIONS)?;
        Ok(rows.into_iter().find(|s| s.id == id))
    }

    pub fn require_submission(&self, id: &str) -> StateResult<StoreSubmission> {
        self.find_submission(id)?
            .ok_or_else(|| StateError::NotFound(format!("submission {id}")))
    }

    pub fn list_submissions_for_production(
        &self,
        production_release_id: &str,
    ) -> StateResult<Vec<StoreSubmission>> {
        let rows: Vec<StoreSubmission> = self.list_rows(SUBMISSIONS)?;
        Ok(rows
            .into_iter()
            .filter(|s| s.production_release_id == production_release_id)
            .collect())
    }

    // ── Store rollouts ─────────────────────────────────────────────

    pub fn put_rollout(&self, rollout: &StoreRollout) -> StateResult<()> {
        self.put_row(ROLLOUTS, &rollout.id, rollout)?;
        debug!(
            rollout = %rollout.id,
            status = ?rollout.status,
            stage = ?rollout.current_stage,
            "rollout stored"
        );
        Ok(())
    }

    pub fn get_rollout(&self, id: &str) -> StateResult<Option<StoreRollout>> {
        self.get_row(ROLLOUTS, id)
    }

    pub fn require_rollout(&self, id: &str) -> StateResult<StoreRollout> {
        self.get_rollout(id)?
            .ok_or_else(|| StateError::NotFound(format!("rollout {id}")))
    }

    pub fn list_rollouts(&self) -> StateResult<Vec<StoreRollout>> {
        self.list_rows(ROLLOUTS)
    }

    /// The rollout created for a submission, if any.
    pub fn find_rollout_for_submission(&self, submission_id: &str) -> StateResult<Option<StoreRollout>> {
        let rows: Vec<StoreRollout> = self.list_rows(ROLLOUTS)?;
        Ok(rows.into_iter().find(|r| r.submission_id == submission_id))
    }

    // ── Health events ──────────────────────────────────────────────

    pub fn put_health_event(&self, event: &ReleaseHealthEvent) -> StateResult<()> {
        self.put_row(HEALTH_EVENTS, &event.table_key(), event)
    }

    pub fn get_health_event(
        &self,
        production_release_id: &str,
        event_id: &str,
    ) -> StateResult<Option<ReleaseHealthEvent>> {
        self.get_row(
            HEALTH_EVENTS,
            &format!("{production_release_id}:{event_id}"),
        )
    }

    /// Health events for a production release, most recent first.
    pub fn list_health_events_for_production(
        &self,
        production_release_id: &str,
    ) -> StateResult<Vec<ReleaseHealthEvent>> {
        let rows: Vec<ReleaseHealthEvent> = self.list_rows(HEALTH_EVENTS)?;
        let mut events: Vec<_> = rows
            .into_iter()
            .filter(|e| e.production_release_id == production_release_id)
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(events)
    }

    pub fn latest_health_event_for_production(
        &self,
        production_release_id: &str,
    ) -> StateResult<Option<ReleaseHealthEvent>> {
        Ok(self
            .list_health_events_for_production(production_release_id)?
            .into_iter()
            .next())
    }

    // ── Scheduled releases ─────────────────────────────────────────

    pub fn put_scheduled_release(&self, scheduled: &ScheduledRelease) -> StateResult<()> {
        self.put_row(SCHEDULED_RELEASES, &scheduled.id, scheduled)
    }

    pub fn get_scheduled_release(&self, id: &str) -> StateResult<Option<ScheduledRelease>> {
        self.get_row(SCHEDULED_RELEASES, id)
    }

    /// Pending scheduled releases whose kickoff time has passed.
    pub fn list_due_scheduled_releases(&self, now: u64) -> StateResult<Vec<ScheduledRelease>> {
        let rows: Vec<ScheduledRelease> = self.list_rows(SCHEDULED_RELEASES)?;
        Ok(rows
            .into_iter()
            .filter(|s| s.scheduled_at <= now && s.outcome == ScheduledOutcome::Pending)
            .collect())
    }
}
