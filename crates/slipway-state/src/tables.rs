//! redb table definitions for the Slipway state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Child records use composite keys `{parent_id}:{child_id}` so
//! related rows sort together.

use redb::TableDefinition;

/// Releases keyed by `{release_id}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Platform runs keyed by `{release_id}:{run_id}`.
pub const PLATFORM_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("platform_runs");

/// Pre-production releases keyed by `{platform_run_id}:{pre_prod_id}`.
pub const PRE_PROD_RELEASES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("pre_prod_releases");

/// Production releases keyed by `{platform_run_id}:{production_id}`.
pub const PRODUCTION_RELEASES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("production_releases");

/// Workflow runs keyed by `{workflow_run_id}`.
pub const WORKFLOW_RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("workflow_runs");

/// Builds keyed by `{build_id}`.
pub const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");

/// Build queues keyed by `{build_queue_id}`.
pub const BUILD_QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("build_queues");

/// Store submissions keyed by `{production_release_id}:{submission_id}`.
pub const SUBMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("submissions");

/// Store rollouts keyed by `{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Release health events keyed by `{production_release_id}:{event_id}`.
pub const HEALTH_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("health_events");

/// Scheduled releases keyed by `{scheduled_release_id}`.
pub const SCHEDULED_RELEASES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scheduled_releases");
