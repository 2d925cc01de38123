//! Health gate: verdict persistence and halt decisions.

use tracing::{info, warn};

use slipway_state::{epoch_secs, ReleaseHealthEvent, StateResult, StateStore};

/// Persists health verdicts and decides whether automation may act on them.
///
/// All answers come from the latest persisted event, never from in-memory
/// state, so a redelivered event or a restarted process reaches the same
/// decision.
#[derive(Clone)]
pub struct HealthGate {
    state: StateStore,
}

impl HealthGate {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Record a verdict as a new health event.
    pub fn record_verdict(
        &self,
        production_release_id: &str,
        healthy: bool,
    ) -> StateResult<ReleaseHealthEvent> {
        let occurred_at = epoch_secs();
        let seq = self
            .state
            .list_health_events_for_production(production_release_id)?
            .len();
        let event = ReleaseHealthEvent {
            id: format!("he-{occurred_at}-{seq}"),
            production_release_id: production_release_id.to_string(),
            healthy,
            action_triggered: false,
            occurred_at,
        };
        self.state.put_health_event(&event)?;
        info!(
            production_release_id,
            event_id = %event.id,
            healthy,
            "health verdict recorded"
        );
        Ok(event)
    }

    /// Whether the latest verdict allows the rollout to advance.
    ///
    /// No events yet means healthy: a release with no data is not held back.
    pub fn release_healthy(&self, production_release_id: &str) -> StateResult<bool> {
        Ok(self
            .state
            .latest_health_event_for_production(production_release_id)?
            .map(|e| e.healthy)
            .unwrap_or(true))
    }

    /// Claim the automated halt for an unhealthy event.
    ///
    /// Returns `true` exactly once per event: the first claim flips the
    /// event's `action_triggered` flag, every later claim (a redelivery, a
    /// racing signal) sees the flag and gets `false`. Healthy and unknown
    /// events never grant a claim.
    pub fn claim_halt(
        &self,
        production_release_id: &str,
        event_id: &str,
    ) -> StateResult<bool> {
        let Some(mut event) = self.state.get_health_event(production_release_id, event_id)? else {
            warn!(production_release_id, event_id, "halt claim for unknown health event");
            return Ok(false);
        };
        if event.healthy || event.action_triggered {
            return Ok(false);
        }
        event.action_triggered = true;
        self.state.put_health_event(&event)?;
        info!(production_release_id, event_id, "halt claimed for unhealthy event");
        Ok(true)
    }
}
