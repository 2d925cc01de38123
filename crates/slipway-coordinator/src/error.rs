//! Coordinator error taxonomy.

use thiserror::Error;

use slipway_lock::LockError;
use slipway_providers::ProviderError;
use slipway_rollout::RolloutError;
use slipway_state::{StateError, TransitionError};

/// An action or signal handler failed. Callers get a machine-readable kind
/// plus a human-readable message, never a raw provider error or a panic.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<RolloutError> for ActionError {
    fn from(err: RolloutError) -> Self {
        match err {
            RolloutError::NotFound(id) => ActionError::NotFound(format!("rollout {id}")),
            RolloutError::Transition(e) => ActionError::Transition(e),
            RolloutError::Provider(e) => ActionError::Provider(e),
            RolloutError::Lock(e) => ActionError::Lock(e),
            RolloutError::State(e) => ActionError::State(e),
        }
    }
}

pub type ActionResult<T> = Result<T, ActionError>;
